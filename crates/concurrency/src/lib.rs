//! Concurrency layer for the object store
//!
//! This crate implements pessimistic, per-object locking with:
//! - Lock: fair, reentrant, upgradeable shared/exclusive lock
//! - LocksContext: the wait-for-graph shared by every lock built from it
//! - Online deadlock detection whenever a transaction is about to block
//!
//! The lock layer only ever sees a [`TxIdentity`](cmoo_core::TxIdentity);
//! it knows nothing about stores or caches.
//!
//! ## Latch order
//!
//! ```text
//! lock latch -> detector latch -> wake-signal latch
//! ```
//!
//! The detector never takes a lock latch. Victims are marked through their
//! wake signal, which is a leaf latch, so the order above is total.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod lock;
mod signal;
pub mod wait_for_graph;

pub use context::LocksContext;
pub use lock::{Lock, LockOutcome};
pub use wait_for_graph::WaitForGraph;
