//! Storage layer for the object store
//!
//! This crate implements the resident-object side of the store with:
//! - Cache: hash-chained map of resident objects with pin counts
//! - LRU eviction restricted to unpinned entries
//! - LockedObject: an object paired with its lock
//! - MemoryPersistence: an in-memory `Persistence` backend
//!
//! # Pinning
//!
//! Every handle a transaction obtains through [`Cache::get`] or
//! [`Cache::put`] is one pin. An entry only becomes eligible for eviction
//! once every pin has been given back through [`Cache::release`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod locked;
pub mod memory;

pub use cache::{Cache, CacheStats};
pub use locked::LockedObject;
pub use memory::MemoryPersistence;
