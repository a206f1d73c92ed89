//! Store engine for cmoo
//!
//! This crate orchestrates all lower layers:
//! - Store: cache, locks and persistence behind one API
//! - Transaction lifecycle: start_tx, get_object, make_object, finish_tx
//! - Identity allocation and metrics (TransactionCoordinator)
//! - Configuration (StoreConfig, `cmoo.toml`)
//!
//! The engine is the only component that knows about:
//! - Transactions as units of work (the lock layer only sees identities)
//! - Cross-layer coordination (cache + locks + persistence)
//! - Write-back of evicted objects

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod slots;
pub mod store;
pub mod transaction;

pub use config::{StoreConfig, CONFIG_FILE_NAME};
pub use coordinator::{MetricsSnapshot, TransactionCoordinator};
pub use slots::SlotAllocator;
pub use store::Store;
pub use transaction::StoreTransaction;
