//! cmoo-store - concurrency control and caching beneath a prototype-object VM
//!
//! Worker threads share one graph of persistent objects. This crate lets them
//! read and mutate that graph through transactions that take fair, reentrant,
//! upgradeable shared/exclusive locks, with online deadlock detection, while
//! an LRU cache keeps hot objects resident.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use cmoo_store::{MemoryPersistence, Object, Store};
//!
//! let persistence = Arc::new(MemoryPersistence::with_objects(vec![Object::new(0)]));
//! let store = Store::new(persistence, 4);
//!
//! let mut tx = store.start_tx();
//! let root = store.get_object(&mut tx, 0).unwrap();
//! assert_eq!(root.id(), 0);
//! let child = store.make_object(&mut tx, 0);
//! assert_eq!(child.read().parents(), &[0]);
//! store.finish_tx(tx);
//! ```
//!
//! # Architecture
//!
//! - `cmoo-core`: identifiers, objects, errors, the `Persistence` seam
//! - `cmoo-concurrency`: `Lock` and the shared `LocksContext` deadlock detector
//! - `cmoo-storage`: the pinning LRU `Cache` and `LockedObject`
//! - `cmoo-engine`: `Store` and `StoreTransaction`

pub use cmoo_concurrency::{Lock, LockOutcome, LocksContext};
pub use cmoo_core::{Error, LockMode, Object, ObjectId, Persistence, Result, TxIdentity};
pub use cmoo_engine::{MetricsSnapshot, Store, StoreConfig, StoreTransaction};
pub use cmoo_storage::{Cache, CacheStats, LockedObject, MemoryPersistence};
