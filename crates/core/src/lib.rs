//! Core types and traits for the cmoo object store
//!
//! This crate defines the foundational types used throughout the system:
//! - ObjectId / Object: identity and parent links of persistent objects
//! - TxIdentity: the opaque (sid, cid) pair the lock layer sees
//! - LockMode: shared or exclusive access
//! - Error: error type hierarchy
//! - Persistence: the backend seam the store loads objects through

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod object;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use object::Object;
pub use traits::Persistence;
pub use types::{LockMode, ObjectId, TxIdentity};
