//! Error types for the object store
//!
//! This module defines the error types surfaced to callers.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Only recoverable conditions are errors. A persistence miss for an id the
//! store believes exists, or running out of transaction slots, violates an
//! invariant and panics instead.

use crate::types::ObjectId;
use std::io;
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the object store
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (config files, persistence backends)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Persistence backend failed
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// The transaction was chosen to break a deadlock cycle
    ///
    /// It has already been removed from the lock's wait queue. The whole
    /// unit of work must be retried as a new transaction.
    #[error("Transaction {sid} chosen as deadlock victim waiting for object {object}")]
    Deadlock {
        /// Sequence id of the victim
        sid: u64,
        /// Object whose lock it was waiting for
        object: ObjectId,
    },

    /// A shared to exclusive upgrade could not be granted
    ///
    /// Another exclusive request was already queued. Same retry contract as
    /// [`Error::Deadlock`].
    #[error("Upgrade of object {object} to exclusive is stale for transaction {sid}")]
    Stale {
        /// Sequence id of the transaction that asked to upgrade
        sid: u64,
        /// Object whose lock it tried to upgrade
        object: ObjectId,
    },

    /// Configuration is malformed or out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// True for outcomes the caller handles by retrying in a new transaction
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Deadlock { .. } | Error::Stale { .. })
    }

    /// Shorthand for a persistence failure
    pub fn persistence(msg: impl Into<String>) -> Self {
        Error::PersistenceError(msg.into())
    }

    /// Shorthand for a configuration failure
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }
}
