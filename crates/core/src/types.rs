//! Core types for the object store
//!
//! This module defines the foundational identifiers:
//! - ObjectId: identifier of a persistent object
//! - TxIdentity: sequence id and slot id of a running transaction
//! - LockMode: shared or exclusive access to one object

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a persistent object
///
/// Object 0 is the root of the object graph. Ids are never reused; the store
/// allocates new ones above the highest persisted id.
pub type ObjectId = u64;

/// Identity of a transaction as seen by the lock layer
///
/// - `sid` is monotonically increasing and never reused. A larger sid means
///   the transaction started later; deadlock victims are picked by it.
/// - `cid` is a small slot index in `[0, max_tasks)`, reused once the owning
///   transaction finishes. It is the row/column in the wait-for-graph.
///
/// The store hands these out from `start_tx`. Tests that exercise locks in
/// isolation construct them directly with [`TxIdentity::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxIdentity {
    sid: u64,
    cid: usize,
}

impl TxIdentity {
    /// Create an identity with a caller-chosen sid and cid
    pub fn new(sid: u64, cid: usize) -> Self {
        Self { sid, cid }
    }

    /// Sequence id (arrival order)
    #[inline]
    pub fn sid(&self) -> u64 {
        self.sid
    }

    /// Slot id (wait-for-graph coordinate)
    #[inline]
    pub fn cid(&self) -> usize {
        self.cid
    }

    /// True if `self` started after `other`
    pub fn is_younger_than(&self, other: &TxIdentity) -> bool {
        self.sid > other.sid
    }
}

impl fmt::Display for TxIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx(sid={}, cid={})", self.sid, self.cid)
    }
}

/// Access mode requested from a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Many holders at once, read access
    Shared,
    /// Single holder, write access
    Exclusive,
}

impl LockMode {
    /// True if a holder in `self` mode satisfies a request for `requested`
    ///
    /// Exclusive covers everything; Shared only covers Shared.
    pub fn covers(self, requested: LockMode) -> bool {
        self == requested || self == LockMode::Exclusive
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}
