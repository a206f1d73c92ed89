//! Store transaction handle
//!
//! A `StoreTransaction` is created by [`Store::start_tx`](crate::Store::start_tx)
//! and consumed by [`Store::finish_tx`](crate::Store::finish_tx). There is no
//! separate abort: a transaction that hit a deadlock or stale upgrade is
//! finished like any other and the work retried in a new one.

use std::sync::Arc;

use cmoo_core::TxIdentity;
use cmoo_storage::LockedObject;
use tracing::warn;

/// An in-progress unit of work against a store
///
/// Holds every object handle obtained through it; each one is a cache pin
/// and possibly a lock that `finish_tx` gives back.
#[derive(Debug)]
pub struct StoreTransaction {
    identity: TxIdentity,
    objects: Vec<Arc<LockedObject>>,
    finished: bool,
}

impl StoreTransaction {
    pub(crate) fn new(identity: TxIdentity) -> Self {
        Self {
            identity,
            objects: Vec::new(),
            finished: false,
        }
    }

    /// Sequence id; monotonic across the store, never reused
    #[inline]
    pub fn sid(&self) -> u64 {
        self.identity.sid()
    }

    /// Concurrency slot in `[0, max_tasks)`; reused after finish
    #[inline]
    pub fn cid(&self) -> usize {
        self.identity.cid()
    }

    /// The (sid, cid) pair the lock layer sees
    #[inline]
    pub fn identity(&self) -> TxIdentity {
        self.identity
    }

    /// Objects obtained so far, in order, including repeats
    pub fn objects(&self) -> &[Arc<LockedObject>] {
        &self.objects
    }

    pub(crate) fn record(&mut self, object: Arc<LockedObject>) {
        self.objects.push(object);
    }

    pub(crate) fn take_objects(&mut self) -> Vec<Arc<LockedObject>> {
        std::mem::take(&mut self.objects)
    }

    pub(crate) fn mark_finished(&mut self) {
        self.finished = true;
    }
}

impl Drop for StoreTransaction {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                target: "cmoo::store",
                tx = %self.identity,
                objects = self.objects.len(),
                "Transaction dropped without finish_tx; its locks, pins and slot leak"
            );
        }
    }
}
