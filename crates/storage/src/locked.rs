//! Cache-resident pairing of an object with its lock
//!
//! Logical isolation between transactions comes from the [`Lock`]. The
//! `RwLock` around the object contents is only a memory-safety latch so
//! that handles can be shared across threads; it is held for the duration
//! of a single read or write, never across a lock acquisition.

use std::sync::atomic::{AtomicUsize, Ordering};

use cmoo_concurrency::Lock;
use cmoo_core::{Object, ObjectId};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// An object, the lock guarding it, and its cache pin count
///
/// Exactly one `LockedObject` exists per resident object id. The pin count
/// is non-zero while any transaction holds the handle; only the owning
/// [`Cache`](crate::Cache) changes it.
#[derive(Debug)]
pub struct LockedObject {
    id: ObjectId,
    object: RwLock<Object>,
    lock: Lock,
    pins: AtomicUsize,
}

impl LockedObject {
    /// Wrap `object` with `lock`, unpinned
    pub fn new(object: Object, lock: Lock) -> Self {
        Self {
            id: object.id(),
            object: RwLock::new(object),
            lock,
            pins: AtomicUsize::new(0),
        }
    }

    /// Id of the wrapped object
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Borrow the object contents
    pub fn read(&self) -> RwLockReadGuard<'_, Object> {
        self.object.read()
    }

    /// Borrow the object contents mutably
    ///
    /// Callers are expected to hold the object's lock in exclusive mode.
    pub fn write(&self) -> RwLockWriteGuard<'_, Object> {
        self.object.write()
    }

    /// Copy of the current contents, for handing back to persistence
    pub fn snapshot(&self) -> Object {
        self.object.read().clone()
    }

    /// The lock guarding this object
    #[inline]
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// Number of outstanding pins
    pub fn pin_count(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    /// True while some transaction holds the handle
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Add a pin, returning the previous count
    pub(crate) fn pin(&self) -> usize {
        self.pins.fetch_add(1, Ordering::AcqRel)
    }

    /// Drop a pin, returning the remaining count
    ///
    /// # Panics
    ///
    /// Panics if the object is not pinned.
    pub(crate) fn unpin(&self) -> usize {
        match self
            .pins
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| p.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => panic!("object {} released more often than it was fetched", self.id),
        }
    }
}
