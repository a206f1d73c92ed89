//! Core traits for the persistence seam
//!
//! The store never encodes or writes objects itself. It loads them through
//! [`Persistence`] on a cache miss and hands them back when they leave the
//! cache, so backends can be swapped without touching the locking layers.

use crate::error::Result;
use crate::object::Object;
use crate::types::ObjectId;

/// Persistence backend for objects
///
/// Thread safety: all methods may be called concurrently from many worker
/// threads (requires Send + Sync).
pub trait Persistence: Send + Sync {
    /// Load an object by id
    ///
    /// Returns `Ok(None)` if the backend has no such object.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend itself fails.
    fn get(&self, id: ObjectId) -> Result<Option<Object>>;

    /// Store an object, replacing any previous version with the same id
    ///
    /// # Errors
    ///
    /// Returns an error if the backend itself fails.
    fn put(&self, object: Object) -> Result<()>;

    /// Highest id currently persisted, or `None` when empty
    ///
    /// Used to seed the object-id allocator so new ids never collide with
    /// stored ones.
    fn max_object_id(&self) -> Option<ObjectId>;
}
