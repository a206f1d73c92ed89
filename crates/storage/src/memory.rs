//! In-memory persistence backend
//!
//! Keeps every object in an `FxHashMap` behind a `RwLock`. Loads clone the
//! stored object; writes replace it. Nothing survives the process.

use cmoo_core::{Object, ObjectId, Persistence, Result};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Persistence held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    objects: RwLock<FxHashMap<ObjectId, Object>>,
    loads: AtomicU64,
    stores: AtomicU64,
}

impl MemoryPersistence {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend seeded with `objects`
    ///
    /// Later objects replace earlier ones with the same id.
    pub fn with_objects(objects: impl IntoIterator<Item = Object>) -> Self {
        let map: FxHashMap<ObjectId, Object> =
            objects.into_iter().map(|obj| (obj.id(), obj)).collect();
        Self {
            objects: RwLock::new(map),
            ..Self::default()
        }
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// True if no objects are stored
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// True if an object with `id` is stored
    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.read().contains_key(&id)
    }

    /// Number of `get` calls served
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of `put` calls served
    pub fn store_count(&self) -> u64 {
        self.stores.load(Ordering::Relaxed)
    }
}

impl Persistence for MemoryPersistence {
    fn get(&self, id: ObjectId) -> Result<Option<Object>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.objects.read().get(&id).cloned())
    }

    fn put(&self, object: Object) -> Result<()> {
        self.stores.fetch_add(1, Ordering::Relaxed);
        self.objects.write().insert(object.id(), object);
        Ok(())
    }

    fn max_object_id(&self) -> Option<ObjectId> {
        self.objects.read().keys().copied().max()
    }
}
