//! Pinning LRU cache of locked objects
//!
//! # Design
//!
//! - Hash table with separate chaining; bucket = `id mod bucket_count`
//! - Entries live in a slab and are linked by index, so an entry can sit on
//!   its bucket chain and on the recency list at the same time
//! - Recency list holds exactly the unpinned entries, newest at the front
//! - Pinned entries are never evicted
//!
//! # Sizing
//!
//! The table doubles and fully rehashes when more than 70% of its buckets
//! are occupied. Unpinned entries are evicted, least recently released
//! first, while the cache holds more than two entries per bucket.
//!
//! The cache is not synchronized. The store keeps it behind its cache
//! latch.

use std::sync::Arc;

use cmoo_core::ObjectId;
use tracing::{debug, warn};

use crate::locked::LockedObject;

/// Resize once occupied buckets exceed `LOAD_FACTOR_NUM / LOAD_FACTOR_DEN`
const LOAD_FACTOR_NUM: usize = 7;
const LOAD_FACTOR_DEN: usize = 10;
/// Table growth on resize
const GROW_FACTOR: usize = 2;
/// Evict while entries exceed this many per bucket
const CHAIN_FACTOR: usize = 2;

/// Cache counters and shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found the object
    pub hits: u64,
    /// Lookups that did not
    pub misses: u64,
    /// Entries evicted from the recency list
    pub evictions: u64,
    /// Table resizes
    pub resizes: u64,
    /// Resident entries, pinned or not
    pub entries: usize,
    /// Entries on the recency list
    pub unpinned: usize,
    /// Table size
    pub buckets: usize,
    /// Buckets with at least one entry
    pub occupied: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, 0.0 before the first lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug)]
struct Entry {
    object: Arc<LockedObject>,
    /// Next entry in the same bucket
    chain_next: Option<usize>,
    /// Recency neighbours, only meaningful while unpinned
    newer: Option<usize>,
    older: Option<usize>,
}

/// Map from object id to its [`LockedObject`]
#[derive(Debug)]
pub struct Cache {
    buckets: Vec<Option<usize>>,
    slab: Vec<Option<Entry>>,
    free: Vec<usize>,
    newest: Option<usize>,
    oldest: Option<usize>,
    entries: usize,
    unpinned: usize,
    occupied: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    resizes: u64,
}

impl Cache {
    /// Create an empty cache with `initial_size` buckets (at least one)
    pub fn new(initial_size: usize) -> Self {
        Self {
            buckets: vec![None; initial_size.max(1)],
            slab: Vec::new(),
            free: Vec::new(),
            newest: None,
            oldest: None,
            entries: 0,
            unpinned: 0,
            occupied: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            resizes: 0,
        }
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.entries
    }

    /// True if nothing is resident
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Current table size
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// True if `id` is resident. Does not pin.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.find(id).is_some()
    }

    /// Counters and table shape
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            resizes: self.resizes,
            entries: self.entries,
            unpinned: self.unpinned,
            buckets: self.buckets.len(),
            occupied: self.occupied,
        }
    }

    /// Every resident object, in no particular order. Does not pin.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<LockedObject>> + '_ {
        self.slab.iter().flatten().map(|entry| &entry.object)
    }

    /// Look up `id`, pinning the entry on a hit
    pub fn get(&mut self, id: ObjectId) -> Option<Arc<LockedObject>> {
        let Some(idx) = self.find(id) else {
            self.misses += 1;
            return None;
        };
        self.hits += 1;
        if self.entry(idx).object.pin() == 0 {
            self.lru_unlink(idx);
        }
        Some(Arc::clone(&self.entry(idx).object))
    }

    /// Insert a freshly created object, pinned once
    ///
    /// # Panics
    ///
    /// Panics if an object with the same id is already resident.
    pub fn put(&mut self, object: Arc<LockedObject>) {
        let id = object.id();
        assert!(self.find(id).is_none(), "object {} is already cached", id);

        object.pin();
        let bucket = self.bucket_of(id);
        let head = self.buckets[bucket];
        let idx = self.alloc(Entry {
            object,
            chain_next: head,
            newer: None,
            older: None,
        });
        self.buckets[bucket] = Some(idx);
        if head.is_none() {
            self.occupied += 1;
        }
        self.entries += 1;

        if self.occupied * LOAD_FACTOR_DEN > self.buckets.len() * LOAD_FACTOR_NUM {
            self.resize(self.buckets.len() * GROW_FACTOR);
        }
    }

    /// Drop one pin on `object`
    ///
    /// The last pin moves it to the newest end of the recency list. Then
    /// unpinned entries are evicted, oldest first, while the cache is over
    /// its chain budget. Returns the evicted objects so the caller can hand
    /// them back to persistence.
    ///
    /// # Panics
    ///
    /// Panics if `object` is resident but not pinned.
    pub fn release(&mut self, object: &LockedObject) -> Vec<Arc<LockedObject>> {
        let Some(idx) = self.find(object.id()) else {
            warn!(target: "cmoo::cache", id = object.id(), "Release of object that is not cached");
            return Vec::new();
        };
        debug_assert!(std::ptr::eq(
            Arc::as_ptr(&self.entry(idx).object),
            object as *const LockedObject
        ));

        if self.entry(idx).object.unpin() == 0 {
            self.lru_push_newest(idx);
        }
        self.evict_excess()
    }

    fn evict_excess(&mut self) -> Vec<Arc<LockedObject>> {
        let mut evicted = Vec::new();
        while self.entries > CHAIN_FACTOR * self.buckets.len() {
            let Some(idx) = self.oldest else {
                break;
            };
            self.lru_unlink(idx);
            self.chain_unlink(idx);
            if let Some(entry) = self.slab[idx].take() {
                self.free.push(idx);
                evicted.push(entry.object);
            }
            self.entries -= 1;
            self.evictions += 1;
        }
        if !evicted.is_empty() {
            debug!(
                target: "cmoo::cache",
                count = evicted.len(),
                entries = self.entries,
                "Evicted unpinned objects"
            );
        }
        evicted
    }

    /// Grow the table to `new_size` buckets and rehash every entry
    fn resize(&mut self, new_size: usize) {
        let mut buckets: Vec<Option<usize>> = vec![None; new_size];
        let mut occupied = 0;
        for idx in 0..self.slab.len() {
            let id = match &self.slab[idx] {
                Some(entry) => entry.object.id(),
                None => continue,
            };
            let bucket = (id % new_size as u64) as usize;
            if buckets[bucket].is_none() {
                occupied += 1;
            }
            self.entry_mut(idx).chain_next = buckets[bucket];
            buckets[bucket] = Some(idx);
        }
        debug!(
            target: "cmoo::cache",
            from = self.buckets.len(),
            to = new_size,
            entries = self.entries,
            "Cache table resized"
        );
        self.buckets = buckets;
        self.occupied = occupied;
        self.resizes += 1;
    }

    #[inline]
    fn bucket_of(&self, id: ObjectId) -> usize {
        (id % self.buckets.len() as u64) as usize
    }

    fn find(&self, id: ObjectId) -> Option<usize> {
        let mut cursor = self.buckets[self.bucket_of(id)];
        while let Some(idx) = cursor {
            let entry = self.entry(idx);
            if entry.object.id() == id {
                return Some(idx);
            }
            cursor = entry.chain_next;
        }
        None
    }

    fn alloc(&mut self, entry: Entry) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slab[idx] = Some(entry);
                idx
            }
            None => {
                self.slab.push(Some(entry));
                self.slab.len() - 1
            }
        }
    }

    fn entry(&self, idx: usize) -> &Entry {
        match &self.slab[idx] {
            Some(entry) => entry,
            None => unreachable!("cache link to vacant slot {}", idx),
        }
    }

    fn entry_mut(&mut self, idx: usize) -> &mut Entry {
        match &mut self.slab[idx] {
            Some(entry) => entry,
            None => unreachable!("cache link to vacant slot {}", idx),
        }
    }

    fn lru_push_newest(&mut self, idx: usize) {
        let previous = self.newest;
        {
            let entry = self.entry_mut(idx);
            entry.newer = None;
            entry.older = previous;
        }
        match previous {
            Some(prev) => self.entry_mut(prev).newer = Some(idx),
            None => self.oldest = Some(idx),
        }
        self.newest = Some(idx);
        self.unpinned += 1;
    }

    fn lru_unlink(&mut self, idx: usize) {
        let (newer, older) = {
            let entry = self.entry_mut(idx);
            (entry.newer.take(), entry.older.take())
        };
        match newer {
            Some(n) => self.entry_mut(n).older = older,
            None => self.newest = older,
        }
        match older {
            Some(o) => self.entry_mut(o).newer = newer,
            None => self.oldest = newer,
        }
        self.unpinned -= 1;
    }

    fn chain_unlink(&mut self, idx: usize) {
        let bucket = self.bucket_of(self.entry(idx).object.id());
        let next = self.entry(idx).chain_next;
        if self.buckets[bucket] == Some(idx) {
            self.buckets[bucket] = next;
            if next.is_none() {
                self.occupied -= 1;
            }
            return;
        }
        let mut cursor = self.buckets[bucket];
        while let Some(current) = cursor {
            let after = self.entry(current).chain_next;
            if after == Some(idx) {
                self.entry_mut(current).chain_next = next;
                return;
            }
            cursor = after;
        }
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        let pinned = self.entries - self.unpinned;
        if pinned > 0 {
            warn!(target: "cmoo::cache", pinned, "Cache dropped with pinned objects");
        }
    }
}
