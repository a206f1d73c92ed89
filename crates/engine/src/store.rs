//! The object store
//!
//! Ties the cache, the lock layer and a persistence backend together.
//!
//! # Latch order
//!
//! ```text
//! cache latch -> lock latch -> detector latch -> wake-signal latch
//! ```
//!
//! `get_object` drops the cache latch before it acquires the object's lock,
//! since that acquire may block. `make_object` and `finish_tx` take lock
//! latches while holding the cache latch; neither blocks there, because a
//! fresh lock is always free and releasing never waits.
//!
//! # Write-back
//!
//! Objects evicted from the cache are handed to `Persistence::put` before
//! the cache latch is dropped, so a concurrent miss on the same id always
//! loads the written-back contents.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cmoo_concurrency::{Lock, LockOutcome, LocksContext};
use cmoo_core::{Error, LockMode, Object, ObjectId, Persistence, Result};
use cmoo_storage::{Cache, CacheStats, LockedObject};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::coordinator::{MetricsSnapshot, TransactionCoordinator};
use crate::transaction::StoreTransaction;

/// Shared, thread-safe object store
///
/// Share it between worker threads behind an `Arc`. Each worker runs one
/// transaction at a time; at most `max_tasks` transactions may be active.
pub struct Store {
    persistence: Arc<dyn Persistence>,
    /// The cache latch
    cache: Mutex<Cache>,
    locks: LocksContext,
    coordinator: TransactionCoordinator,
    next_oid: AtomicU64,
    config: StoreConfig,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.config)
            .field("next_oid", &self.next_oid)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Create a store for up to `max_tasks` concurrent transactions with
    /// otherwise default configuration
    ///
    /// # Panics
    ///
    /// Panics if `max_tasks` is zero.
    pub fn new(persistence: Arc<dyn Persistence>, max_tasks: usize) -> Self {
        Self::open(persistence, StoreConfig::with_max_tasks(max_tasks))
    }

    /// Create a store from a configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn with_config(persistence: Arc<dyn Persistence>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::open(persistence, config))
    }

    fn open(persistence: Arc<dyn Persistence>, config: StoreConfig) -> Self {
        let persisted_next = persistence.max_object_id().map_or(0, |max| max + 1);
        let first_oid = config.first_object_id.max(persisted_next);
        info!(
            target: "cmoo::store",
            max_tasks = config.max_tasks,
            cache_size = config.cache_size,
            first_oid,
            "Store opened"
        );
        Self {
            cache: Mutex::new(Cache::new(config.cache_size)),
            locks: LocksContext::new(config.max_tasks),
            coordinator: TransactionCoordinator::new(config.max_tasks),
            next_oid: AtomicU64::new(first_oid),
            persistence,
            config,
        }
    }

    /// Configuration the store was opened with
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The lock context shared by every object's lock
    pub fn locks(&self) -> &LocksContext {
        &self.locks
    }

    /// Id the next `make_object` will allocate
    pub fn next_object_id(&self) -> ObjectId {
        self.next_oid.load(Ordering::SeqCst)
    }

    /// Lifecycle and traffic counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.coordinator.metrics()
    }

    /// Cache counters and table shape
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// Begin a transaction
    ///
    /// # Panics
    ///
    /// Panics if `max_tasks` transactions are already active.
    pub fn start_tx(&self) -> StoreTransaction {
        let identity = self.coordinator.begin();
        debug!(target: "cmoo::store", tx = %identity, "Transaction started");
        StoreTransaction::new(identity)
    }

    /// Fetch object `id` for reading
    ///
    /// Serves the object from the cache or loads it from persistence, then
    /// takes its lock in shared mode. The handle is recorded on `tx` even
    /// when the lock is refused, so `finish_tx` still gives back the pin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Deadlock`] or [`Error::Stale`] when the lock is
    /// refused; finish the transaction and retry the work. Backend failures
    /// propagate unchanged.
    ///
    /// # Panics
    ///
    /// Panics if persistence has no object with this id.
    pub fn get_object(&self, tx: &mut StoreTransaction, id: ObjectId) -> Result<Arc<LockedObject>> {
        let object = {
            let mut cache = self.cache.lock();
            match cache.get(id) {
                Some(object) => object,
                None => {
                    let loaded = match self.persistence.get(id)? {
                        Some(loaded) => loaded,
                        None => panic!("object {} is referenced but missing from persistence", id),
                    };
                    let object = Arc::new(LockedObject::new(loaded, Lock::new(&self.locks)));
                    cache.put(Arc::clone(&object));
                    self.coordinator.record_load();
                    debug!(target: "cmoo::store", tx = %tx.identity(), id, "Loaded object");
                    object
                }
            }
        };

        tx.record(Arc::clone(&object));
        self.lock_object(tx, &object, LockMode::Shared)?;
        Ok(object)
    }

    /// Take the exclusive lock on an object the transaction already fetched
    ///
    /// Upgrades a shared hold in place when possible, otherwise waits for
    /// the other holders to leave.
    ///
    /// # Errors
    ///
    /// Same as [`get_object`](Self::get_object): a refused lock is
    /// [`Error::Deadlock`] or [`Error::Stale`].
    pub fn lock_exclusive(&self, tx: &StoreTransaction, object: &LockedObject) -> Result<()> {
        self.lock_object(tx, object, LockMode::Exclusive)
    }

    fn lock_object(&self, tx: &StoreTransaction, object: &LockedObject, mode: LockMode) -> Result<()> {
        match object.lock().acquire(mode, tx.identity()) {
            LockOutcome::Taken => Ok(()),
            LockOutcome::Deadlock => {
                self.coordinator.record_deadlock();
                warn!(target: "cmoo::store", tx = %tx.identity(), id = object.id(), "Deadlock victim");
                Err(Error::Deadlock {
                    sid: tx.sid(),
                    object: object.id(),
                })
            }
            LockOutcome::Stale => {
                self.coordinator.record_stale();
                Err(Error::Stale {
                    sid: tx.sid(),
                    object: object.id(),
                })
            }
        }
    }

    /// Create a new object whose only parent is `parent`
    ///
    /// The object is born exclusively locked by `tx` and pinned in the
    /// cache. It reaches persistence when it is evicted or flushed.
    pub fn make_object(&self, tx: &mut StoreTransaction, parent: ObjectId) -> Arc<LockedObject> {
        let object = {
            let mut cache = self.cache.lock();
            let id = self.next_oid.fetch_add(1, Ordering::SeqCst);
            let lock = Lock::new(&self.locks);
            match lock.acquire(LockMode::Exclusive, tx.identity()) {
                LockOutcome::Taken => {}
                other => unreachable!("fresh lock for object {} refused: {:?}", id, other),
            }
            let object = Arc::new(LockedObject::new(Object::with_parent(id, parent), lock));
            cache.put(Arc::clone(&object));
            object
        };

        self.coordinator.record_created();
        debug!(target: "cmoo::store", tx = %tx.identity(), id = object.id(), parent, "Created object");
        tx.record(Arc::clone(&object));
        object
    }

    /// Finish a transaction, releasing every lock and pin it holds
    ///
    /// Objects the cache evicts as a result are written back to
    /// persistence. A failed write-back is logged and counted; the
    /// transaction still finishes.
    pub fn finish_tx(&self, mut tx: StoreTransaction) {
        let identity = tx.identity();
        let objects = tx.take_objects();
        {
            let mut cache = self.cache.lock();
            for object in &objects {
                object.lock().release(identity);
            }
            let mut evicted = Vec::new();
            for object in &objects {
                evicted.extend(cache.release(object));
            }
            for object in &evicted {
                self.write_back(object);
            }
        }
        self.coordinator.end(identity);
        tx.mark_finished();
        debug!(target: "cmoo::store", tx = %identity, objects = objects.len(), "Transaction finished");
    }

    /// Write every resident object back to persistence
    ///
    /// Meant for quiescent points such as shutdown; contents being changed
    /// under an exclusive lock at the same time may be written half done.
    /// Returns the number of objects written.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first backend failure.
    pub fn flush(&self) -> Result<usize> {
        let cache = self.cache.lock();
        let mut written = 0;
        for object in cache.iter() {
            self.persistence.put(object.snapshot())?;
            written += 1;
        }
        info!(target: "cmoo::store", written, "Flushed resident objects");
        Ok(written)
    }

    fn write_back(&self, object: &LockedObject) {
        match self.persistence.put(object.snapshot()) {
            Ok(()) => self.coordinator.record_write_back(true),
            Err(e) => {
                self.coordinator.record_write_back(false);
                error!(target: "cmoo::store", id = object.id(), error = %e, "Write-back failed");
            }
        }
    }
}
