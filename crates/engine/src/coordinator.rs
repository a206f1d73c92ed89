//! Transaction coordinator for managing transaction lifecycle
//!
//! Hands out transaction identities and tracks store-wide counters:
//! - sid: single monotonic counter, never reused
//! - cid: lowest free concurrency slot, reused after finish
//! - Lifecycle, lock-outcome and persistence traffic metrics

use std::sync::atomic::{AtomicU64, Ordering};

use cmoo_core::TxIdentity;
use parking_lot::Mutex;

use crate::slots::SlotAllocator;

/// Identity allocation and metrics for one store
///
/// # Memory Ordering
///
/// The metric counters use Relaxed ordering. They are purely observational
/// and do not synchronize any other memory operations.
#[derive(Debug)]
pub struct TransactionCoordinator {
    next_sid: AtomicU64,
    slots: Mutex<SlotAllocator>,
    total_started: AtomicU64,
    total_finished: AtomicU64,
    deadlocks: AtomicU64,
    stale_upgrades: AtomicU64,
    loads: AtomicU64,
    created: AtomicU64,
    write_backs: AtomicU64,
    write_back_failures: AtomicU64,
}

impl TransactionCoordinator {
    /// Create a coordinator for `max_tasks` concurrent transactions
    pub fn new(max_tasks: usize) -> Self {
        Self {
            next_sid: AtomicU64::new(0),
            slots: Mutex::new(SlotAllocator::new(max_tasks)),
            total_started: AtomicU64::new(0),
            total_finished: AtomicU64::new(0),
            deadlocks: AtomicU64::new(0),
            stale_upgrades: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            created: AtomicU64::new(0),
            write_backs: AtomicU64::new(0),
            write_back_failures: AtomicU64::new(0),
        }
    }

    /// Allocate the identity of a new transaction
    ///
    /// # Panics
    ///
    /// Panics if every concurrency slot is taken. Callers bound their
    /// worker count by `max_tasks`, so this is a configuration error.
    pub fn begin(&self) -> TxIdentity {
        let cid = {
            let mut slots = self.slots.lock();
            match slots.acquire() {
                Some(cid) => cid,
                None => panic!(
                    "all {} transaction slots are in use; raise max_tasks",
                    slots.capacity()
                ),
            }
        };
        let sid = self.next_sid.fetch_add(1, Ordering::SeqCst);
        self.total_started.fetch_add(1, Ordering::Relaxed);
        TxIdentity::new(sid, cid)
    }

    /// Return `tx`'s concurrency slot
    pub fn end(&self, tx: TxIdentity) {
        self.slots.lock().release(tx.cid());
        self.total_finished.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of transactions started but not yet finished
    pub fn active_count(&self) -> usize {
        self.slots.lock().in_use()
    }

    /// Sid the next transaction will get
    pub fn next_sid(&self) -> u64 {
        self.next_sid.load(Ordering::SeqCst)
    }

    /// Record a transaction chosen as deadlock victim
    pub fn record_deadlock(&self) {
        self.deadlocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refused upgrade
    pub fn record_stale(&self) {
        self.stale_upgrades.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an object loaded from persistence
    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an object created by `make_object`
    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of writing an object back to persistence
    pub fn record_write_back(&self, ok: bool) {
        if ok {
            self.write_backs.fetch_add(1, Ordering::Relaxed);
        } else {
            self.write_back_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current snapshot of all counters
    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_count: self.active_count(),
            total_started: self.total_started.load(Ordering::Relaxed),
            total_finished: self.total_finished.load(Ordering::Relaxed),
            deadlocks: self.deadlocks.load(Ordering::Relaxed),
            stale_upgrades: self.stale_upgrades.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            write_back_failures: self.write_back_failures.load(Ordering::Relaxed),
        }
    }
}

/// Store metrics
///
/// Provides statistics about transaction lifecycle and object traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Number of currently active transactions
    pub active_count: usize,
    /// Total number of transactions started
    pub total_started: u64,
    /// Total number of transactions finished
    pub total_finished: u64,
    /// Transactions refused with a deadlock error
    pub deadlocks: u64,
    /// Transactions refused with a stale-upgrade error
    pub stale_upgrades: u64,
    /// Objects loaded from persistence on a cache miss
    pub loads: u64,
    /// Objects created by `make_object`
    pub created: u64,
    /// Objects written back to persistence
    pub write_backs: u64,
    /// Write-backs the backend rejected
    pub write_back_failures: u64,
}

impl MetricsSnapshot {
    /// Retryable failures (deadlocks plus stale upgrades)
    pub fn total_conflicts(&self) -> u64 {
        self.deadlocks + self.stale_upgrades
    }

    /// Conflicts per started transaction
    pub fn conflict_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_conflicts() as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}
