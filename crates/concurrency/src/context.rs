//! Shared deadlock-detection context for a family of locks
//!
//! Every [`Lock`](crate::Lock) built from the same `LocksContext` shares one
//! wait-for-graph, so cycles spanning several objects are visible. The
//! context is cheap to clone; clones refer to the same graph.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::wait_for_graph::WaitForGraph;

#[derive(Debug)]
struct ContextInner {
    max_tasks: usize,
    /// The detector latch
    graph: Mutex<WaitForGraph>,
    next_lock_id: AtomicU64,
    deadlocks: AtomicU64,
}

/// Shared state of all locks that can deadlock with each other
///
/// Bounds concurrency to `max_tasks` simultaneous transactions: every
/// transaction identity used with these locks must have a cid below it.
#[derive(Debug, Clone)]
pub struct LocksContext {
    inner: Arc<ContextInner>,
}

impl LocksContext {
    /// Create a context for up to `max_tasks` concurrent transactions
    ///
    /// # Panics
    ///
    /// Panics if `max_tasks` is zero.
    pub fn new(max_tasks: usize) -> Self {
        assert!(max_tasks > 0, "LocksContext needs at least one task slot");
        Self {
            inner: Arc::new(ContextInner {
                max_tasks,
                graph: Mutex::new(WaitForGraph::new(max_tasks)),
                next_lock_id: AtomicU64::new(0),
                deadlocks: AtomicU64::new(0),
            }),
        }
    }

    /// Maximum number of concurrent transactions
    pub fn max_tasks(&self) -> usize {
        self.inner.max_tasks
    }

    /// True if the transaction in slot `cid` is blocked on some lock
    pub fn is_waiting(&self, cid: usize) -> bool {
        self.inner.graph.lock().is_waiting(cid)
    }

    /// True if slot `from` currently waits for slot `to`
    pub fn waits_for(&self, from: usize, to: usize) -> bool {
        self.inner.graph.lock().waits_for(from, to)
    }

    /// Number of currently blocked transactions
    pub fn waiting_count(&self) -> usize {
        self.inner.graph.lock().waiting_count()
    }

    /// Total deadlock victims chosen since creation
    pub fn deadlocks_detected(&self) -> u64 {
        self.inner.deadlocks.load(Ordering::Relaxed)
    }

    /// Acquire the detector latch
    ///
    /// Callers may hold a lock latch; the reverse order is forbidden.
    pub(crate) fn graph(&self) -> MutexGuard<'_, WaitForGraph> {
        self.inner.graph.lock()
    }

    pub(crate) fn allocate_lock_id(&self) -> u64 {
        self.inner.next_lock_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn record_deadlocks(&self, count: usize) {
        self.inner
            .deadlocks
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}
