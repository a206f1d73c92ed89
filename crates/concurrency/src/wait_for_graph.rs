//! Wait-for-graph and deadlock resolution
//!
//! A boolean matrix over transaction slots: `waits_for(x, y)` means the
//! transaction in slot `x` is queued behind a group containing slot `y`.
//! Alongside the matrix sits one [`WaitSlot`] per blocked transaction that
//! records who it is, which lock it is queued on and which wake signal it
//! is parked on.
//!
//! # Row ownership
//!
//! A transaction blocks on at most one lock at a time, so its row is only
//! ever written by the lock it is queued on. Edges into a node are only
//! created when that node's own row is written, which happens when it
//! blocks. A new cycle therefore always passes through the transaction
//! that just blocked, and searching from it alone is enough.
//!
//! # Victim selection
//!
//! Within a cycle the youngest member (largest sid) is sacrificed so older
//! transactions make progress. When several cycles run through the blocking
//! transaction, detection repeats after each victim is removed until no
//! cycle through it remains. Each round picks one victim.

use std::sync::Arc;

use cmoo_core::TxIdentity;
use tracing::debug;

use crate::signal::WaitSignal;

/// Bookkeeping for one blocked transaction
#[derive(Debug, Clone)]
pub(crate) struct WaitSlot {
    pub(crate) tx: TxIdentity,
    pub(crate) lock_id: u64,
    pub(crate) signal: Arc<WaitSignal>,
}

/// Wait-for-graph over `capacity` transaction slots
#[derive(Debug)]
pub struct WaitForGraph {
    capacity: usize,
    /// Row-major `capacity x capacity` matrix
    edges: Vec<bool>,
    slots: Vec<Option<WaitSlot>>,
}

impl WaitForGraph {
    /// Create an empty graph for `capacity` concurrent transactions
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            edges: vec![false; capacity * capacity],
            slots: vec![None; capacity],
        }
    }

    /// Number of transaction slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn index(&self, from: usize, to: usize) -> usize {
        from * self.capacity + to
    }

    /// True if slot `from` waits for slot `to`
    pub fn waits_for(&self, from: usize, to: usize) -> bool {
        self.edges[self.index(from, to)]
    }

    /// True if the transaction in slot `cid` is currently blocked
    pub fn is_waiting(&self, cid: usize) -> bool {
        self.slots[cid].is_some()
    }

    /// Number of blocked transactions
    pub fn waiting_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// True if slot `cid` is blocked on the lock with id `lock_id`
    pub(crate) fn is_waiting_on(&self, cid: usize, lock_id: u64) -> bool {
        matches!(&self.slots[cid], Some(slot) if slot.lock_id == lock_id)
    }

    /// Register a transaction as blocked
    pub(crate) fn enter_wait(&mut self, slot: WaitSlot) {
        let cid = slot.tx.cid();
        self.slots[cid] = Some(slot);
    }

    /// Forget a blocked transaction if it is queued on `lock_id`
    ///
    /// Clears its outgoing edges. Edges pointing at it stay: it may still
    /// hold other locks that others wait for.
    pub(crate) fn leave_wait(&mut self, cid: usize, lock_id: u64) {
        if self.is_waiting_on(cid, lock_id) {
            self.clear(cid);
        }
    }

    fn clear(&mut self, cid: usize) -> Option<WaitSlot> {
        self.clear_row(cid);
        self.slots[cid].take()
    }

    fn clear_row(&mut self, cid: usize) {
        let start = self.index(cid, 0);
        self.edges[start..start + self.capacity].fill(false);
    }

    /// Replace the outgoing edges of `cid` with edges to `targets`
    ///
    /// Self-edges are skipped; a transaction queued behind a group it is
    /// already a member of (a pending upgrade) does not wait for itself.
    pub fn set_row(&mut self, cid: usize, targets: impl IntoIterator<Item = usize>) {
        self.clear_row(cid);
        for to in targets {
            if to != cid {
                let idx = self.index(cid, to);
                self.edges[idx] = true;
            }
        }
    }

    /// Find a cycle leading from `start` back to `start`
    ///
    /// Returns the slots on the cycle in path order, beginning with `start`.
    pub fn find_cycle(&self, start: usize) -> Option<Vec<usize>> {
        let mut visited = vec![false; self.capacity];
        let mut path = vec![start];
        let mut cursor = vec![0usize];
        visited[start] = true;

        while let Some(&node) = path.last() {
            let depth = path.len() - 1;
            let mut descended = false;
            while cursor[depth] < self.capacity {
                let next = cursor[depth];
                cursor[depth] += 1;
                if !self.waits_for(node, next) {
                    continue;
                }
                if next == start {
                    return Some(path);
                }
                if !visited[next] {
                    visited[next] = true;
                    path.push(next);
                    cursor.push(0);
                    descended = true;
                    break;
                }
            }
            if !descended {
                path.pop();
                cursor.pop();
            }
        }
        None
    }

    /// Youngest transaction on `cycle`
    ///
    /// # Panics
    ///
    /// Panics if a cycle member has no wait slot. Only blocked transactions
    /// have outgoing edges, so this indicates a corrupted graph.
    pub(crate) fn choose_victim(&self, cycle: &[usize]) -> TxIdentity {
        let mut victim: Option<TxIdentity> = None;
        for &cid in cycle {
            let tx = match &self.slots[cid] {
                Some(slot) => slot.tx,
                None => panic!("wait-for-graph edge from slot {} without a waiter", cid),
            };
            victim = match victim {
                Some(current) if !tx.is_younger_than(&current) => Some(current),
                _ => Some(tx),
            };
        }
        victim.unwrap_or_else(|| panic!("empty deadlock cycle"))
    }

    /// Break every cycle through `start`
    ///
    /// Each victim is marked on its wake signal and removed from the graph.
    /// The victim wakes, withdraws from its lock queue and reports a
    /// deadlock. Returns the victims in the order they were chosen.
    pub(crate) fn resolve_deadlocks(&mut self, start: usize) -> Vec<TxIdentity> {
        let mut victims = Vec::new();
        while let Some(cycle) = self.find_cycle(start) {
            let victim = self.choose_victim(&cycle);
            debug!(
                target: "cmoo::wfg",
                cycle = ?cycle,
                victim = %victim,
                "Deadlock cycle detected"
            );
            if let Some(slot) = self.clear(victim.cid()) {
                slot.signal.mark_victim(victim.cid());
            }
            victims.push(victim);
        }
        victims
    }
}
