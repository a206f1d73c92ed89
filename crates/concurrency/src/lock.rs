//! Fair, reentrant, upgradeable shared/exclusive lock
//!
//! A lock is a FIFO queue of wait groups. The head group holds the lock;
//! every later group waits for all groups ahead of it. Shared requests join
//! the tail group when it is shared, so a run of readers is admitted
//! together. Nothing else may overtake an earlier request.
//!
//! ## Acquire
//!
//! ```text
//! no groups                          -> new head {tx}, Taken
//! tx in head, head mode covers mode  -> Taken (reentrant)
//! Shared, tail is Shared             -> join tail; Taken if tail is head,
//!                                       else block
//! Exclusive, tx in Shared head:
//!   head == tail, tx alone           -> promote head in place, Taken
//!   head == tail, others present     -> append {tx} Exclusive, block
//!   head != tail                     -> Stale
//! otherwise                          -> append {tx}, block
//! ```
//!
//! Before blocking, the transaction's wait-for edges are written and the
//! detector runs. A blocked acquire returns `Taken` when its group reaches
//! the head, or `Deadlock` when it is chosen as a victim.
//!
//! ## Release
//!
//! Removes the transaction from the head group. An empty head is dropped
//! and the next group promoted. A shared head shrunk to `{y}` followed by an
//! exclusive `{y}` completes y's pending upgrade. Releasing a lock the
//! transaction does not hold is a no-op.

use std::collections::VecDeque;
use std::sync::Arc;

use cmoo_core::{LockMode, TxIdentity};
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::context::LocksContext;
use crate::signal::{WaitSignal, Wake};
use crate::wait_for_graph::{WaitForGraph, WaitSlot};

/// Result of [`Lock::acquire`]
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The lock is held in (at least) the requested mode
    Taken,
    /// The transaction was chosen to break a deadlock and has been removed
    /// from the queue
    Deadlock,
    /// A shared to exclusive upgrade was refused because another exclusive
    /// request is already queued
    Stale,
}

impl LockOutcome {
    /// True for [`LockOutcome::Taken`]
    pub fn is_taken(self) -> bool {
        self == LockOutcome::Taken
    }
}

#[derive(Debug)]
struct WaitGroup {
    mode: LockMode,
    members: SmallVec<[TxIdentity; 4]>,
    signal: Arc<WaitSignal>,
}

impl WaitGroup {
    fn head(mode: LockMode, tx: TxIdentity) -> Self {
        Self {
            mode,
            members: smallvec::smallvec![tx],
            signal: Arc::new(WaitSignal::granted()),
        }
    }

    fn waiting(mode: LockMode, tx: TxIdentity) -> Self {
        Self {
            mode,
            members: smallvec::smallvec![tx],
            signal: Arc::new(WaitSignal::new()),
        }
    }

    fn contains(&self, tx: TxIdentity) -> bool {
        self.members.contains(&tx)
    }

    fn remove(&mut self, tx: TxIdentity) -> bool {
        match self.members.iter().position(|m| *m == tx) {
            Some(pos) => {
                self.members.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Shared group with exactly `tx` left in it
    fn is_sole_shared(&self) -> Option<TxIdentity> {
        if self.mode == LockMode::Shared && self.members.len() == 1 {
            Some(self.members[0])
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct LockState {
    groups: VecDeque<WaitGroup>,
}

/// Per-object lock
///
/// Cheap to create; all deadlock bookkeeping lives in the shared
/// [`LocksContext`].
#[derive(Debug)]
pub struct Lock {
    id: u64,
    context: LocksContext,
    /// The lock latch, guarding the wait-group chain
    state: Mutex<LockState>,
}

impl Lock {
    /// Create an unheld lock bound to `context`
    pub fn new(context: &LocksContext) -> Self {
        Self {
            id: context.allocate_lock_id(),
            context: context.clone(),
            state: Mutex::new(LockState::default()),
        }
    }

    /// Identifier of this lock within its context
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Transactions currently holding the lock
    pub fn holders(&self) -> Vec<TxIdentity> {
        let state = self.state.lock();
        state
            .groups
            .front()
            .map(|head| head.members.to_vec())
            .unwrap_or_default()
    }

    /// Mode the lock is currently held in, `None` if free
    pub fn mode(&self) -> Option<LockMode> {
        self.state.lock().groups.front().map(|head| head.mode)
    }

    /// Number of wait groups, including the head
    pub fn queue_len(&self) -> usize {
        self.state.lock().groups.len()
    }

    /// True if nobody holds or waits for the lock
    pub fn is_free(&self) -> bool {
        self.state.lock().groups.is_empty()
    }

    /// Acquire the lock in `mode` for `tx`, blocking if it conflicts
    ///
    /// # Panics
    ///
    /// Panics if `tx.cid()` is not below the context's `max_tasks`.
    pub fn acquire(&self, mode: LockMode, tx: TxIdentity) -> LockOutcome {
        assert!(
            tx.cid() < self.context.max_tasks(),
            "{} exceeds the {} task slots of its locks context",
            tx,
            self.context.max_tasks()
        );

        let mut state = self.state.lock();

        if state.groups.is_empty() {
            state.groups.push_back(WaitGroup::head(mode, tx));
            trace!(target: "cmoo::lock", lock = self.id, %tx, %mode, "Lock taken uncontended");
            return LockOutcome::Taken;
        }

        let head = &state.groups[0];
        let in_head = head.contains(tx);
        if in_head && head.mode.covers(mode) {
            return LockOutcome::Taken;
        }

        let tail = state.groups.len() - 1;

        if mode == LockMode::Shared && state.groups[tail].mode == LockMode::Shared {
            state.groups[tail].members.push(tx);
            if tail == 0 {
                trace!(target: "cmoo::lock", lock = self.id, %tx, "Joined shared holders");
                return LockOutcome::Taken;
            }
            let signal = Arc::clone(&state.groups[tail].signal);
            return self.block(state, tx, mode, signal);
        }

        // Reaching here with tx in the head means an upgrade of a shared hold.
        if in_head {
            if tail != 0 {
                warn!(target: "cmoo::lock", lock = self.id, %tx, "Stale upgrade refused");
                return LockOutcome::Stale;
            }
            if state.groups[0].members.len() == 1 {
                state.groups[0].mode = LockMode::Exclusive;
                trace!(target: "cmoo::lock", lock = self.id, %tx, "Upgraded in place");
                return LockOutcome::Taken;
            }
        }

        let group = WaitGroup::waiting(mode, tx);
        let signal = Arc::clone(&group.signal);
        state.groups.push_back(group);
        self.block(state, tx, mode, signal)
    }

    /// Release `tx`'s hold on the lock
    ///
    /// A no-op if `tx` is not among the holders.
    pub fn release(&self, tx: TxIdentity) {
        let mut state = self.state.lock();
        let held = match state.groups.front_mut() {
            Some(head) => head.remove(tx),
            None => false,
        };
        if !held {
            trace!(target: "cmoo::lock", lock = self.id, %tx, "Release of unheld lock ignored");
            return;
        }
        trace!(target: "cmoo::lock", lock = self.id, %tx, "Lock released");
        let mut graph = self.context.graph();
        self.settle(&mut state, &mut graph);
    }

    /// Register `tx` as blocked, run detection, then park
    fn block(
        &self,
        state: MutexGuard<'_, LockState>,
        tx: TxIdentity,
        mode: LockMode,
        signal: Arc<WaitSignal>,
    ) -> LockOutcome {
        {
            let mut graph = self.context.graph();
            graph.enter_wait(WaitSlot {
                tx,
                lock_id: self.id,
                signal: Arc::clone(&signal),
            });
            self.refresh_edges(&state, &mut graph);
            let victims = graph.resolve_deadlocks(tx.cid());
            if !victims.is_empty() {
                self.context.record_deadlocks(victims.len());
                for victim in &victims {
                    warn!(
                        target: "cmoo::lock",
                        lock = self.id,
                        blocked = %tx,
                        victim = %victim,
                        "Deadlock victim chosen"
                    );
                }
            }
        }
        trace!(target: "cmoo::lock", lock = self.id, %tx, %mode, "Blocking");
        drop(state);

        match signal.wait(tx.cid()) {
            Wake::Granted => {
                trace!(target: "cmoo::lock", lock = self.id, %tx, %mode, "Lock granted after wait");
                LockOutcome::Taken
            }
            Wake::Victim => {
                let mut state = self.state.lock();
                self.withdraw(&mut state, tx, &signal);
                LockOutcome::Deadlock
            }
        }
    }

    /// Remove a deadlock victim from the group it was parked in
    fn withdraw(&self, state: &mut LockState, tx: TxIdentity, signal: &Arc<WaitSignal>) {
        match state
            .groups
            .iter()
            .position(|g| Arc::ptr_eq(&g.signal, signal))
        {
            Some(idx) => {
                state.groups[idx].remove(tx);
                if idx > 0 && state.groups[idx].members.is_empty() {
                    state.groups.remove(idx);
                }
            }
            // Its shared group was merged into the head before it woke.
            None => {
                if let Some(head) = state.groups.front_mut() {
                    head.remove(tx);
                }
            }
        }
        let mut graph = self.context.graph();
        graph.leave_wait(tx.cid(), self.id);
        self.settle(state, &mut graph);
    }

    /// Restore queue invariants after a member left, then grant the head
    fn settle(&self, state: &mut LockState, graph: &mut WaitForGraph) {
        loop {
            let Some(head) = state.groups.front() else {
                break;
            };
            if head.members.is_empty() {
                state.groups.pop_front();
                continue;
            }
            if let (Some(sole), Some(next)) = (head.is_sole_shared(), state.groups.get(1)) {
                if next.mode == LockMode::Exclusive
                    && next.members.len() == 1
                    && next.members[0] == sole
                {
                    trace!(target: "cmoo::lock", lock = self.id, tx = %sole, "Deferred upgrade completed");
                    state.groups.pop_front();
                    continue;
                }
            }
            break;
        }

        // Shared groups queued right behind a shared head are compatible
        // with it. They only become adjacent when a group between them was
        // withdrawn.
        while state.groups.len() > 1
            && state.groups[0].mode == LockMode::Shared
            && state.groups[1].mode == LockMode::Shared
        {
            if let Some(next) = state.groups.remove(1) {
                for member in &next.members {
                    graph.leave_wait(member.cid(), self.id);
                    if !state.groups[0].contains(*member) {
                        state.groups[0].members.push(*member);
                    }
                }
                next.signal.grant();
            }
        }

        if let Some(head) = state.groups.front() {
            if !head.signal.is_granted() {
                for member in &head.members {
                    graph.leave_wait(member.cid(), self.id);
                }
                head.signal.grant();
            }
        }

        self.refresh_edges(state, graph);
    }

    /// Rewrite the wait-for rows of every transaction queued on this lock
    ///
    /// A waiter waits for every member of every group ahead of its own.
    fn refresh_edges(&self, state: &LockState, graph: &mut WaitForGraph) {
        let mut ahead: SmallVec<[usize; 8]> = SmallVec::new();
        for (idx, group) in state.groups.iter().enumerate() {
            if idx > 0 {
                for member in &group.members {
                    if graph.is_waiting_on(member.cid(), self.id) {
                        graph.set_row(member.cid(), ahead.iter().copied());
                    }
                }
            }
            ahead.extend(group.members.iter().map(|m| m.cid()));
        }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.groups.is_empty() {
            warn!(
                target: "cmoo::lock",
                lock = self.id,
                groups = state.groups.len(),
                "Lock dropped while held"
            );
        }
    }
}
