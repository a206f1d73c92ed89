//! Per-wait-group wake signal
//!
//! Every member of a waiting group parks on the group's signal. The lock
//! grants the signal when the group becomes head; the deadlock detector
//! marks individual members as victims. The signal latch is a leaf: nothing
//! else is acquired while holding it.

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

/// Why a parked waiter woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Granted,
    Victim,
}

#[derive(Debug, Default)]
struct SignalState {
    granted: bool,
    /// cids designated as deadlock victims while parked here
    victims: SmallVec<[usize; 2]>,
}

#[derive(Debug, Default)]
pub(crate) struct WaitSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl WaitSignal {
    /// Signal for a group that still has to wait
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Signal for a group that is head on creation
    pub(crate) fn granted() -> Self {
        let signal = Self::default();
        signal.state.lock().granted = true;
        signal
    }

    pub(crate) fn is_granted(&self) -> bool {
        self.state.lock().granted
    }

    pub(crate) fn grant(&self) {
        let mut state = self.state.lock();
        state.granted = true;
        self.cond.notify_all();
    }

    pub(crate) fn mark_victim(&self, cid: usize) {
        let mut state = self.state.lock();
        if !state.victims.contains(&cid) {
            state.victims.push(cid);
        }
        self.cond.notify_all();
    }

    /// Park until the group is granted or `cid` is marked as a victim
    ///
    /// A victim mark wins over a grant that raced with it.
    pub(crate) fn wait(&self, cid: usize) -> Wake {
        let mut state = self.state.lock();
        loop {
            if state.victims.contains(&cid) {
                return Wake::Victim;
            }
            if state.granted {
                return Wake::Granted;
            }
            self.cond.wait(&mut state);
        }
    }
}
