//! Concurrent/Multi-threaded Tests for cmoo-concurrency
//!
//! These tests verify lock behavior under actual concurrent execution:
//!
//! 1. **Mutual Exclusion** - exclusive holders never overlap
//! 2. **Fairness** - waiters are served in arrival order
//! 3. **Sharing and Upgrades** - shared runs, in-place and deferred upgrades
//! 4. **Stale Upgrades** - refused, never deadlocked or hung
//! 5. **Deadlock Resolution** - the youngest transaction on a cycle loses
//! 6. **Stress Testing** - random workloads with retry always finish
//!
//! Blocking is observed through `LocksContext::is_waiting`, so no test
//! depends on sleeping long enough.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use cmoo_concurrency::{Lock, LockOutcome, LocksContext};
use cmoo_core::{LockMode, TxIdentity};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ============================================================================
// Test Helpers
// ============================================================================

const WAIT_LIMIT: Duration = Duration::from_secs(5);

fn tx(sid: u64, cid: usize) -> TxIdentity {
    TxIdentity::new(sid, cid)
}

/// Spin until slot `cid` is parked on some lock
fn wait_until_blocked(ctx: &LocksContext, cid: usize) {
    let start = Instant::now();
    while !ctx.is_waiting(cid) {
        assert!(
            start.elapsed() < WAIT_LIMIT,
            "slot {} never blocked",
            cid
        );
        thread::sleep(Duration::from_millis(1));
    }
}

/// Acquire on a background thread, reporting the outcome through a channel
fn acquire_in_background(
    lock: &Arc<Lock>,
    mode: LockMode,
    who: TxIdentity,
) -> (Receiver<LockOutcome>, thread::JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel();
    let lock = Arc::clone(lock);
    let handle = thread::spawn(move || {
        let outcome = lock.acquire(mode, who);
        sender.send(outcome).unwrap();
    });
    (receiver, handle)
}

fn assert_still_blocked(receiver: &Receiver<LockOutcome>) {
    match receiver.recv_timeout(Duration::from_millis(30)) {
        Err(RecvTimeoutError::Timeout) => {}
        other => panic!("expected waiter to stay blocked, got {:?}", other),
    }
}

fn outcome(receiver: &Receiver<LockOutcome>) -> LockOutcome {
    receiver
        .recv_timeout(WAIT_LIMIT)
        .expect("waiter never woke up")
}

// ============================================================================
// SECTION 1: Mutual Exclusion
// ============================================================================

mod mutual_exclusion {
    use super::*;

    #[test]
    fn test_exclusive_loser_waits_for_release() {
        let ctx = LocksContext::new(2);
        let lock = Arc::new(Lock::new(&ctx));
        let a = tx(0, 0);
        let b = tx(1, 1);

        assert_eq!(lock.acquire(LockMode::Exclusive, a), LockOutcome::Taken);

        let (b_result, b_thread) = acquire_in_background(&lock, LockMode::Exclusive, b);
        wait_until_blocked(&ctx, 1);
        assert_still_blocked(&b_result);
        assert!(ctx.waits_for(1, 0));

        lock.release(a);
        assert_eq!(outcome(&b_result), LockOutcome::Taken);
        b_thread.join().unwrap();

        assert_eq!(lock.holders(), vec![b]);
        assert!(!ctx.is_waiting(1));
        assert!(!ctx.waits_for(1, 0));
        lock.release(b);
        assert!(lock.is_free());
    }

    #[test]
    fn test_racing_exclusive_requests_serialize() {
        let ctx = LocksContext::new(2);
        let lock = Arc::new(Lock::new(&ctx));
        let barrier = Arc::new(Barrier::new(2));
        let inside = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let lock = Arc::clone(&lock);
                let barrier = Arc::clone(&barrier);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    let me = tx(i as u64, i);
                    barrier.wait();
                    assert_eq!(lock.acquire(LockMode::Exclusive, me), LockOutcome::Taken);
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    thread::sleep(Duration::from_millis(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    lock.release(me);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(lock.is_free());
    }

    #[test]
    fn test_shared_waits_behind_exclusive() {
        let ctx = LocksContext::new(2);
        let lock = Arc::new(Lock::new(&ctx));

        assert_eq!(lock.acquire(LockMode::Exclusive, tx(0, 0)), LockOutcome::Taken);
        let (reader, handle) = acquire_in_background(&lock, LockMode::Shared, tx(1, 1));
        wait_until_blocked(&ctx, 1);
        assert_still_blocked(&reader);

        lock.release(tx(0, 0));
        assert_eq!(outcome(&reader), LockOutcome::Taken);
        handle.join().unwrap();
        assert_eq!(lock.mode(), Some(LockMode::Shared));
    }
}

// ============================================================================
// SECTION 2: Fairness
// ============================================================================

mod fairness {
    use super::*;

    #[test]
    fn test_exclusive_waiters_served_in_arrival_order() {
        let ctx = LocksContext::new(3);
        let lock = Arc::new(Lock::new(&ctx));
        let (a, b, c) = (tx(0, 0), tx(1, 1), tx(2, 2));

        assert_eq!(lock.acquire(LockMode::Exclusive, a), LockOutcome::Taken);
        let (b_result, b_thread) = acquire_in_background(&lock, LockMode::Exclusive, b);
        wait_until_blocked(&ctx, 1);
        let (c_result, c_thread) = acquire_in_background(&lock, LockMode::Exclusive, c);
        wait_until_blocked(&ctx, 2);

        // c waits for both groups ahead of it
        assert!(ctx.waits_for(2, 0));
        assert!(ctx.waits_for(2, 1));

        lock.release(a);
        assert_eq!(outcome(&b_result), LockOutcome::Taken);
        assert_still_blocked(&c_result);
        assert!(ctx.is_waiting(2));
        assert!(!ctx.waits_for(2, 0));

        lock.release(b);
        assert_eq!(outcome(&c_result), LockOutcome::Taken);
        b_thread.join().unwrap();
        c_thread.join().unwrap();
        assert_eq!(lock.holders(), vec![c]);
    }

    #[test]
    fn test_late_reader_does_not_overtake_queued_writer() {
        let ctx = LocksContext::new(3);
        let lock = Arc::new(Lock::new(&ctx));
        let (reader, writer, late_reader) = (tx(0, 0), tx(1, 1), tx(2, 2));

        assert_eq!(lock.acquire(LockMode::Shared, reader), LockOutcome::Taken);
        let (w_result, w_thread) = acquire_in_background(&lock, LockMode::Exclusive, writer);
        wait_until_blocked(&ctx, 1);

        let (r_result, r_thread) = acquire_in_background(&lock, LockMode::Shared, late_reader);
        wait_until_blocked(&ctx, 2);
        assert_eq!(lock.queue_len(), 3);

        lock.release(reader);
        assert_eq!(outcome(&w_result), LockOutcome::Taken);
        assert_still_blocked(&r_result);

        lock.release(writer);
        assert_eq!(outcome(&r_result), LockOutcome::Taken);
        w_thread.join().unwrap();
        r_thread.join().unwrap();
    }

    #[test]
    fn test_queued_readers_admitted_together() {
        let ctx = LocksContext::new(3);
        let lock = Arc::new(Lock::new(&ctx));

        assert_eq!(lock.acquire(LockMode::Exclusive, tx(0, 0)), LockOutcome::Taken);
        let (first, first_thread) = acquire_in_background(&lock, LockMode::Shared, tx(1, 1));
        wait_until_blocked(&ctx, 1);
        let (second, second_thread) = acquire_in_background(&lock, LockMode::Shared, tx(2, 2));
        wait_until_blocked(&ctx, 2);

        // Second reader joined the first reader's queued group
        assert_eq!(lock.queue_len(), 2);

        lock.release(tx(0, 0));
        assert_eq!(outcome(&first), LockOutcome::Taken);
        assert_eq!(outcome(&second), LockOutcome::Taken);
        first_thread.join().unwrap();
        second_thread.join().unwrap();
        assert_eq!(lock.holders().len(), 2);
        assert_eq!(lock.mode(), Some(LockMode::Shared));
    }
}

// ============================================================================
// SECTION 3: Upgrades
// ============================================================================

mod upgrades {
    use super::*;

    #[test]
    fn test_deferred_upgrade_completes_when_others_leave() {
        let ctx = LocksContext::new(2);
        let lock = Arc::new(Lock::new(&ctx));
        let (a, b) = (tx(0, 0), tx(1, 1));

        assert_eq!(lock.acquire(LockMode::Shared, a), LockOutcome::Taken);
        assert_eq!(lock.acquire(LockMode::Shared, b), LockOutcome::Taken);

        let (upgrade, handle) = acquire_in_background(&lock, LockMode::Exclusive, a);
        wait_until_blocked(&ctx, 0);
        assert!(ctx.waits_for(0, 1));
        assert!(!ctx.waits_for(0, 0));
        assert_still_blocked(&upgrade);

        lock.release(b);
        assert_eq!(outcome(&upgrade), LockOutcome::Taken);
        handle.join().unwrap();

        assert_eq!(lock.mode(), Some(LockMode::Exclusive));
        assert_eq!(lock.holders(), vec![a]);
        assert_eq!(lock.queue_len(), 1);
        lock.release(a);
        assert!(lock.is_free());
    }

    #[test]
    fn test_upgrade_behind_queued_writer_is_stale() {
        let ctx = LocksContext::new(2);
        let lock = Arc::new(Lock::new(&ctx));
        let (a, b) = (tx(0, 0), tx(1, 1));

        assert_eq!(lock.acquire(LockMode::Shared, a), LockOutcome::Taken);
        let (writer, handle) = acquire_in_background(&lock, LockMode::Exclusive, b);
        wait_until_blocked(&ctx, 1);

        assert_eq!(lock.acquire(LockMode::Exclusive, a), LockOutcome::Stale);
        // The refused upgrade leaves the shared hold in place
        assert_eq!(lock.holders(), vec![a]);
        assert_eq!(ctx.deadlocks_detected(), 0);

        lock.release(a);
        assert_eq!(outcome(&writer), LockOutcome::Taken);
        handle.join().unwrap();
    }

    #[test]
    fn test_second_upgrader_is_stale_not_deadlocked() {
        let ctx = LocksContext::new(2);
        let lock = Arc::new(Lock::new(&ctx));
        let (a, b) = (tx(0, 0), tx(1, 1));

        assert_eq!(lock.acquire(LockMode::Shared, a), LockOutcome::Taken);
        assert_eq!(lock.acquire(LockMode::Shared, b), LockOutcome::Taken);

        let (upgrade, handle) = acquire_in_background(&lock, LockMode::Exclusive, a);
        wait_until_blocked(&ctx, 0);

        assert_eq!(lock.acquire(LockMode::Exclusive, b), LockOutcome::Stale);
        lock.release(b);
        assert_eq!(outcome(&upgrade), LockOutcome::Taken);
        handle.join().unwrap();
        assert_eq!(ctx.deadlocks_detected(), 0);
    }
}

// ============================================================================
// SECTION 4: Deadlock Resolution
// ============================================================================

mod deadlocks {
    use super::*;

    /// A (sid 1) holds L1 and blocks on L2; B (sid 0) holds L2 and blocks on
    /// L1. A is younger and loses.
    #[test]
    fn test_younger_waiter_is_victim() {
        let ctx = LocksContext::new(2);
        let l1 = Arc::new(Lock::new(&ctx));
        let l2 = Arc::new(Lock::new(&ctx));
        let a = tx(1, 0);
        let b = tx(0, 1);

        assert_eq!(l1.acquire(LockMode::Exclusive, a), LockOutcome::Taken);
        assert_eq!(l2.acquire(LockMode::Exclusive, b), LockOutcome::Taken);

        let a_thread = {
            let (l1, l2) = (Arc::clone(&l1), Arc::clone(&l2));
            thread::spawn(move || {
                let result = l2.acquire(LockMode::Exclusive, a);
                // A victim must give up everything it holds
                l2.release(a);
                l1.release(a);
                result
            })
        };
        wait_until_blocked(&ctx, 0);

        let (b_result, b_thread) = acquire_in_background(&l1, LockMode::Exclusive, b);

        assert_eq!(a_thread.join().unwrap(), LockOutcome::Deadlock);
        assert_eq!(outcome(&b_result), LockOutcome::Taken);
        b_thread.join().unwrap();

        assert_eq!(ctx.deadlocks_detected(), 1);
        assert_eq!(l1.holders(), vec![b]);
        assert_eq!(l2.holders(), vec![b]);
        assert_eq!(ctx.waiting_count(), 0);
    }

    /// The transaction closing the cycle is the younger one and is refused
    /// without ever parking.
    #[test]
    fn test_blocking_transaction_can_be_victim() {
        let ctx = LocksContext::new(2);
        let l0 = Arc::new(Lock::new(&ctx));
        let l1 = Arc::new(Lock::new(&ctx));
        let older = tx(0, 0);
        let younger = tx(1, 1);

        assert_eq!(l0.acquire(LockMode::Exclusive, older), LockOutcome::Taken);
        assert_eq!(l1.acquire(LockMode::Exclusive, younger), LockOutcome::Taken);

        let (older_result, older_thread) = acquire_in_background(&l1, LockMode::Exclusive, older);
        wait_until_blocked(&ctx, 0);

        assert_eq!(l0.acquire(LockMode::Exclusive, younger), LockOutcome::Deadlock);
        assert_eq!(l0.queue_len(), 1);
        assert_still_blocked(&older_result);

        // Releasing a lock the victim never got is harmless
        l0.release(younger);
        l1.release(younger);

        assert_eq!(outcome(&older_result), LockOutcome::Taken);
        older_thread.join().unwrap();
        assert_eq!(l1.holders(), vec![older]);
    }

    #[test]
    fn test_three_way_cycle_sacrifices_youngest() {
        let ctx = LocksContext::new(3);
        let locks: Vec<Arc<Lock>> = (0..3).map(|_| Arc::new(Lock::new(&ctx))).collect();
        let txs = [tx(10, 0), tx(30, 1), tx(20, 2)];

        for (i, t) in txs.iter().enumerate() {
            assert_eq!(locks[i].acquire(LockMode::Exclusive, *t), LockOutcome::Taken);
        }

        let mut handles = Vec::new();
        for i in 0..3 {
            let own = Arc::clone(&locks[i]);
            let next = Arc::clone(&locks[(i + 1) % 3]);
            let me = txs[i];
            handles.push(thread::spawn(move || {
                let result = next.acquire(LockMode::Exclusive, me);
                if result != LockOutcome::Taken {
                    own.release(me);
                    return (me, result);
                }
                next.release(me);
                own.release(me);
                (me, result)
            }));
            if i < 2 {
                wait_until_blocked(&ctx, i);
            }
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let victims: Vec<_> = results
            .iter()
            .filter(|(_, r)| *r == LockOutcome::Deadlock)
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(victims, vec![tx(30, 1)]);
        assert!(results
            .iter()
            .filter(|(t, _)| *t != tx(30, 1))
            .all(|(_, r)| *r == LockOutcome::Taken));
        assert!(locks.iter().all(|l| l.is_free()));
    }

    #[test]
    fn test_shared_cycle_detected() {
        // Both hold a shared lock and want the other's object exclusively.
        let ctx = LocksContext::new(2);
        let l0 = Arc::new(Lock::new(&ctx));
        let l1 = Arc::new(Lock::new(&ctx));
        let older = tx(4, 0);
        let younger = tx(9, 1);

        assert_eq!(l0.acquire(LockMode::Shared, older), LockOutcome::Taken);
        assert_eq!(l1.acquire(LockMode::Shared, younger), LockOutcome::Taken);

        let (older_result, older_thread) = acquire_in_background(&l1, LockMode::Exclusive, older);
        wait_until_blocked(&ctx, 0);

        assert_eq!(l0.acquire(LockMode::Exclusive, younger), LockOutcome::Deadlock);
        l1.release(younger);
        assert_eq!(outcome(&older_result), LockOutcome::Taken);
        older_thread.join().unwrap();
        assert_eq!(l1.mode(), Some(LockMode::Exclusive));
    }
}

// ============================================================================
// SECTION 5: Stress Testing
// ============================================================================

mod stress {
    use super::*;

    /// Random multi-lock transactions with retry on Deadlock/Stale
    ///
    /// Every successful transaction checks, from the holder's side, that the
    /// lock is held the way it asked for. The test finishing at all shows no
    /// deadlock went undetected.
    #[test]
    fn test_random_workload_completes() {
        const THREADS: usize = 6;
        const LOCKS: usize = 4;
        const ROUNDS: usize = 150;

        let ctx = LocksContext::new(THREADS);
        let locks: Arc<Vec<Lock>> = Arc::new((0..LOCKS).map(|_| Lock::new(&ctx)).collect());
        let next_sid = Arc::new(AtomicU64::new(0));
        let retries = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|cid| {
                let locks = Arc::clone(&locks);
                let next_sid = Arc::clone(&next_sid);
                let retries = Arc::clone(&retries);
                thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(cid as u64);
                    let mut committed = 0;
                    while committed < ROUNDS {
                        let me = TxIdentity::new(next_sid.fetch_add(1, Ordering::SeqCst), cid);
                        let plan: Vec<(usize, LockMode)> = (0..3)
                            .map(|_| {
                                let mode = if rng.gen_bool(0.5) {
                                    LockMode::Shared
                                } else {
                                    LockMode::Exclusive
                                };
                                (rng.gen_range(0..LOCKS), mode)
                            })
                            .collect();

                        let mut strongest: Vec<Option<LockMode>> = vec![None; LOCKS];
                        let mut failed = false;
                        for (idx, mode) in &plan {
                            match locks[*idx].acquire(*mode, me) {
                                LockOutcome::Taken => {
                                    let entry = &mut strongest[*idx];
                                    if *entry != Some(LockMode::Exclusive) {
                                        *entry = Some(*mode);
                                    }
                                }
                                LockOutcome::Deadlock | LockOutcome::Stale => {
                                    failed = true;
                                    break;
                                }
                            }
                        }

                        if !failed {
                            for (idx, held) in strongest.iter().enumerate() {
                                match held {
                                    Some(LockMode::Exclusive) => {
                                        assert_eq!(locks[idx].holders(), vec![me]);
                                        assert_eq!(locks[idx].mode(), Some(LockMode::Exclusive));
                                    }
                                    Some(LockMode::Shared) => {
                                        assert!(locks[idx].holders().contains(&me));
                                    }
                                    None => {}
                                }
                            }
                            committed += 1;
                        } else {
                            retries.fetch_add(1, Ordering::Relaxed);
                        }

                        for lock in locks.iter() {
                            lock.release(me);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(locks.iter().all(|l| l.is_free()));
        assert_eq!(ctx.waiting_count(), 0);
    }
}
