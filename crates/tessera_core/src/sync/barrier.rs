//! # Phase Barrier
//!
//! Reusable N-party rendezvous ("all workers finished epoch k").
//!
//! The barrier trips when the `parties`-th caller arrives. Arrivals and the
//! trip are recorded under one lock, so no caller can leave before the last
//! arrival is counted. Exactly one caller per generation is the leader.

use parking_lot::{Condvar, Mutex};

use crate::error::{SyncError, SyncResult};

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
}

/// Barrier for N-way rendezvous.
#[derive(Debug)]
pub struct PhaseBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl PhaseBarrier {
    /// Creates a barrier that trips when `parties` callers have arrived.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidParties`] if `parties == 0`.
    pub fn new(parties: usize) -> SyncResult<Self> {
        if parties == 0 {
            return Err(SyncError::InvalidParties);
        }
        tracing::debug!(parties, "phase barrier created");
        Ok(Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            cvar: Condvar::new(),
        })
    }

    /// Number of parties required to trip the barrier.
    #[must_use]
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Number of times the barrier has tripped.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Blocks until `parties` callers (this one included) have arrived.
    pub fn wait(&self) -> BarrierWaitResult {
        let mut state = self.state.lock();
        let local_gen = state.generation;
        state.arrived += 1;

        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            tracing::trace!(generation = state.generation, "barrier tripped");
            self.cvar.notify_all();
            return BarrierWaitResult { is_leader: true };
        }

        // Generation changes only on a trip, so a spurious wakeup re-waits.
        while state.generation == local_gen {
            self.cvar.wait(&mut state);
        }
        BarrierWaitResult { is_leader: false }
    }
}

/// Result of a barrier wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    is_leader: bool,
}

impl BarrierWaitResult {
    /// True for exactly one party (the last to arrive) each generation.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.is_leader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_zero_parties_rejected() {
        assert_eq!(PhaseBarrier::new(0).unwrap_err(), SyncError::InvalidParties);
    }

    #[test]
    fn test_single_party_never_blocks() {
        let barrier = PhaseBarrier::new(1).unwrap();
        for _ in 0..3 {
            assert!(barrier.wait().is_leader());
        }
        assert_eq!(barrier.generation(), 3);
    }

    #[test]
    fn test_nobody_passes_before_last_arrival() {
        let parties = 6;
        let barrier = Arc::new(PhaseBarrier::new(parties).unwrap());
        let arrived = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..parties)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                let arrived = Arc::clone(&arrived);
                thread::spawn(move || {
                    // Stagger arrivals so early parties really block.
                    thread::sleep(Duration::from_millis(5 * i as u64));
                    arrived.fetch_add(1, Ordering::SeqCst);
                    let result = barrier.wait();
                    assert_eq!(arrived.load(Ordering::SeqCst), parties);
                    result.is_leader()
                })
            })
            .collect();

        let leaders = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&leader| leader)
            .count();
        assert_eq!(leaders, 1);
    }

    #[test]
    fn test_reusable_across_phases() {
        let parties = 4;
        let phases = 50;
        let barrier = PhaseBarrier::new(parties).unwrap();
        let phase_counter = AtomicUsize::new(0);
        let leaders = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..parties {
                s.spawn(|| {
                    for phase in 0..phases {
                        phase_counter.fetch_add(1, Ordering::SeqCst);
                        if barrier.wait().is_leader() {
                            leaders.fetch_add(1, Ordering::SeqCst);
                        }
                        // Everyone from this phase has arrived; nobody from
                        // the next phase can have passed the next wait yet.
                        let seen = phase_counter.load(Ordering::SeqCst);
                        assert!(seen >= (phase + 1) * parties);
                        assert!(seen <= (phase + 2) * parties);
                        barrier.wait();
                    }
                });
            }
        });

        assert_eq!(leaders.load(Ordering::SeqCst), phases);
        assert_eq!(barrier.generation(), (phases * 2) as u64);
    }

    #[test]
    fn test_fence_visibility_through_barrier() {
        use crate::sync::fence::{acquire_fence, release_fence};
        use std::sync::atomic::AtomicI32;

        let parties = 8;
        let barrier = PhaseBarrier::new(parties).unwrap();
        let value = AtomicI32::new(0);

        thread::scope(|s| {
            for id in 0..parties {
                let barrier = &barrier;
                let value = &value;
                s.spawn(move || {
                    if id == 0 {
                        value.store(42, Ordering::Relaxed);
                        release_fence();
                    }
                    barrier.wait();
                    acquire_fence();
                    assert_eq!(value.load(Ordering::Relaxed), 42);
                });
            }
        });
    }
}
