//! # Training Integration Tests
//!
//! Full training sessions through the public driver API, plus the layer
//! context and subsystem locks driven directly the way a framework would.
//!
//! Run with: cargo test -p tessera --test training_integration

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use tessera::core::{LayerSync, PhaseBarrier, Subsystem, SubsystemLocks, SyncConfig};
use tessera::{train, Step, TrainingPlan};

const WATCHDOG: Duration = Duration::from_secs(20);

/// Runs `f` on its own thread and fails the test if it has not finished
/// within the watchdog.
fn within_watchdog<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(WATCHDOG) {
        Ok(value) => value,
        Err(RecvTimeoutError::Timeout) => panic!("deadlock: no result within {WATCHDOG:?}"),
        Err(RecvTimeoutError::Disconnected) => panic!("test thread panicked"),
    }
}

// ============================================================================
// LAYER CONTEXT: SAME-LAYER SERIALIZATION
// ============================================================================

#[test]
fn verify_same_layer_increments_not_lost() {
    let threads = 8;
    let increments = 10_000u64;

    let total = within_watchdog(move || {
        let ctx: LayerSync<u64> = LayerSync::new(4).unwrap();
        thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    for _ in 0..increments {
                        ctx.run_under_layer_lock(2, |count| *count += 1);
                    }
                });
            }
        });
        ctx.into_layers()
    });

    assert_eq!(total, vec![0, 0, threads as u64 * increments, 0]);
}

#[test]
fn verify_distinct_layers_overlap() {
    // Two workers rendezvous while each holds a different layer's lock.
    within_watchdog(|| {
        let ctx: LayerSync = LayerSync::new(2).unwrap();
        let rendezvous = PhaseBarrier::new(2).unwrap();
        thread::scope(|s| {
            for layer in 0..2 {
                let ctx = &ctx;
                let rendezvous = &rendezvous;
                s.spawn(move || {
                    ctx.run_under_layer_lock(layer, |_| {
                        rendezvous.wait();
                    });
                });
            }
        });
    });
}

#[test]
fn verify_invalid_indices_never_block() {
    within_watchdog(|| {
        let ctx: LayerSync = LayerSync::new(3).unwrap();
        let called = AtomicBool::new(false);
        // Hold every valid layer; invalid indices must still return at once.
        ctx.run_under_layer_lock(0usize, |_| {
            ctx.run_under_layer_lock(1usize, |_| {
                ctx.run_under_layer_lock(2usize, |_| {
                    assert!(ctx
                        .run_under_layer_lock(3usize, |_| called.store(true, Ordering::SeqCst))
                        .is_none());
                    assert!(ctx
                        .run_under_layer_lock(-1i64, |_| called.store(true, Ordering::SeqCst))
                        .is_none());
                });
            });
        });
        assert!(!called.load(Ordering::SeqCst));
    });
}

// ============================================================================
// COUNTERS
// ============================================================================

#[test]
fn verify_seen_samples_exact_under_contention() {
    let ctx: LayerSync = LayerSync::new(0).unwrap();
    let threads = 8u64;
    let adds = 5_000u64;

    thread::scope(|s| {
        for t in 0..threads {
            let ctx = &ctx;
            s.spawn(move || {
                for _ in 0..adds {
                    ctx.record_samples(t + 1);
                }
            });
        }
    });

    // Sum of (t + 1) * adds for t in 0..threads.
    let expected = adds * threads * (threads + 1) / 2;
    assert_eq!(ctx.seen_samples().load(Ordering::SeqCst), expected);
}

#[test]
fn verify_active_threads_returns_to_zero() {
    let ctx: LayerSync = LayerSync::new(1).unwrap();
    let peak = AtomicU64::new(0);

    thread::scope(|s| {
        for _ in 0..6 {
            s.spawn(|| {
                for _ in 0..200 {
                    let _active = ctx.enter();
                    let now = ctx.active_threads().load(Ordering::SeqCst) as u64;
                    peak.fetch_max(now, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(ctx.active_threads().load(Ordering::SeqCst), 0);
    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=6).contains(&peak));
}

// ============================================================================
// SUBSYSTEM LOCKS
// ============================================================================

#[test]
fn verify_subsystem_locks_independent_under_load() {
    within_watchdog(|| {
        let locks = SubsystemLocks::new(0u64, 0u64, 0u64, 0u64, 0u64);
        thread::scope(|s| {
            for subsystem in Subsystem::ALL {
                let locks = &locks;
                s.spawn(move || {
                    for _ in 0..1_000 {
                        match subsystem {
                            Subsystem::Network => locks.with_network(|n| *n += 1),
                            Subsystem::Weight => locks.with_weight(|w| *w += 1),
                            Subsystem::Data => locks.with_data(|d| *d += 1),
                            Subsystem::Gpu => locks.with_gpu(|g| *g += 1),
                            Subsystem::Stats => locks.with_stats(|st| *st += 1),
                        }
                    }
                });
            }
        });
        for subsystem in Subsystem::ALL {
            assert_eq!(locks.acquisitions(subsystem), 1_000);
        }
        assert_eq!(locks.into_inner(), (1_000, 1_000, 1_000, 1_000, 1_000));
    });
}

// ============================================================================
// FULL TRAINING RUN
// ============================================================================

#[test]
fn verify_training_converges_on_quadratic() {
    let outcome = within_watchdog(|| {
        let config = SyncConfig {
            num_layers: 4,
            worker_threads: 4,
            ..SyncConfig::default()
        };
        let plan = TrainingPlan {
            epochs: 20,
            batches_per_epoch: 4,
            batch_size: 8,
            learning_rate: 0.2,
        };
        train(&config, &plan, vec![vec![1.0; 16]; 4], |_: Step, w: &[f32], g: &mut [f32]| {
            let mut loss = 0.0;
            for (w, g) in w.iter().zip(g.iter_mut()) {
                *g += *w;
                loss += 0.5 * w * w;
            }
            loss
        })
        .unwrap()
    });

    // w <- w * (1 - 0.2) each epoch.
    let expected = 0.8f32.powi(20);
    for layer in &outcome.weights {
        for &w in layer {
            assert!((w - expected).abs() < 1e-4, "w = {w}, expected {expected}");
        }
    }

    let losses = &outcome.stats.epoch_loss;
    assert_eq!(losses.len(), 20);
    assert!(losses.windows(2).all(|pair| pair[1] < pair[0]));
    assert_eq!(outcome.seen_samples, 4 * 20 * 4 * 8);
}

#[test]
fn verify_reports_cover_every_worker_and_epoch() {
    let outcome = within_watchdog(|| {
        let config = SyncConfig {
            worker_threads: 6,
            num_layers: 2,
            ..SyncConfig::default()
        };
        let plan = TrainingPlan {
            epochs: 4,
            ..TrainingPlan::default()
        };
        train(&config, &plan, vec![vec![0.0; 2]; 2], |_, _, _| 0.0).unwrap()
    });

    assert_eq!(outcome.reports.len(), 24);
    for (i, report) in outcome.reports.iter().enumerate() {
        assert_eq!(report.epoch, i / 6);
        assert_eq!(report.worker, i % 6);
        assert_eq!(report.samples, 8 * 32);
    }
    assert_eq!(outcome.epochs_completed, 4);
}
