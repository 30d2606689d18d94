//! # Session Lifecycle
//!
//! Create once at session start, share by reference, drop at session end.
//!
//! ```text
//! SyncConfig ──► TrainingSync { SubsystemLocks, LayerSync, PhaseBarrier }
//!            └─► DemoSession  { DemoSync }
//! ```
//!
//! Nothing here is global. Dropping a session releases every primitive it
//! owns; callers must make sure no thread is still inside one of them first
//! (scoped threads or joined `Arc` holders guarantee that).

use std::time::Duration;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::sync::{
    CapturedFrame, DemoSync, Detection, Handoff, LayerSync, PhaseBarrier, SubsystemLocks,
};

/// Logs the session's destruction once its fields are dropped.
#[derive(Debug)]
struct DropLog(&'static str);

impl Drop for DropLog {
    fn drop(&mut self) {
        tracing::debug!(session = self.0, "sync session destroyed");
    }
}

// =============================================================================
// TRAINING
// =============================================================================

/// Everything a training session's workers synchronize on.
///
/// `T` is the per-layer state, `S` the state behind the stats lock.
#[derive(Debug)]
pub struct TrainingSync<T = (), S = ()> {
    locks: SubsystemLocks<(), (), (), (), S>,
    layers: LayerSync<T>,
    barrier: PhaseBarrier,
    _log: DropLog,
}

impl<T, S> TrainingSync<T, S> {
    /// Builds a session around existing per-layer states.
    ///
    /// The barrier is sized to `config.worker_threads`; `config.num_layers`
    /// is ignored in favour of `layers.len()`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`SyncConfig::validate`].
    pub fn with_layers(config: &SyncConfig, layers: Vec<T>, stats: S) -> SyncResult<Self> {
        config.validate()?;
        let layers = LayerSync::from_layers(layers);
        let barrier = PhaseBarrier::new(config.worker_threads)?;

        tracing::info!(
            num_layers = layers.num_layers(),
            workers = config.worker_threads,
            "training sync session created"
        );
        Ok(Self {
            locks: SubsystemLocks::new((), (), (), (), stats),
            layers,
            barrier,
            _log: DropLog("training"),
        })
    }

    /// The five subsystem locks.
    #[must_use]
    pub fn locks(&self) -> &SubsystemLocks<(), (), (), (), S> {
        &self.locks
    }

    /// The per-layer locks and counters.
    #[must_use]
    pub fn layers(&self) -> &LayerSync<T> {
        &self.layers
    }

    /// The epoch barrier.
    #[must_use]
    pub fn barrier(&self) -> &PhaseBarrier {
        &self.barrier
    }

    /// Ends the session, returning the per-layer states and the stats state.
    #[must_use]
    pub fn finish(self) -> (Vec<T>, S) {
        let (_, _, _, _, stats) = self.locks.into_inner();
        (self.layers.into_layers(), stats)
    }
}

impl<T: Default, S: Default> TrainingSync<T, S> {
    /// Builds a session with `config.num_layers` default layers.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`SyncConfig::validate`], or
    /// [`SyncError::Allocation`] if the layer
    /// locks cannot be reserved.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let mut layers = Vec::new();
        layers
            .try_reserve_exact(config.num_layers)
            .map_err(|_| SyncError::Allocation {
                what: "layer states",
                requested: config.num_layers,
            })?;
        layers.resize_with(config.num_layers, T::default);
        Self::with_layers(config, layers, S::default())
    }
}

// =============================================================================
// DEMO
// =============================================================================

/// One capture/infer/render session.
///
/// Waits honour the configured timeout: with `wait_timeout_ms` unset they
/// block until signalled.
#[derive(Debug)]
pub struct DemoSession<F, P> {
    sync: DemoSync<F, P>,
    wait_timeout: Option<Duration>,
    _log: DropLog,
}

impl<F, P> DemoSession<F, P> {
    /// Builds a session from `config.demo`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`SyncConfig::validate`] and [`DemoSync::new`].
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let sync = DemoSync::new(config.demo.ring_len)?;
        tracing::info!(
            ring_len = config.demo.ring_len,
            wait_timeout_ms = ?config.demo.wait_timeout_ms,
            "demo sync session created"
        );
        Ok(Self {
            sync,
            wait_timeout: config.demo.wait_timeout(),
            _log: DropLog("demo"),
        })
    }

    /// The underlying handoff.
    #[must_use]
    pub fn sync(&self) -> &DemoSync<F, P> {
        &self.sync
    }

    /// Waits for the next frame (infer side).
    pub fn next_frame(&self) -> Handoff<CapturedFrame<F>> {
        match self.wait_timeout {
            Some(timeout) => self.sync.wait_for_frame_timeout(timeout),
            None => self
                .sync
                .wait_for_frame()
                .map_or(Handoff::Shutdown, Handoff::Ready),
        }
    }

    /// Waits for the next detection (render side).
    pub fn next_detection(&self) -> Handoff<Detection<P>> {
        match self.wait_timeout {
            Some(timeout) => self.sync.wait_for_predictions_timeout(timeout),
            None => self
                .sync
                .wait_for_predictions()
                .map_or(Handoff::Shutdown, Handoff::Ready),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DemoConfig;
    use crate::sync::Subsystem;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn config(num_layers: usize, worker_threads: usize) -> SyncConfig {
        SyncConfig {
            num_layers,
            worker_threads,
            ..SyncConfig::default()
        }
    }

    #[test]
    fn test_training_session_sized_from_config() {
        let session: TrainingSync<u64> = TrainingSync::new(&config(10, 3)).unwrap();
        assert_eq!(session.layers().num_layers(), 10);
        assert_eq!(session.barrier().parties(), 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = TrainingSync::<(), ()>::new(&config(4, 0)).unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));

        let bad_demo = SyncConfig {
            demo: DemoConfig {
                ring_len: 0,
                wait_timeout_ms: None,
            },
            ..SyncConfig::default()
        };
        assert!(DemoSession::<u8, u8>::new(&bad_demo).is_err());
    }

    #[test]
    fn test_zero_layer_session_is_usable() {
        let session: TrainingSync = TrainingSync::new(&config(0, 1)).unwrap();
        assert!(session.layers().run_under_layer_lock(0, |_| ()).is_none());
        session.locks().run_exclusive(Subsystem::Network, || {});
        assert!(session.barrier().wait().is_leader());
    }

    #[test]
    fn test_finish_returns_layer_and_stats_state() {
        let session =
            TrainingSync::with_layers(&config(0, 2), vec![1.0f32, 2.0], Vec::<f32>::new())
                .unwrap();

        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    session.layers().run_under_layer_lock(1, |w| *w += 1.0);
                    session.locks().with_stats(|losses| losses.push(0.25));
                    session.barrier().wait();
                });
            }
        });

        let (layers, losses) = session.finish();
        assert_eq!(layers, vec![1.0, 4.0]);
        assert_eq!(losses.len(), 2);
    }

    #[test]
    fn test_repeated_session_create_destroy() {
        let released = Arc::new(AtomicUsize::new(0));

        struct Weights(Arc<AtomicUsize>);
        impl Drop for Weights {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        for _ in 0..1000 {
            let layers: Vec<Weights> = (0..4).map(|_| Weights(Arc::clone(&released))).collect();
            let session = TrainingSync::with_layers(&config(4, 2), layers, ()).unwrap();
            drop(session);
        }

        assert_eq!(released.load(Ordering::SeqCst), 4000);
        assert_eq!(Arc::strong_count(&released), 1);
    }

    #[test]
    fn test_demo_session_untimed_waits() {
        let session: DemoSession<u32, u32> = DemoSession::new(&SyncConfig::default()).unwrap();
        assert_eq!(session.sync().ring_len(), SyncConfig::default().demo.ring_len);

        let tag = session.sync().publish_frame(4).unwrap();
        let frame = session.next_frame().ready().unwrap();
        session.sync().publish_predictions(frame.tag, frame.data + 1);
        let detection = session.next_detection().ready().unwrap();
        assert_eq!(detection.tag, tag);
        assert_eq!(detection.predictions, 5);

        session.sync().request_shutdown();
        assert_eq!(session.next_frame(), Handoff::Shutdown);
        assert_eq!(session.next_detection(), Handoff::Shutdown);
    }

    #[test]
    fn test_demo_session_timed_waits() {
        let cfg = SyncConfig {
            demo: DemoConfig {
                ring_len: 2,
                wait_timeout_ms: Some(10),
            },
            ..SyncConfig::default()
        };
        let session: DemoSession<u32, u32> = DemoSession::new(&cfg).unwrap();

        assert_eq!(session.next_frame(), Handoff::TimedOut);
        assert_eq!(session.next_detection(), Handoff::TimedOut);
    }
}
