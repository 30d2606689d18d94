//! # Demo Driver
//!
//! Real-time detection on a live source: capture, infer and render each on
//! their own thread, handing off through one [`DemoSession`].
//!
//! The run ends when the last captured frame has been rendered, or when the
//! frame budget is hit. Any role that panics requests shutdown on its way out
//! so the other two wake up and exit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tessera_core::{DemoSession, DemoSync, FrameTag, Handoff, PipelineStats, SyncConfig};

use crate::error::{TesseraError, TesseraResult};

/// Produces frames (camera, video file...).
pub trait FrameSource: Send {
    /// Frame type.
    type Frame: Send;

    /// Next frame, or `None` when the source is exhausted.
    fn next_frame(&mut self) -> Option<Self::Frame>;
}

/// Runs the network on a frame.
pub trait Detector<F>: Send {
    /// Prediction type.
    type Output: Send;

    /// Computes predictions for `frame`.
    fn detect(&mut self, frame: &F) -> Self::Output;
}

/// Draws predictions. Called under the display lock.
pub trait Renderer<P>: Send {
    /// Draws `predictions`, computed from the frame identified by `tag`.
    fn render(&mut self, tag: FrameTag, predictions: &P);
}

/// Summary of a demo run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DemoReport {
    /// Pipeline counters at shutdown.
    pub stats: PipelineStats,
    /// Sequence number of the last captured frame.
    pub last_sequence: Option<u64>,
    /// Sequence number of the last rendered frame.
    pub last_rendered: Option<u64>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

const NONE: u64 = u64::MAX;

/// Tracks when the final frame has made it through render.
struct Completion {
    last_captured: AtomicU64,
    last_rendered: AtomicU64,
}

impl Completion {
    fn new() -> Self {
        Self {
            last_captured: AtomicU64::new(NONE),
            last_rendered: AtomicU64::new(NONE),
        }
    }

    fn load(value: &AtomicU64) -> Option<u64> {
        match value.load(Ordering::SeqCst) {
            NONE => None,
            seq => Some(seq),
        }
    }

    /// Capture side. Each side stores then loads the other's value, so at
    /// least one of them sees both.
    fn capture_done<F, P>(&self, sync: &DemoSync<F, P>, last: Option<u64>) {
        match last {
            Some(seq) => {
                self.last_captured.store(seq, Ordering::SeqCst);
                if Self::load(&self.last_rendered).is_some_and(|r| r >= seq) {
                    sync.request_shutdown();
                }
            }
            None => sync.request_shutdown(),
        }
    }

    fn rendered<F, P>(&self, sync: &DemoSync<F, P>, seq: u64) {
        self.last_rendered.store(seq, Ordering::SeqCst);
        if Self::load(&self.last_captured).is_some_and(|last| seq >= last) {
            sync.request_shutdown();
        }
    }
}

/// Requests shutdown if its thread unwinds.
struct ShutdownOnPanic<'a, F, P>(&'a DemoSync<F, P>);

impl<F, P> Drop for ShutdownOnPanic<'_, F, P> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!("demo role panicked, shutting the pipeline down");
            self.0.request_shutdown();
        }
    }
}

/// Runs capture, infer and render until the source is exhausted or
/// `frame_budget` frames have been captured.
///
/// # Errors
///
/// Returns [`TesseraError::Sync`] if the session cannot be built and
/// [`TesseraError::WorkerPanicked`] if a role panicked.
pub fn run_demo<S, D, R>(
    config: &SyncConfig,
    mut source: S,
    mut detector: D,
    mut renderer: R,
    frame_budget: Option<u64>,
) -> TesseraResult<DemoReport>
where
    S: FrameSource,
    D: Detector<S::Frame>,
    R: Renderer<D::Output>,
{
    let session: DemoSession<S::Frame, D::Output> = DemoSession::new(config)?;
    let completion = Completion::new();
    let start = Instant::now();

    let outcomes = std::thread::scope(|s| {
        let session = &session;
        let completion = &completion;

        let capture = s.spawn(move || {
            let sync = session.sync();
            let _guard = ShutdownOnPanic(sync);
            let mut last = None;
            let mut captured = 0u64;
            while sync.is_running() && frame_budget.map_or(true, |budget| captured < budget) {
                let Some(frame) = source.next_frame() else {
                    break;
                };
                match sync.publish_frame(frame) {
                    Some(tag) => last = Some(tag.sequence),
                    None => break,
                }
                captured += 1;
            }
            tracing::debug!(last_sequence = ?last, "capture finished");
            completion.capture_done(sync, last);
            last
        });

        let infer = s.spawn(move || {
            let sync = session.sync();
            let _guard = ShutdownOnPanic(sync);
            loop {
                match session.next_frame() {
                    Handoff::Ready(frame) => {
                        let predictions = detector.detect(&frame.data);
                        sync.publish_predictions(frame.tag, predictions);
                    }
                    Handoff::TimedOut => {}
                    Handoff::Shutdown => break,
                }
            }
        });

        let render = s.spawn(move || {
            let sync = session.sync();
            let _guard = ShutdownOnPanic(sync);
            let mut last = None;
            loop {
                match session.next_detection() {
                    Handoff::Ready(detection) => {
                        sync.with_display(|| renderer.render(detection.tag, &detection.predictions));
                        last = Some(detection.tag.sequence);
                        completion.rendered(sync, detection.tag.sequence);
                    }
                    Handoff::TimedOut => {}
                    Handoff::Shutdown => break,
                }
            }
            last
        });

        (capture.join(), infer.join(), render.join())
    });

    let (last_sequence, last_rendered) = match outcomes {
        (Ok(captured), Ok(()), Ok(rendered)) => (captured, rendered),
        (Err(_), _, _) => return Err(panicked("capture")),
        (_, Err(_), _) => return Err(panicked("infer")),
        (_, _, Err(_)) => return Err(panicked("render")),
    };

    let report = DemoReport {
        stats: session.sync().stats(),
        last_sequence,
        last_rendered,
        elapsed: start.elapsed(),
    };
    tracing::info!(
        captured = report.stats.frames_captured,
        rendered = report.stats.detections_rendered,
        dropped = report.stats.frames_dropped,
        "demo finished"
    );
    Ok(report)
}

fn panicked(role: &str) -> TesseraError {
    TesseraError::WorkerPanicked {
        role: role.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::DemoConfig;

    struct Counter {
        next: u32,
        end: u32,
    }

    impl FrameSource for Counter {
        type Frame = u32;

        fn next_frame(&mut self) -> Option<u32> {
            (self.next < self.end).then(|| {
                self.next += 1;
                self.next - 1
            })
        }
    }

    struct Double;

    impl Detector<u32> for Double {
        type Output = u64;

        fn detect(&mut self, frame: &u32) -> u64 {
            u64::from(*frame) * 2
        }
    }

    #[derive(Default)]
    struct Collect(Vec<(u64, u64)>);

    impl Renderer<u64> for &mut Collect {
        fn render(&mut self, tag: FrameTag, predictions: &u64) {
            self.0.push((tag.sequence, *predictions));
        }
    }

    #[test]
    fn test_last_frame_always_rendered() {
        let mut drawn = Collect::default();
        let report = run_demo(
            &SyncConfig::default(),
            Counter { next: 0, end: 50 },
            Double,
            &mut drawn,
            None,
        )
        .unwrap();

        assert_eq!(report.last_sequence, Some(49));
        assert_eq!(report.last_rendered, Some(49));
        assert_eq!(report.stats.frames_captured, 50);
        assert_eq!(drawn.0.last(), Some(&(49, 98)));

        // Rendered in capture order, predictions match their frame.
        assert!(drawn.0.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(drawn.0.iter().all(|&(seq, p)| p == seq * 2));
    }

    #[test]
    fn test_frame_budget_stops_capture() {
        let report = run_demo(
            &SyncConfig::default(),
            Counter { next: 0, end: u32::MAX },
            Double,
            &mut Collect::default(),
            Some(10),
        )
        .unwrap();

        assert_eq!(report.stats.frames_captured, 10);
        assert_eq!(report.last_rendered, Some(9));
    }

    #[test]
    fn test_empty_source_shuts_down() {
        let report = run_demo(
            &SyncConfig::default(),
            Counter { next: 0, end: 0 },
            Double,
            &mut Collect::default(),
            None,
        )
        .unwrap();

        assert_eq!(report.last_sequence, None);
        assert_eq!(report.stats, PipelineStats::default());
    }

    #[test]
    fn test_timed_waits_complete() {
        let config = SyncConfig {
            demo: DemoConfig {
                ring_len: 2,
                wait_timeout_ms: Some(5),
            },
            ..SyncConfig::default()
        };
        let report = run_demo(
            &config,
            Counter { next: 0, end: 20 },
            Double,
            &mut Collect::default(),
            None,
        )
        .unwrap();
        assert_eq!(report.last_rendered, Some(19));
    }

    #[test]
    fn test_panicking_detector_reported() {
        struct Broken;
        impl Detector<u32> for Broken {
            type Output = u64;
            fn detect(&mut self, _: &u32) -> u64 {
                panic!("model failed to load");
            }
        }

        let result = run_demo(
            &SyncConfig::default(),
            Counter { next: 0, end: 5 },
            Broken,
            &mut Collect::default(),
            None,
        );
        assert!(matches!(
            result,
            Err(TesseraError::WorkerPanicked { ref role }) if role == "infer"
        ));
    }
}
