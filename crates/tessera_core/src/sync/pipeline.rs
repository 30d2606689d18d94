//! # Demo Pipeline Handoff
//!
//! Capture → Infer → Render, three roles on three threads.
//!
//! ## Protocol
//!
//! ```text
//!  CAPTURE                    INFER                         RENDER
//!    │ lock buffer              │ lock buffer                 │ lock predictions
//!    │ write slot[buffer_index] │ while !frame && running:    │ while !detection && running:
//!    │ notify buffer_ready ────>│     wait buffer_ready       │     wait detection_done
//!    │ unlock                   │ take frame, unlock          │ take detection, unlock
//!    │                          │ ... inference ...           │ ... draw (display lock) ...
//!    │                          │ lock predictions            │
//!    │                          │ write, notify ─────────────>│
//! ```
//!
//! Slot lifecycle: `Empty → Filled → Consumed → Empty`. Capture fills the slot
//! at `buffer_index` and advances the index around the ring. Infer moves the
//! newest frame out (`Consumed`); publishing that frame's predictions returns
//! the slot to `Empty`.
//!
//! ## Shutdown
//!
//! [`DemoSync::request_shutdown`] clears `running`, then takes each mutex in
//! turn and broadcasts its condvar. A waiter is either before its predicate
//! check (and sees `running == false`) or parked (and gets woken), so no
//! wakeup is missed. Every wait loop re-checks its predicate after each wakeup.
//!
//! Storing `false` into [`DemoSync::running`] directly skips the broadcast and
//! leaves untimed waiters parked; use `request_shutdown`.
//!
//! The three mutexes are never nested.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::guarded::GuardedRegion;
use crate::error::{SyncError, SyncResult};

/// State of one frame slot in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No frame.
    Empty,
    /// Holds a frame not yet taken by infer.
    Filled,
    /// Frame taken by infer; predictions not yet published.
    Consumed,
}

/// Identifies a captured frame: its ring slot and capture sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameTag {
    /// Slot the frame was written to.
    pub slot: usize,
    /// Capture order, starting at 0.
    pub sequence: u64,
}

/// A frame handed from capture to infer.
#[derive(Debug, PartialEq, Eq)]
pub struct CapturedFrame<F> {
    /// Where and when the frame was captured.
    pub tag: FrameTag,
    /// The frame itself.
    pub data: F,
}

/// Predictions handed from infer to render.
#[derive(Debug, PartialEq, Eq)]
pub struct Detection<P> {
    /// The frame these predictions were computed from.
    pub tag: FrameTag,
    /// Detector output.
    pub predictions: P,
}

/// Outcome of a timed wait.
#[derive(Debug, PartialEq, Eq)]
pub enum Handoff<T> {
    /// Data was available.
    Ready(T),
    /// `running` was cleared and no data was available.
    Shutdown,
    /// The timeout elapsed with no data and the pipeline still running.
    TimedOut,
}

impl<T> Handoff<T> {
    /// Returns the payload if ready.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Shutdown | Self::TimedOut => None,
        }
    }
}

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames written by capture.
    pub frames_captured: u64,
    /// Frames taken by infer.
    pub frames_inferred: u64,
    /// Frames overwritten or skipped before infer took them.
    pub frames_dropped: u64,
    /// Detections published by infer.
    pub detections_published: u64,
    /// Detections taken by render.
    pub detections_rendered: u64,
    /// Detections replaced before render took them.
    pub detections_dropped: u64,
}

struct FrameSlot<F> {
    state: SlotState,
    sequence: u64,
    frame: Option<F>,
}

struct FrameRing<F> {
    slots: Vec<FrameSlot<F>>,
    next_sequence: u64,
}

impl<F> FrameRing<F> {
    /// Moves the newest filled frame out. Older filled frames are discarded.
    ///
    /// Returns the frame and how many older frames were skipped.
    fn take_newest(&mut self) -> Option<(CapturedFrame<F>, u64)> {
        let newest = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state == SlotState::Filled)
            .max_by_key(|(_, s)| s.sequence)
            .map(|(i, _)| i)?;

        let mut skipped = 0;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if i != newest && slot.state == SlotState::Filled {
                slot.state = SlotState::Empty;
                slot.frame = None;
                skipped += 1;
            }
        }

        let slot = &mut self.slots[newest];
        let data = slot.frame.take()?;
        slot.state = SlotState::Consumed;
        let tag = FrameTag {
            slot: newest,
            sequence: slot.sequence,
        };
        Some((CapturedFrame { tag, data }, skipped))
    }
}

#[derive(Default)]
struct Counters {
    frames_captured: AtomicU64,
    frames_inferred: AtomicU64,
    frames_dropped: AtomicU64,
    detections_published: AtomicU64,
    detections_rendered: AtomicU64,
    detections_dropped: AtomicU64,
}

/// Synchronization for one capture/infer/render session.
///
/// `F` is the frame type, `P` the prediction type. Share it between the three
/// roles by reference (scoped threads) or `Arc`; it must outlive all three.
pub struct DemoSync<F, P> {
    buffer: Mutex<FrameRing<F>>,
    predictions: Mutex<Option<Detection<P>>>,
    display: GuardedRegion<()>,
    buffer_ready: Condvar,
    detection_done: Condvar,
    buffer_index: AtomicUsize,
    running: AtomicBool,
    counters: Counters,
}

impl<F, P> DemoSync<F, P> {
    /// Creates a running pipeline with `ring_len` frame slots.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] for an empty ring and
    /// [`SyncError::Allocation`] if the ring cannot be reserved.
    pub fn new(ring_len: usize) -> SyncResult<Self> {
        if ring_len == 0 {
            return Err(SyncError::InvalidConfig(
                "demo ring needs at least one slot".to_string(),
            ));
        }
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(ring_len)
            .map_err(|_| SyncError::Allocation {
                what: "frame ring",
                requested: ring_len,
            })?;
        slots.extend((0..ring_len).map(|_| FrameSlot {
            state: SlotState::Empty,
            sequence: 0,
            frame: None,
        }));

        tracing::debug!(ring_len, "demo pipeline sync created");
        Ok(Self {
            buffer: Mutex::new(FrameRing {
                slots,
                next_sequence: 0,
            }),
            predictions: Mutex::new(None),
            display: GuardedRegion::new(()),
            buffer_ready: Condvar::new(),
            detection_done: Condvar::new(),
            buffer_index: AtomicUsize::new(0),
            running: AtomicBool::new(true),
            counters: Counters::default(),
        })
    }

    /// Number of frame slots.
    #[must_use]
    pub fn ring_len(&self) -> usize {
        self.buffer.lock().slots.len()
    }

    // =========================================================================
    // CAPTURE
    // =========================================================================

    /// Writes `frame` into the slot at `buffer_index` and wakes infer.
    ///
    /// Overwriting a slot whose frame was never taken counts as a dropped
    /// frame. Returns `None` (and discards `frame`) once shutdown has been
    /// requested.
    pub fn publish_frame(&self, frame: F) -> Option<FrameTag> {
        let mut ring = self.buffer.lock();
        if !self.is_running() {
            return None;
        }

        let slot_idx = self.buffer_index.load(Ordering::Acquire) % ring.slots.len();
        let sequence = ring.next_sequence;
        ring.next_sequence += 1;

        let slot = &mut ring.slots[slot_idx];
        if slot.state == SlotState::Filled {
            self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(slot = slot_idx, sequence = slot.sequence, "frame overwritten before inference");
        }
        slot.state = SlotState::Filled;
        slot.sequence = sequence;
        slot.frame = Some(frame);

        let next = (slot_idx + 1) % ring.slots.len();
        self.buffer_index.store(next, Ordering::Release);
        self.counters.frames_captured.fetch_add(1, Ordering::Relaxed);
        self.buffer_ready.notify_one();

        Some(FrameTag {
            slot: slot_idx,
            sequence,
        })
    }

    // =========================================================================
    // INFER
    // =========================================================================

    /// Blocks until a frame is available or shutdown is requested.
    ///
    /// Takes the newest filled frame. Returns `None` on shutdown if no frame
    /// was available; nothing is consumed in that case.
    pub fn wait_for_frame(&self) -> Option<CapturedFrame<F>> {
        let mut ring = self.buffer.lock();
        loop {
            if let Some(frame) = self.take_frame(&mut ring) {
                return Some(frame);
            }
            if !self.is_running() {
                return None;
            }
            self.buffer_ready.wait(&mut ring);
        }
    }

    /// [`DemoSync::wait_for_frame`] bounded by `timeout`.
    ///
    /// A timeout too large to express as a deadline waits without one.
    pub fn wait_for_frame_timeout(&self, timeout: Duration) -> Handoff<CapturedFrame<F>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut ring = self.buffer.lock();
        loop {
            if let Some(frame) = self.take_frame(&mut ring) {
                return Handoff::Ready(frame);
            }
            if !self.is_running() {
                return Handoff::Shutdown;
            }
            let Some(deadline) = deadline else {
                self.buffer_ready.wait(&mut ring);
                continue;
            };
            if self.buffer_ready.wait_until(&mut ring, deadline).timed_out() {
                return match self.take_frame(&mut ring) {
                    Some(frame) => Handoff::Ready(frame),
                    None if self.is_running() => Handoff::TimedOut,
                    None => Handoff::Shutdown,
                };
            }
        }
    }

    /// Publishes predictions for a frame taken with `wait_for_frame` and wakes
    /// render.
    ///
    /// Returns the frame's slot to `Empty` unless capture has already reused
    /// it. Replacing a detection render has not taken yet counts as a
    /// dropped detection.
    pub fn publish_predictions(&self, tag: FrameTag, predictions: P) {
        {
            let mut ring = self.buffer.lock();
            if let Some(slot) = ring.slots.get_mut(tag.slot) {
                if slot.state == SlotState::Consumed && slot.sequence == tag.sequence {
                    slot.state = SlotState::Empty;
                }
            }
        }

        let mut latest = self.predictions.lock();
        if latest.is_some() {
            self.counters.detections_dropped.fetch_add(1, Ordering::Relaxed);
        }
        *latest = Some(Detection { tag, predictions });
        self.counters
            .detections_published
            .fetch_add(1, Ordering::Relaxed);
        self.detection_done.notify_one();
    }

    // =========================================================================
    // RENDER
    // =========================================================================

    /// Blocks until a detection is available or shutdown is requested.
    ///
    /// Returns `None` on shutdown if no detection was available.
    pub fn wait_for_predictions(&self) -> Option<Detection<P>> {
        let mut latest = self.predictions.lock();
        loop {
            if let Some(detection) = self.take_detection(&mut latest) {
                return Some(detection);
            }
            if !self.is_running() {
                return None;
            }
            self.detection_done.wait(&mut latest);
        }
    }

    /// [`DemoSync::wait_for_predictions`] bounded by `timeout`.
    ///
    /// A timeout too large to express as a deadline waits without one.
    pub fn wait_for_predictions_timeout(&self, timeout: Duration) -> Handoff<Detection<P>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut latest = self.predictions.lock();
        loop {
            if let Some(detection) = self.take_detection(&mut latest) {
                return Handoff::Ready(detection);
            }
            if !self.is_running() {
                return Handoff::Shutdown;
            }
            let Some(deadline) = deadline else {
                self.detection_done.wait(&mut latest);
                continue;
            };
            if self.detection_done.wait_until(&mut latest, deadline).timed_out() {
                return match self.take_detection(&mut latest) {
                    Some(detection) => Handoff::Ready(detection),
                    None if self.is_running() => Handoff::TimedOut,
                    None => Handoff::Shutdown,
                };
            }
        }
    }

    /// Runs `work` holding the display lock.
    pub fn with_display<R>(&self, work: impl FnOnce() -> R) -> R {
        self.display.run(|_| work())
    }

    // =========================================================================
    // SHUTDOWN & STATE
    // =========================================================================

    /// Clears `running` and wakes every waiter on both condvars.
    ///
    /// Safe to call from any role, any number of times.
    pub fn request_shutdown(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);

        {
            let _ring = self.buffer.lock();
            self.buffer_ready.notify_all();
        }
        {
            let _latest = self.predictions.lock();
            self.detection_done.notify_all();
        }

        if was_running {
            tracing::info!("demo pipeline shutdown requested");
        }
    }

    /// Returns whether the pipeline is still running.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The running flag, for direct atomic access.
    #[inline]
    #[must_use]
    pub fn running(&self) -> &AtomicBool {
        &self.running
    }

    /// Index of the slot the next captured frame goes to.
    #[inline]
    #[must_use]
    pub fn buffer_index(&self) -> &AtomicUsize {
        &self.buffer_index
    }

    /// State of slot `slot`, or `None` past the end of the ring.
    #[must_use]
    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.buffer.lock().slots.get(slot).map(|s| s.state)
    }

    /// Snapshot of the pipeline counters.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            frames_captured: c.frames_captured.load(Ordering::Relaxed),
            frames_inferred: c.frames_inferred.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            detections_published: c.detections_published.load(Ordering::Relaxed),
            detections_rendered: c.detections_rendered.load(Ordering::Relaxed),
            detections_dropped: c.detections_dropped.load(Ordering::Relaxed),
        }
    }

    fn take_frame(&self, ring: &mut FrameRing<F>) -> Option<CapturedFrame<F>> {
        let (frame, skipped) = ring.take_newest()?;
        if skipped > 0 {
            self.counters
                .frames_dropped
                .fetch_add(skipped, Ordering::Relaxed);
            tracing::debug!(skipped, "stale frames skipped");
        }
        self.counters.frames_inferred.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    fn take_detection(&self, latest: &mut Option<Detection<P>>) -> Option<Detection<P>> {
        let detection = latest.take()?;
        self.counters
            .detections_rendered
            .fetch_add(1, Ordering::Relaxed);
        Some(detection)
    }
}

impl<F, P> fmt::Debug for DemoSync<F, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemoSync")
            .field("running", &self.is_running())
            .field("buffer_index", &self.buffer_index.load(Ordering::Relaxed))
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
