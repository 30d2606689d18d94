//! # Synchronization Primitives for Parallel Training and Inference
//!
//! ## The Problem
//!
//! ```text
//! Worker 1:  forward/backward on layer 3, accumulate into layer 3 grads
//! Worker 2:  forward/backward on layer 7, accumulate into layer 7 grads
//! Worker 3:  update weights, log stats
//!
//! One global lock:   every worker waits on every other → serial training
//! No locks:          lost gradient updates
//! ```
//!
//! ## The Solution: Fine-grained Locks
//!
//! ```text
//! LayerSync        one lock per layer, atomics for hot counters
//! SubsystemLocks   five independent coarse locks (network/weight/data/gpu/stats)
//! DemoSync         capture → infer → render handoff (mutex + condvar)
//! PhaseBarrier     epoch rendezvous
//! fence            explicit acquire/release/full ordering points
//! ```
//!
//! Work on different layers or different categories proceeds in parallel.

mod barrier;
pub mod fence;
mod guarded;
mod layer;
mod pipeline;
mod subsystem;

pub use barrier::{BarrierWaitResult, PhaseBarrier};
pub use fence::{acquire_fence, full_fence, release_fence};
pub use guarded::GuardedRegion;
pub use layer::{ActiveThreadGuard, LayerSync};
pub use pipeline::{
    CapturedFrame,
    DemoSync,
    Detection,
    FrameTag,
    Handoff,
    PipelineStats,
    SlotState,
};
pub use subsystem::{Subsystem, SubsystemLocks};
