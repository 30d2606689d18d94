//! # TESSERA Core
//!
//! Synchronization kernel for parallel neural-network training and real-time
//! inference:
//! - One lock per layer, so workers on different layers never contend
//! - Five independent subsystem locks for model-wide state
//! - Capture → infer → render handoff with clean shutdown
//! - Reusable epoch barrier and explicit memory fences
//!
//! ## Rules
//!
//! 1. **No global state** - every context is created per session and passed
//!    by reference
//! 2. **Closure-scoped locking** - a lock is held exactly for the work item
//!    and released on every exit path
//! 3. **Invalid layer indices are no-ops** - never a panic, never a lock
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::{LayerSync, Subsystem, SubsystemLocks};
//!
//! let locks: SubsystemLocks = SubsystemLocks::default();
//! let layers: LayerSync<Vec<f32>> = LayerSync::from_fn(4, |_| vec![0.0; 8]).unwrap();
//!
//! std::thread::scope(|s| {
//!     for layer in 0..4 {
//!         let layers = &layers;
//!         s.spawn(move || {
//!             layers.run_under_layer_lock(layer, |w| w[0] += 1.0);
//!         });
//!     }
//! });
//! locks.run_exclusive(Subsystem::Stats, || {});
//! assert_eq!(layers.into_layers()[3][0], 1.0);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod sync;

pub use config::{DemoConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use lifecycle::{DemoSession, TrainingSync};
pub use sync::{
    acquire_fence, full_fence, release_fence,
    ActiveThreadGuard, BarrierWaitResult, CapturedFrame, DemoSync, Detection, FrameTag,
    GuardedRegion, Handoff, LayerSync, PhaseBarrier, PipelineStats, SlotState, Subsystem,
    SubsystemLocks,
};
