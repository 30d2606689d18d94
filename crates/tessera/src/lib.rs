//! # TESSERA
//!
//! Training and demo drivers on top of the `tessera_core` sync kernel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              TESSERA                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌──────────────────────┐            ┌──────────────────────────┐   │
//! │  │  training            │            │  demo                    │   │
//! │  │  N workers           │            │  capture → infer → render│   │
//! │  │  • layer locks       │            │  • DemoSession           │   │
//! │  │  • stats/weight lock │            │  • shutdown on panic     │   │
//! │  │  • epoch barrier     │            │                          │   │
//! │  └──────────┬───────────┘            └────────────┬─────────────┘   │
//! │             └──────────────┬──────────────────────┘                 │
//! │                     ┌──────┴───────┐                                │
//! │                     │ tessera_core │                                │
//! │                     └──────────────┘                                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `training`: Data-parallel training loop
//! - `demo`: Real-time detection pipeline runner
//! - `error`: Driver errors

pub mod demo;
pub mod error;
pub mod training;

pub use tessera_core as core;

pub use demo::{run_demo, DemoReport, Detector, FrameSource, Renderer};
pub use error::{TesseraError, TesseraResult};
pub use training::{train, LayerState, LossStats, Step, TrainingOutcome, TrainingPlan, WorkerReport};
