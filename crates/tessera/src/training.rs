//! # Training Driver
//!
//! Data-parallel training over a layered model, one thread per worker:
//!
//! ```text
//! epoch k:
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ every worker, every batch, every layer:                          │
//! │   layer lock ─► gradient(step, weights, grads) accumulates       │
//! │   seen_samples += batch_size                    (atomic)         │
//! │ stats lock ─► epoch loss                                         │
//! ├──────────────────────── barrier ─────────────────────────────────┤
//! │ leader only: weight lock ─► each layer lock ─► w -= lr * g / n   │
//! ├──────────────────────── barrier ─────────────────────────────────┤
//! │ report ─► channel                                                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lock order is weight before layer. Workers never hold a layer lock while
//! taking any other lock.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;

use crossbeam_channel::{unbounded, Sender};
use tessera_core::{SyncConfig, TrainingSync};

use crate::error::{TesseraError, TesseraResult};

/// Where a gradient call sits in the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step {
    /// Worker index.
    pub worker: usize,
    /// Epoch index.
    pub epoch: usize,
    /// Batch index within the epoch.
    pub batch: usize,
    /// Layer index.
    pub layer: usize,
}

/// Shape of a training run.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingPlan {
    /// Number of epochs.
    pub epochs: usize,
    /// Batches each worker processes per epoch.
    pub batches_per_epoch: usize,
    /// Samples per batch.
    pub batch_size: u64,
    /// Step size of the per-epoch weight update.
    pub learning_rate: f32,
}

impl Default for TrainingPlan {
    fn default() -> Self {
        Self {
            epochs: 3,
            batches_per_epoch: 8,
            batch_size: 32,
            learning_rate: 0.01,
        }
    }
}

impl TrainingPlan {
    fn validate(&self) -> TesseraResult<()> {
        if self.batches_per_epoch == 0 {
            return Err(TesseraError::Config(
                "batches_per_epoch must be at least 1".to_string(),
            ));
        }
        if !self.learning_rate.is_finite() {
            return Err(TesseraError::Config(format!(
                "learning_rate must be finite, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// One layer's weights and its gradient accumulator.
#[derive(Clone, Debug, Default)]
pub struct LayerState {
    weights: Vec<f32>,
    grads: Vec<f32>,
}

impl LayerState {
    /// Wraps `weights` with a zeroed accumulator.
    #[must_use]
    pub fn new(weights: Vec<f32>) -> Self {
        let grads = vec![0.0; weights.len()];
        Self { weights, grads }
    }

    fn apply(&mut self, scale: f32) {
        for (w, g) in self.weights.iter_mut().zip(self.grads.iter_mut()) {
            *w -= scale * *g;
            *g = 0.0;
        }
    }
}

/// Loss bookkeeping behind the stats lock.
#[derive(Debug, Default)]
pub struct LossStats {
    /// Batches processed across all workers.
    pub batches: u64,
    /// Summed loss per epoch across all workers.
    pub epoch_loss: Vec<f64>,
}

impl LossStats {
    fn record(&mut self, epoch: usize, loss: f64, batches: u64) {
        if self.epoch_loss.len() <= epoch {
            self.epoch_loss.resize(epoch + 1, 0.0);
        }
        self.epoch_loss[epoch] += loss;
        self.batches += batches;
    }
}

/// What one worker did in one epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerReport {
    /// Worker index.
    pub worker: usize,
    /// Epoch index.
    pub epoch: usize,
    /// Samples processed this epoch.
    pub samples: u64,
    /// Loss summed over this worker's gradient calls.
    pub loss: f64,
    /// Whether this worker applied the epoch's weight update.
    pub led_update: bool,
}

/// Result of a training run.
#[derive(Debug)]
pub struct TrainingOutcome {
    /// Final weights, per layer.
    pub weights: Vec<Vec<f32>>,
    /// Total samples processed.
    pub seen_samples: u64,
    /// Loss bookkeeping.
    pub stats: LossStats,
    /// Epochs every worker got through.
    pub epochs_completed: u64,
    /// Every worker's per-epoch report, ordered by epoch then worker.
    pub reports: Vec<WorkerReport>,
}

/// Trains `weights` with `config.worker_threads` workers.
///
/// `gradient` adds one batch's gradient for one layer into `grads` and
/// returns that batch's loss. It runs under the layer's lock.
///
/// # Errors
///
/// Returns [`TesseraError::Sync`] if the session cannot be built,
/// [`TesseraError::Config`] for an unusable plan, and
/// [`TesseraError::WorkerPanicked`] if `gradient` panicked. A worker whose
/// gradient panics stops computing but keeps meeting the barrier, so the
/// others finish.
pub fn train<G>(
    config: &SyncConfig,
    plan: &TrainingPlan,
    weights: Vec<Vec<f32>>,
    gradient: G,
) -> TesseraResult<TrainingOutcome>
where
    G: Fn(Step, &[f32], &mut [f32]) -> f32 + Sync,
{
    plan.validate()?;
    let layers = weights.into_iter().map(LayerState::new).collect();
    let session: TrainingSync<LayerState, LossStats> =
        TrainingSync::with_layers(config, layers, LossStats::default())?;
    let workers = config.worker_threads;

    tracing::info!(
        workers,
        epochs = plan.epochs,
        num_layers = session.layers().num_layers(),
        "training started"
    );

    let (tx, rx) = unbounded();
    let failed: Vec<usize> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let tx = tx.clone();
                let session = &session;
                let gradient = &gradient;
                s.spawn(move || run_worker(worker, session, plan, gradient, &tx))
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .filter_map(|(worker, handle)| match handle.join() {
                Ok(true) => None,
                Ok(false) | Err(_) => Some(worker),
            })
            .collect()
    });
    drop(tx);

    if let Some(&worker) = failed.first() {
        return Err(TesseraError::WorkerPanicked {
            role: format!("training worker {worker}"),
        });
    }

    let epochs_completed = session.barrier().generation() / 2;
    let seen_samples = session.layers().seen_samples().load(Ordering::Acquire);
    let (layers, stats) = session.finish();

    let mut reports: Vec<WorkerReport> = rx.try_iter().collect();
    reports.sort_by_key(|r| (r.epoch, r.worker));

    tracing::info!(seen_samples, epochs_completed, "training finished");
    Ok(TrainingOutcome {
        weights: layers.into_iter().map(|l| l.weights).collect(),
        seen_samples,
        stats,
        epochs_completed,
        reports,
    })
}

/// Returns `false` if the gradient function panicked.
fn run_worker<G>(
    worker: usize,
    session: &TrainingSync<LayerState, LossStats>,
    plan: &TrainingPlan,
    gradient: &G,
    reports: &Sender<WorkerReport>,
) -> bool
where
    G: Fn(Step, &[f32], &mut [f32]) -> f32 + Sync,
{
    let layers = session.layers();
    let mut healthy = true;

    for epoch in 0..plan.epochs {
        let mut loss = 0.0f64;
        let mut samples = 0u64;
        let mut batches = 0u64;

        if healthy {
            let _active = layers.enter();
            'batches: for batch in 0..plan.batches_per_epoch {
                for layer in 0..layers.num_layers() {
                    let step = Step {
                        worker,
                        epoch,
                        batch,
                        layer,
                    };
                    let result = layers.run_under_layer_lock(layer, |state| {
                        let LayerState { weights, grads } = state;
                        panic::catch_unwind(AssertUnwindSafe(|| gradient(step, weights, grads)))
                    });
                    match result {
                        Some(Ok(batch_loss)) => loss += f64::from(batch_loss),
                        Some(Err(_)) => {
                            tracing::error!(worker, epoch, layer, "gradient function panicked");
                            healthy = false;
                            break 'batches;
                        }
                        None => {}
                    }
                }
                layers.record_samples(plan.batch_size);
                samples += plan.batch_size;
                batches += 1;
            }
            session
                .locks()
                .with_stats(|stats| stats.record(epoch, loss, batches));
        }

        let led_update = session.barrier().wait().is_leader();
        if led_update {
            apply_update(session, plan);
        }
        session.barrier().wait();

        tracing::debug!(worker, epoch, samples, "epoch done");
        // The receiver outlives every worker.
        let _ = reports.send(WorkerReport {
            worker,
            epoch,
            samples,
            loss,
            led_update,
        });
    }

    healthy
}

/// Averages the accumulated gradients into the weights and clears them.
fn apply_update(session: &TrainingSync<LayerState, LossStats>, plan: &TrainingPlan) {
    let contributions = session.barrier().parties() * plan.batches_per_epoch;
    #[allow(clippy::cast_precision_loss)]
    let scale = plan.learning_rate / contributions as f32;
    let layers = session.layers();

    session.locks().with_weight(|_| {
        for layer in 0..layers.num_layers() {
            layers.run_under_layer_lock(layer, |state| state.apply(scale));
        }
    });
}
