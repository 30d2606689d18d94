//! # Layer Sync Context
//!
//! Fine-grained exclusion for a layered model: one lock per layer.
//!
//! ```text
//!   Worker A ──run(0)──┐        Worker B ──run(2)──┐
//!                      ▼                           ▼
//!   ┌─────────┬─────────┬─────────┬─────────┬─────────┐
//!   │ Layer 0 │ Layer 1 │ Layer 2 │ Layer 3 │   ...   │   fixed at creation
//!   └─────────┴─────────┴─────────┴─────────┴─────────┘
//!   active_threads: AtomicUsize    seen_samples: AtomicU64   (no lock)
//! ```
//!
//! Calls on the same layer run in a strict total order. Calls on different
//! layers run concurrently and have no ordering between them.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{SyncError, SyncResult};

/// Per-layer locks plus the session's hot-path counters.
///
/// `T` is the state each layer's lock protects (its weights, gradient
/// accumulators...). With the default `()` the context is the bare lock
/// array and work items carry their own data.
///
/// # Example
///
/// ```rust
/// use tessera_core::LayerSync;
///
/// let ctx = LayerSync::from_layers(vec![vec![0.0f32; 4]; 3]);
///
/// ctx.run_under_layer_lock(1, |w| w[0] += 0.5);
///
/// // Out of range and negative indices are silent no-ops.
/// assert!(ctx.run_under_layer_lock(3, |w| w[0] += 1.0).is_none());
/// assert!(ctx.run_under_layer_lock(-1, |w| w[0] += 1.0).is_none());
/// ```
pub struct LayerSync<T = ()> {
    layers: Box<[Mutex<T>]>,
    active_threads: AtomicUsize,
    seen_samples: AtomicU64,
}

impl<T> LayerSync<T> {
    /// Creates a context with `num_layers` default-initialized layers.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Allocation`] if storage for the layer locks cannot
    /// be reserved. No lock has been created at that point.
    pub fn new(num_layers: usize) -> SyncResult<Self>
    where
        T: Default,
    {
        Self::from_fn(num_layers, |_| T::default())
    }

    /// Creates a context whose layer `i` starts as `init(i)`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Allocation`] if storage for the layer locks cannot
    /// be reserved.
    pub fn from_fn(num_layers: usize, init: impl FnMut(usize) -> T) -> SyncResult<Self> {
        let mut layers = Vec::new();
        layers
            .try_reserve_exact(num_layers)
            .map_err(|_| SyncError::Allocation {
                what: "layer locks",
                requested: num_layers,
            })?;
        layers.extend((0..num_layers).map(init).map(Mutex::new));

        tracing::debug!(num_layers, "layer sync context created");
        Ok(Self::with_cells(layers.into_boxed_slice()))
    }

    /// Creates a context from existing per-layer states.
    #[must_use]
    pub fn from_layers(states: Vec<T>) -> Self {
        let layers: Box<[Mutex<T>]> = states.into_iter().map(Mutex::new).collect();
        tracing::debug!(num_layers = layers.len(), "layer sync context created");
        Self::with_cells(layers)
    }

    fn with_cells(layers: Box<[Mutex<T>]>) -> Self {
        Self {
            layers,
            active_threads: AtomicUsize::new(0),
            seen_samples: AtomicU64::new(0),
        }
    }

    /// Number of layers (and layer locks). Fixed for the context's lifetime.
    #[inline]
    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Runs `work` on layer `layer_idx` while holding that layer's lock.
    ///
    /// Any index outside `[0, num_layers)`, negative ones included, returns
    /// `None` immediately: no lock is taken and `work` is not called.
    #[inline]
    pub fn run_under_layer_lock<I, R>(
        &self,
        layer_idx: I,
        work: impl FnOnce(&mut T) -> R,
    ) -> Option<R>
    where
        I: TryInto<usize>,
    {
        let cell = self.cell(layer_idx)?;
        let mut guard = cell.lock();
        Some(work(&mut guard))
    }

    /// Checked variant of [`LayerSync::run_under_layer_lock`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidLayerIndex`] for an index that does not fit
    /// a `usize` and [`SyncError::LayerOutOfRange`] for one past the end.
    /// `work` is not called in either case.
    pub fn try_run_under_layer_lock<I, R>(
        &self,
        layer_idx: I,
        work: impl FnOnce(&mut T) -> R,
    ) -> SyncResult<R>
    where
        I: TryInto<usize> + Copy + fmt::Display,
    {
        let index: usize = layer_idx
            .try_into()
            .map_err(|_| SyncError::InvalidLayerIndex {
                index: layer_idx.to_string(),
            })?;
        let cell = self.layers.get(index).ok_or(SyncError::LayerOutOfRange {
            index,
            num_layers: self.num_layers(),
        })?;
        let mut guard = cell.lock();
        Ok(work(&mut guard))
    }

    /// Runs `work` only if layer `layer_idx` is free right now.
    ///
    /// Returns `None` if the index is invalid or the layer is busy.
    pub fn run_if_free<I, R>(&self, layer_idx: I, work: impl FnOnce(&mut T) -> R) -> Option<R>
    where
        I: TryInto<usize>,
    {
        let mut guard = self.cell(layer_idx)?.try_lock()?;
        Some(work(&mut guard))
    }

    /// Returns whether some thread holds layer `layer_idx`'s lock.
    ///
    /// `false` for an invalid index.
    #[must_use]
    pub fn is_layer_held<I: TryInto<usize>>(&self, layer_idx: I) -> bool {
        self.cell(layer_idx).is_some_and(Mutex::is_locked)
    }

    /// Gauge of workers currently inside a training step.
    ///
    /// Callers update it directly; see also [`LayerSync::enter`].
    #[inline]
    #[must_use]
    pub fn active_threads(&self) -> &AtomicUsize {
        &self.active_threads
    }

    /// Monotonic count of samples processed this session.
    #[inline]
    #[must_use]
    pub fn seen_samples(&self) -> &AtomicU64 {
        &self.seen_samples
    }

    /// Adds `count` to `seen_samples`, returning the previous total.
    #[inline]
    pub fn record_samples(&self, count: u64) -> u64 {
        self.seen_samples.fetch_add(count, Ordering::Relaxed)
    }

    /// Registers the calling thread in `active_threads` until the guard drops.
    #[must_use]
    pub fn enter(&self) -> ActiveThreadGuard<'_> {
        self.active_threads.fetch_add(1, Ordering::AcqRel);
        ActiveThreadGuard {
            active_threads: &self.active_threads,
        }
    }

    /// Consumes the context, returning every layer's state in index order.
    #[must_use]
    pub fn into_layers(self) -> Vec<T> {
        self.layers
            .into_vec()
            .into_iter()
            .map(Mutex::into_inner)
            .collect()
    }

    #[inline]
    fn cell<I: TryInto<usize>>(&self, layer_idx: I) -> Option<&Mutex<T>> {
        let index = layer_idx.try_into().ok()?;
        self.layers.get(index)
    }
}

impl<T> fmt::Debug for LayerSync<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerSync")
            .field("num_layers", &self.num_layers())
            .field("active_threads", &self.active_threads.load(Ordering::Relaxed))
            .field("seen_samples", &self.seen_samples.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Membership in [`LayerSync::active_threads`].
///
/// Decrements the gauge when dropped.
#[must_use = "the thread leaves the active set as soon as the guard is dropped"]
pub struct ActiveThreadGuard<'a> {
    active_threads: &'a AtomicUsize,
}

impl Drop for ActiveThreadGuard<'_> {
    fn drop(&mut self) {
        self.active_threads.fetch_sub(1, Ordering::AcqRel);
    }
}
