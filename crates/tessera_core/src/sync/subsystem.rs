//! # Subsystem Lock Set
//!
//! Five coarse locks, one per model-wide category of shared state:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────┐
//! │ Network  │ Weight   │ Data     │ Gpu      │ Stats    │
//! │ structure│ accum.   │ dataset  │ transfer │ counters │
//! └──────────┴──────────┴──────────┴──────────┴──────────┘
//!      independent: holding one never blocks another
//! ```
//!
//! One set is built per session and passed by reference to every participant.
//! There is no process-wide instance.
//!
//! ## Usage constraint
//!
//! The set never nests its own locks. A caller that takes a category lock
//! from inside another (or from inside a layer lock of
//! [`LayerSync`](super::LayerSync)) must use one global acquisition order
//! across all threads, otherwise it can deadlock. The primitives do not
//! detect this.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::guarded::GuardedRegion;

/// The five categories of model-wide state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// Network structure mutation (layer insertion, resizing, weight I/O).
    Network,
    /// Weight/gradient accumulation.
    Weight,
    /// Shared dataset access.
    Data,
    /// Host/device transfers.
    Gpu,
    /// Statistics updates.
    Stats,
}

impl Subsystem {
    /// All categories, in index order.
    pub const ALL: [Self; 5] = [
        Self::Network,
        Self::Weight,
        Self::Data,
        Self::Gpu,
        Self::Stats,
    ];

    #[inline]
    const fn index(self) -> usize {
        match self {
            Self::Network => 0,
            Self::Weight => 1,
            Self::Data => 2,
            Self::Gpu => 3,
            Self::Stats => 4,
        }
    }

    /// Lowercase category name, as used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Weight => "weight",
            Self::Data => "data",
            Self::Gpu => "gpu",
            Self::Stats => "stats",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Five independent guarded regions, one per [`Subsystem`].
///
/// Each type parameter is the state its category protects. All default to
/// `()`, in which case the set is the bare lock topology and work items carry
/// their own data.
///
/// ```rust
/// use tessera_core::{Subsystem, SubsystemLocks};
///
/// let locks: SubsystemLocks = SubsystemLocks::default();
/// let mut applied = 0;
/// locks.run_exclusive(Subsystem::Weight, || applied += 1);
/// assert_eq!(applied, 1);
/// ```
pub struct SubsystemLocks<N = (), W = (), D = (), G = (), S = ()> {
    network: GuardedRegion<N>,
    weight: GuardedRegion<W>,
    data: GuardedRegion<D>,
    gpu: GuardedRegion<G>,
    stats: GuardedRegion<S>,
    acquisitions: [AtomicU64; 5],
}

impl<N, W, D, G, S> SubsystemLocks<N, W, D, G, S> {
    /// Builds the set around the state each category protects.
    #[must_use]
    pub fn new(network: N, weight: W, data: D, gpu: G, stats: S) -> Self {
        tracing::debug!("subsystem lock set created");
        Self {
            network: GuardedRegion::new(network),
            weight: GuardedRegion::new(weight),
            data: GuardedRegion::new(data),
            gpu: GuardedRegion::new(gpu),
            stats: GuardedRegion::new(stats),
            acquisitions: Default::default(),
        }
    }

    /// Runs `work` holding only the network lock.
    pub fn with_network<R>(&self, work: impl FnOnce(&mut N) -> R) -> R {
        self.count(Subsystem::Network);
        self.network.run(work)
    }

    /// Runs `work` holding only the weight lock.
    pub fn with_weight<R>(&self, work: impl FnOnce(&mut W) -> R) -> R {
        self.count(Subsystem::Weight);
        self.weight.run(work)
    }

    /// Runs `work` holding only the data lock.
    pub fn with_data<R>(&self, work: impl FnOnce(&mut D) -> R) -> R {
        self.count(Subsystem::Data);
        self.data.run(work)
    }

    /// Runs `work` holding only the GPU lock.
    pub fn with_gpu<R>(&self, work: impl FnOnce(&mut G) -> R) -> R {
        self.count(Subsystem::Gpu);
        self.gpu.run(work)
    }

    /// Runs `work` holding only the stats lock.
    pub fn with_stats<R>(&self, work: impl FnOnce(&mut S) -> R) -> R {
        self.count(Subsystem::Stats);
        self.stats.run(work)
    }

    /// Returns whether some thread currently holds the category's lock.
    #[must_use]
    pub fn is_held(&self, subsystem: Subsystem) -> bool {
        match subsystem {
            Subsystem::Network => self.network.is_held(),
            Subsystem::Weight => self.weight.is_held(),
            Subsystem::Data => self.data.is_held(),
            Subsystem::Gpu => self.gpu.is_held(),
            Subsystem::Stats => self.stats.is_held(),
        }
    }

    /// Number of times the category's lock has been requested.
    #[must_use]
    pub fn acquisitions(&self, subsystem: Subsystem) -> u64 {
        self.acquisitions[subsystem.index()].load(Ordering::Relaxed)
    }

    /// Consumes the set, returning each category's state.
    #[must_use]
    pub fn into_inner(self) -> (N, W, D, G, S) {
        (
            self.network.into_inner(),
            self.weight.into_inner(),
            self.data.into_inner(),
            self.gpu.into_inner(),
            self.stats.into_inner(),
        )
    }

    #[inline]
    fn count(&self, subsystem: Subsystem) {
        self.acquisitions[subsystem.index()].fetch_add(1, Ordering::Relaxed);
    }
}

impl SubsystemLocks {
    /// Runs `work` holding the named category's lock.
    ///
    /// Only available on the bare topology, where every category protects
    /// `()` and the work item carries its own data.
    pub fn run_exclusive<R>(&self, subsystem: Subsystem, work: impl FnOnce() -> R) -> R {
        match subsystem {
            Subsystem::Network => self.with_network(|_| work()),
            Subsystem::Weight => self.with_weight(|_| work()),
            Subsystem::Data => self.with_data(|_| work()),
            Subsystem::Gpu => self.with_gpu(|_| work()),
            Subsystem::Stats => self.with_stats(|_| work()),
        }
    }
}

impl<N: Default, W: Default, D: Default, G: Default, S: Default> Default
    for SubsystemLocks<N, W, D, G, S>
{
    fn default() -> Self {
        Self::new(N::default(), W::default(), D::default(), G::default(), S::default())
    }
}

impl<N, W, D, G, S> fmt::Debug for SubsystemLocks<N, W, D, G, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("SubsystemLocks");
        for subsystem in Subsystem::ALL {
            s.field(subsystem.name(), &self.acquisitions(subsystem));
        }
        s.finish()
    }
}
