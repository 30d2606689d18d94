//! # Guarded Region
//!
//! "Run this closure exclusively while holding state S."
//!
//! The lock is held for exactly the duration of the closure and released on
//! every exit path, including a panic inside the closure (`parking_lot` locks
//! do not poison).

use parking_lot::Mutex;

/// State owned behind a mutex, reachable only from inside [`GuardedRegion::run`].
///
/// # Example
///
/// ```rust
/// use tessera_core::GuardedRegion;
///
/// let totals = GuardedRegion::new(0u64);
/// totals.run(|t| *t += 5);
/// assert_eq!(totals.run(|t| *t), 5);
/// ```
#[derive(Debug, Default)]
pub struct GuardedRegion<T> {
    state: Mutex<T>,
}

impl<T> GuardedRegion<T> {
    /// Wraps `state` in a new region.
    #[must_use]
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Runs `work` while holding the region's lock.
    ///
    /// Blocks while another thread is inside the region.
    #[inline]
    pub fn run<R>(&self, work: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.state.lock();
        work(&mut guard)
    }

    /// Runs `work` only if the lock is free right now.
    ///
    /// Returns `None` without running anything when the region is busy.
    #[inline]
    pub fn try_run<R>(&self, work: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.state.try_lock()?;
        Some(work(&mut guard))
    }

    /// Returns whether some thread is inside the region.
    #[inline]
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state.is_locked()
    }

    /// Direct access when the region is not shared.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.state.get_mut()
    }

    /// Consumes the region, returning the protected state.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.state.into_inner()
    }
}
