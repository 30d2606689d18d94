//! # Memory Fences
//!
//! For hot paths that publish state through a plain atomic instead of a lock.
//!
//! ## Contract
//!
//! ```text
//! Writer:                         Reader:
//!   data.store(x, Relaxed)          acquire_fence()    <- before the read
//!   release_fence()  <- after       flag.load(Relaxed)
//!   flag.store(true, Relaxed)       data.load(Relaxed)
//! ```
//!
//! A release fence followed by a store, paired with a load followed by an
//! acquire fence that observes that store, gives the same happens-before edge a
//! mutex unlock/lock pair would. The fences do nothing on their own: the caller
//! carries the burden of pairing them around the right atomic.

use std::sync::atomic::{fence, Ordering};

/// Acquire fence. Issue immediately before reading state published by a
/// writer's [`release_fence`].
#[inline]
pub fn acquire_fence() {
    fence(Ordering::Acquire);
}

/// Release fence. Issue immediately after writing state that a reader will
/// pick up through an [`acquire_fence`].
#[inline]
pub fn release_fence() {
    fence(Ordering::Release);
}

/// Full (sequentially consistent) barrier.
#[inline]
pub fn full_fence() {
    fence(Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_release_acquire_publishes_payload() {
        for _ in 0..200 {
            let payload = Arc::new(AtomicU64::new(0));
            let ready = Arc::new(AtomicBool::new(false));

            let writer = {
                let payload = Arc::clone(&payload);
                let ready = Arc::clone(&ready);
                thread::spawn(move || {
                    payload.store(42, Ordering::Relaxed);
                    release_fence();
                    ready.store(true, Ordering::Relaxed);
                })
            };

            let reader = {
                let payload = Arc::clone(&payload);
                let ready = Arc::clone(&ready);
                thread::spawn(move || {
                    while !ready.load(Ordering::Relaxed) {
                        thread::yield_now();
                    }
                    acquire_fence();
                    payload.load(Ordering::Relaxed)
                })
            };

            writer.join().unwrap();
            assert_eq!(reader.join().unwrap(), 42);
        }
    }

    #[test]
    fn test_full_fence_is_callable_anywhere() {
        full_fence();
        full_fence();
    }
}
