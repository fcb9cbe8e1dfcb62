//! Spin lock
//!
//! An atomic-bool test-and-test-and-set lock. In highly contended short
//! critical sections it beats a parking mutex; it never yields to the
//! scheduler, so critical sections must stay tiny.

use core::hint;
use core::sync::atomic::{AtomicBool, Ordering};

/// Raw spin lock implementing [`lock_api::RawMutex`].
///
/// Plug it into any structure parameterized over a raw mutex, e.g.
/// [`SyncQueue<T, RawSpinLock>`](crate::queue::SyncQueue).
pub struct RawSpinLock {
    locked: AtomicBool,
}

unsafe impl lock_api::RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: RawSpinLock = RawSpinLock { locked: AtomicBool::new(false) };

    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock(&self) {
        while self.locked.swap(true, Ordering::Acquire) {
            // Spin on a plain load to keep the line shared until it clears.
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        !self.locked.swap(true, Ordering::Acquire)
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// A mutex backed by [`RawSpinLock`].
pub type SpinLock<T> = lock_api::Mutex<RawSpinLock, T>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counts_under_contention() {
        let lock = Arc::new(SpinLock::new(0u64));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*lock.lock(), 80_000);
    }

    #[test]
    fn try_lock_reports_prior_state() {
        let lock = SpinLock::new(());
        let guard = lock.try_lock();
        assert!(guard.is_some());
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
