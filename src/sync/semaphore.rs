//! Counting semaphore

use parking_lot::{Condvar, Mutex};

/// A condvar-backed counting semaphore with a hard ceiling.
///
/// `release` saturates at `max`, so a binary semaphore (`max == 1`) can be
/// signaled from many call sites and still admit exactly one wake-up, the
/// shape the arenas' prefetch trigger needs.
pub struct Semaphore {
    count: Mutex<usize>,
    cv: Condvar,
    max: usize,
}

impl Semaphore {
    /// Creates a semaphore with `initial` permits, at most `max`.
    pub fn new(max: usize, initial: usize) -> Self {
        let max = max.max(1);
        Self { count: Mutex::new(initial.min(max)), cv: Condvar::new(), max }
    }

    /// A zero-permit binary semaphore.
    pub fn binary() -> Self {
        Self::new(1, 0)
    }

    /// Blocks until a permit is available, then takes it.
    pub fn acquire(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cv.wait(&mut count);
        }
        *count -= 1;
    }

    /// Returns one permit and wakes one waiter; a no-op at the ceiling.
    pub fn release(&self) {
        let mut count = self.count.lock();
        if *count < self.max {
            *count += 1;
            self.cv.notify_one();
        }
    }
}
