//! Broadcast event

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::WaitOutcome;

/// A condition-variable-backed broadcast event.
///
/// `wait` may wake spuriously; callers re-check their own state, as the
/// mailbox does.
pub struct Event {
    lock: Mutex<()>,
    cv: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self { lock: Mutex::new(()), cv: Condvar::new() }
    }

    /// Blocks for at most `timeout` or until [`notify`](Self::notify).
    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        let mut guard = self.lock.lock();
        if self.cv.wait_for(&mut guard, timeout).timed_out() {
            WaitOutcome::Timeout
        } else {
            WaitOutcome::Signaled
        }
    }

    /// Wakes every waiting thread.
    pub fn notify(&self) {
        self.cv.notify_all();
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
