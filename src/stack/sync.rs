//! Lock-serialized stacks

use lock_api::{Mutex, MutexGuard, RawMutex};

use super::local::LocalStack;
use crate::arena::ArenaConfig;
use crate::error::{PopError, PushError, Result};
use crate::sync::RawSpinLock;

/// [`SyncStack`] behind `parking_lot`'s mutex.
pub type MutexStack<T> = SyncStack<T, parking_lot::RawMutex>;

/// [`SyncStack`] behind the crate spin lock.
pub type SpinStack<T> = SyncStack<T, RawSpinLock>;

/// LIFO stack serialized by a single pluggable lock.
pub struct SyncStack<T: 'static, R: RawMutex = parking_lot::RawMutex> {
    inner: Mutex<R, LocalStack<T>>,
}

impl<T: Send + 'static, R: RawMutex> SyncStack<T, R> {
    /// Creates a stack with the default node-arena configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(ArenaConfig::default())
    }

    /// Creates a stack whose node arena follows `config`.
    pub fn with_config(config: ArenaConfig) -> Result<Self> {
        Ok(Self { inner: Mutex::new(LocalStack::with_config(config)?) })
    }

    /// Pushes `value` on top.
    pub fn push(&self, value: T) -> core::result::Result<(), PushError<T>> {
        self.inner.lock().push(value)
    }

    /// Pops the top value.
    pub fn pop(&self) -> core::result::Result<T, PopError> {
        self.inner.lock().pop()
    }

    /// Number of stacked items, read under the lock.
    pub fn size(&self) -> usize {
        self.inner.lock().size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Releases every node and resets the stack to empty.
    pub fn clear(&mut self) {
        self.inner.get_mut().clear();
    }

    /// Takes the stack lock and returns the guarded raw stack.
    pub fn lock(&self) -> MutexGuard<'_, R, LocalStack<T>> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifo_under_lock() {
        let stack: SpinStack<u32> = SpinStack::with_config(ArenaConfig::new(8)).unwrap();
        stack.push(1).unwrap();
        stack.push(2).unwrap();
        assert_eq!(stack.pop(), Ok(2));
        assert_eq!(stack.pop(), Ok(1));
        assert_eq!(stack.pop(), Err(PopError::Empty));
    }
}
