//! Lock-serialized queues

use lock_api::{Mutex, MutexGuard, RawMutex};

use super::local::LocalQueue;
use crate::arena::ArenaConfig;
use crate::error::{PopError, PushError, Result};
use crate::sync::RawSpinLock;

/// [`SyncQueue`] behind `parking_lot`'s mutex.
pub type MutexQueue<T> = SyncQueue<T, parking_lot::RawMutex>;

/// [`SyncQueue`] behind the crate spin lock.
pub type SpinQueue<T> = SyncQueue<T, RawSpinLock>;

/// FIFO queue serialized by a single pluggable lock.
///
/// One lock guards the whole queue (links, counters, and the node arena
/// alike), so every operation is a short critical section over
/// [`LocalQueue`]. [`lock`](Self::lock) exposes the guard directly for
/// callers that want to batch several operations under one acquisition.
pub struct SyncQueue<T: 'static, R: RawMutex = parking_lot::RawMutex> {
    inner: Mutex<R, LocalQueue<T>>,
}

impl<T: Send + 'static, R: RawMutex> SyncQueue<T, R> {
    /// Creates a queue with the default node-arena configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(ArenaConfig::default())
    }

    /// Creates a queue whose node arena follows `config`.
    pub fn with_config(config: ArenaConfig) -> Result<Self> {
        Ok(Self { inner: Mutex::new(LocalQueue::with_config(config)?) })
    }

    /// Appends `value` at the tail.
    pub fn push(&self, value: T) -> core::result::Result<(), PushError<T>> {
        self.inner.lock().push(value)
    }

    /// Detaches the head node and moves its payload out.
    pub fn pop(&self) -> core::result::Result<T, PopError> {
        self.inner.lock().pop()
    }

    /// Number of queued items, read under the lock.
    pub fn size(&self) -> usize {
        self.inner.lock().size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Releases every node and resets the queue to empty.
    pub fn clear(&mut self) {
        self.inner.get_mut().clear();
    }

    /// Takes the queue lock and returns the guarded raw queue.
    ///
    /// Dropping the guard unlocks. Only the serialized variants have this
    /// method; the raw and lock-free queues have nothing to lock.
    pub fn lock(&self) -> MutexGuard<'_, R, LocalQueue<T>> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_under_mutex() {
        let queue: MutexQueue<u32> = MutexQueue::with_config(ArenaConfig::new(8)).unwrap();
        for i in 0..10 {
            queue.push(i).unwrap();
        }
        for i in 0..10 {
            assert_eq!(queue.pop(), Ok(i));
        }
        assert_eq!(queue.pop(), Err(PopError::Empty));
    }

    #[test]
    fn guard_batches_operations() {
        let queue: SpinQueue<u32> = SpinQueue::with_config(ArenaConfig::new(8)).unwrap();

        {
            let mut guard = queue.lock();
            guard.push(1).unwrap();
            guard.push(2).unwrap();
            assert_eq!(guard.size(), 2);
        }

        assert_eq!(queue.pop(), Ok(1));
        assert_eq!(queue.pop(), Ok(2));
    }

    #[test]
    fn producer_consumer_conservation() {
        const PER_PRODUCER: u64 = 5_000;

        let queue: Arc<SpinQueue<u64>> =
            Arc::new(SpinQueue::with_config(ArenaConfig::new(256)).unwrap());

        let producers: Vec<_> = (0..3u64)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let mut value = p * PER_PRODUCER + i;
                        loop {
                            match queue.push(value) {
                                Ok(()) => break,
                                Err(err) => {
                                    value = err.into_inner();
                                    thread::yield_now();
                                },
                            }
                        }
                    }
                })
            })
            .collect();

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut sum = 0u64;
                let mut count = 0u64;
                while count < 3 * PER_PRODUCER {
                    if let Ok(value) = queue.pop() {
                        sum += value;
                        count += 1;
                    } else {
                        thread::yield_now();
                    }
                }
                sum
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        let sum = consumer.join().unwrap();

        let total = 3 * PER_PRODUCER;
        assert_eq!(sum, total * (total - 1) / 2);
        assert!(queue.is_empty());
    }
}
