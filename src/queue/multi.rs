//! Multi-queue fan-out

use core::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use dashmap::DashMap;

use super::lockfree::Queue;
use crate::arena::ArenaConfig;
use crate::error::{PopError, PushError, Result};

/// An array of lock-free queues with per-thread push routing.
///
/// Each producer thread is pinned to one sub-queue on first touch (ids
/// hand out sequentially, taken modulo the queue count), which keeps
/// same-thread pushes off each other's cache lines. `pop` round-robins
/// across the sub-queues from a rotating cursor.
///
/// Per sub-queue the FIFO guarantee holds; across sub-queues no order is
/// promised.
pub struct MultiQueue<T: Send + 'static> {
    queues: Box<[Queue<T>]>,
    threads: DashMap<ThreadId, usize>,
    next_thread: AtomicUsize,
    cursor: AtomicUsize,
}

impl<T: Send + 'static> MultiQueue<T> {
    /// Creates a fan-out of `queues` lock-free queues (at least 1).
    pub fn new(queues: usize) -> Result<Self> {
        Self::with_config(queues, ArenaConfig::default())
    }

    /// Creates a fan-out whose sub-queues' node arenas follow `config`.
    pub fn with_config(queues: usize, config: ArenaConfig) -> Result<Self> {
        let count = queues.max(1);
        let mut built = Vec::with_capacity(count);
        for _ in 0..count {
            built.push(Queue::with_config(config.clone())?);
        }

        Ok(Self {
            queues: built.into_boxed_slice(),
            threads: DashMap::new(),
            next_thread: AtomicUsize::new(0),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Sub-queue index of the calling thread, assigned on first touch.
    fn local_index(&self) -> usize {
        let id = thread::current().id();
        let assigned = *self
            .threads
            .entry(id)
            .or_insert_with(|| self.next_thread.fetch_add(1, Ordering::Relaxed));
        assigned % self.queues.len()
    }

    /// Appends `value` on the calling thread's sub-queue.
    pub fn push(&self, value: T) -> core::result::Result<(), PushError<T>> {
        self.queues[self.local_index()].push(value)
    }

    /// Pops from the first non-empty sub-queue, starting at a rotating
    /// cursor so consumers spread across the fan-out.
    pub fn pop(&self) -> core::result::Result<T, PopError> {
        let count = self.queues.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);

        for offset in 0..count {
            match self.queues[(start + offset) % count].pop() {
                Ok(value) => return Ok(value),
                Err(PopError::Empty) => continue,
                Err(err) => return Err(err),
            }
        }

        Err(PopError::Empty)
    }

    /// Total queued items across all sub-queues.
    pub fn size(&self) -> usize {
        self.queues.iter().map(Queue::size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of sub-queues.
    pub fn lanes(&self) -> usize {
        self.queues.len()
    }

    /// Releases every node in every sub-queue.
    pub fn clear(&mut self) {
        for queue in self.queues.iter_mut() {
            queue.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_lanes_clamps_to_one() {
        let multi: MultiQueue<u8> = MultiQueue::with_config(0, ArenaConfig::new(4)).unwrap();
        assert_eq!(multi.lanes(), 1);
    }

    #[test]
    fn single_thread_roundtrip() {
        let multi: MultiQueue<u32> = MultiQueue::with_config(4, ArenaConfig::new(8)).unwrap();

        for i in 0..20 {
            multi.push(i).unwrap();
        }
        assert_eq!(multi.size(), 20);

        let mut seen: Vec<u32> = (0..20).map(|_| multi.pop().unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
        assert!(multi.is_empty());
    }

    #[test]
    fn same_thread_stays_fifo() {
        // One producer thread lands on one sub-queue, so its own values
        // come back in order even through the fan-out.
        let multi: MultiQueue<u32> = MultiQueue::with_config(3, ArenaConfig::new(8)).unwrap();

        for i in 0..10 {
            multi.push(i).unwrap();
        }
        for i in 0..10 {
            assert_eq!(multi.pop(), Ok(i));
        }
    }
}
