//! Lock-free stack
//!
//! # Safety
//!
//! Treiber protocol on an atomic head pointer, the same shape as the
//! arena's own free list:
//! - Push: write the new node's link = `{old head, IN_USE, index}`, CAS
//!   head to the node.
//! - Pop: load head, read its link, CAS head to the link's address.
//!
//! Pushers only ever write their own node's link, so no thread touches a
//! detached node. ABA on the head CAS is excluded by the same
//! single-owner discipline the free list relies on: a slot can only
//! cycle back to the stack head through its exclusive owner's
//! deallocate-then-allocate, never behind the back of a popper that has
//! not finished.

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::arena::slot::Slot;
use crate::arena::{Arena, ArenaConfig};
use crate::error::{PopError, PushError, Result};
use crate::tagged::{TaggedPtr, FLAG_IN_USE};
use crate::utils::Backoff;

/// Lock-free MPMC LIFO stack backed by a dedicated node arena.
///
/// The LIFO mirror of [`Queue`](crate::queue::Queue): same node arena,
/// same tagged link words, head-only protocol.
pub struct Stack<T: Send + 'static> {
    arena: Arena<T>,
    head: AtomicPtr<Slot<T>>,
}

// SAFETY: head is an atomic over arena-owned nodes; the arena is Send +
// Sync for T: Send.
unsafe impl<T: Send + 'static> Send for Stack<T> {}
// SAFETY: see above.
unsafe impl<T: Send + 'static> Sync for Stack<T> {}

impl<T: Send + 'static> Stack<T> {
    /// Creates a stack with the default node-arena configuration:
    /// chunks of 1024 nodes, unbounded, background prefetch.
    pub fn new() -> Result<Self> {
        let chunk = 1024;
        Self::with_config(ArenaConfig::new(chunk).with_alloc_threshold(chunk / 3))
    }

    /// Creates a stack whose node arena follows `config`.
    pub fn with_config(config: ArenaConfig) -> Result<Self> {
        Ok(Self { arena: Arena::with_config(config)?, head: AtomicPtr::new(ptr::null_mut()) })
    }

    /// Pushes `value` on top.
    ///
    /// An `Err` hands the value back: the node arena refused a slot.
    pub fn push(&self, value: T) -> core::result::Result<(), PushError<T>> {
        let node = match self.arena.allocate_slot(value) {
            Ok(slot) => slot.as_ptr(),
            Err(value) => return Err(PushError(value)),
        };

        let index = self.arena.registry_index();
        let mut backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire);

            // SAFETY: node is exclusively ours until the CAS publishes it.
            unsafe {
                (*node).link.store(TaggedPtr::new(head, FLAG_IN_USE, index), Ordering::Release);
            }

            if self
                .head
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }

            backoff.spin();
        }
    }

    /// Pops the top value.
    pub fn pop(&self) -> core::result::Result<T, PopError> {
        let mut backoff = Backoff::new();

        let slot = loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return Err(PopError::Empty);
            }

            // SAFETY: chunk memory stays mapped for the stack's lifetime.
            let link = unsafe { (*head).link.load(Ordering::Acquire) };
            if !link.in_use() {
                // Stale head: the node was popped and retired already.
                backoff.spin();
                continue;
            }

            if self
                .head
                .compare_exchange_weak(head, link.ptr(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break head;
            }

            backoff.spin();
        };

        // Detached by the CAS. One swap nulls the link and clears the
        // flag; the prior word doubles as a double-release check.
        // SAFETY: exclusive ownership established by the head CAS.
        let prior = unsafe {
            (*slot).link.swap(
                TaggedPtr::new(ptr::null_mut(), 0, self.arena.registry_index()),
                Ordering::AcqRel,
            )
        };
        if !prior.in_use() {
            return Err(PopError::DoubleFree);
        }

        // SAFETY: payload constructed by push, read exactly once; the
        // slot is not on the free list yet.
        let value = unsafe { ptr::read((*slot).payload_ptr()) };

        // SAFETY: detached, link nulled, flag cleared, payload moved out.
        unsafe { self.arena.retire_detached(NonNull::new_unchecked(slot)) };
        Ok(value)
    }

    /// Number of stacked items (the arena's in-use count).
    pub fn size(&self) -> usize {
        self.arena.length()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Releases every node and resets the stack to empty.
    pub fn clear(&mut self) {
        self.head.store(ptr::null_mut(), Ordering::Release);
        self.arena.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn lifo_single_thread() {
        let stack: Stack<u32> = Stack::with_config(ArenaConfig::new(8)).unwrap();

        for i in 0..20 {
            stack.push(i).unwrap();
        }
        for i in (0..20).rev() {
            assert_eq!(stack.pop(), Ok(i));
        }
        assert_eq!(stack.pop(), Err(PopError::Empty));
    }

    #[test]
    fn concurrent_conservation() {
        const PER_THREAD: u64 = 4_000;

        let stack: Arc<Stack<u64>> = Arc::new(Stack::with_config(ArenaConfig::new(256)).unwrap());

        let producers: Vec<_> = (0..2u64)
            .map(|p| {
                let stack = Arc::clone(&stack);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let mut value = p * PER_THREAD + i;
                        loop {
                            match stack.push(value) {
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

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let stack = Arc::clone(&stack);
                thread::spawn(move || {
                    let mut sum = 0u64;
                    let mut count = 0u64;
                    let mut idle = 0u32;
                    while count < PER_THREAD && idle < 1_000_000 {
                        match stack.pop() {
                            Ok(value) => {
                                sum += value;
                                count += 1;
                                idle = 0;
                            },
                            Err(_) => {
                                idle += 1;
                                thread::yield_now();
                            },
                        }
                    }
                    (sum, count)
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        let mut sum = 0u64;
        let mut count = 0u64;
        for consumer in consumers {
            let (s, c) = consumer.join().unwrap();
            sum += s;
            count += c;
        }

        // Drain anything the consumers left behind.
        while let Ok(value) = stack.pop() {
            sum += value;
            count += 1;
        }

        let total = 2 * PER_THREAD;
        assert_eq!(count, total);
        assert_eq!(sum, total * (total - 1) / 2);
    }
}
