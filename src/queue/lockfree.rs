//! Lock-free queue
//!
//! # Safety
//!
//! Michael–Scott-shaped protocol without a dummy node, specialized for
//! nodes whose next-link is the arena slot's tagged word:
//!
//! - `head`/`tail` are plain atomic node pointers.
//! - A queued node's link word holds `{successor, IN_USE, arena index}`.
//!   Every link CAS covers the whole word, and a pop clears `IN_USE` in
//!   the very swap that detaches the node's link, so a pusher can never
//!   append onto a detached node and never corrupt the free list.
//!
//! ## Invariants
//!
//! 1. `tail` is null, or a node that is (or a moment ago was) the last
//!    node reachable from `head`.
//! 2. `head` is null exactly when the queue is empty, up to (3).
//! 3. `head == null && tail != null` occurs only while the first node of
//!    a fresh run is being pushed or while an emptying pop has not fixed
//!    `tail` up yet. An observer may CAS `tail` back to null once the
//!    tail node is provably stale (its flag is clear); a live tail in
//!    this state belongs to a peer that resolves it within one CAS.
//!
//! A push linearizes at its link CAS (or the empty-tail CAS for the first
//! node); a pop linearizes at its head CAS. Per queue, pops observe
//! payloads in push order.

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::arena::slot::Slot;
use crate::arena::{Arena, ArenaConfig};
use crate::error::{PopError, PushError, Result};
use crate::tagged::TaggedPtr;
use crate::utils::Backoff;

/// Lock-free MPMC FIFO queue backed by a dedicated node arena.
///
/// `push` and `pop` are safe from any thread. `size` is the arena's
/// in-use count. By default the node arena prefetches chunks in the
/// background (threshold = chunk_size / 3, matching the allocator's
/// sweet spot for steady producers), so a push can transiently report
/// failure while the worker catches up; retry or treat as backpressure.
///
/// # Example
///
/// ```
/// use arenaq::Queue;
///
/// let queue: Queue<u32> = Queue::new().unwrap();
/// queue.push(7).unwrap();
/// assert_eq!(queue.pop().unwrap(), 7);
/// assert!(queue.pop().is_err());
/// ```
pub struct Queue<T: Send + 'static> {
    arena: Arena<T>,
    head: AtomicPtr<Slot<T>>,
    tail: AtomicPtr<Slot<T>>,
}

// SAFETY: head/tail are atomics over arena-owned nodes; the arena is
// already Send + Sync for T: Send.
unsafe impl<T: Send + 'static> Send for Queue<T> {}
// SAFETY: see above.
unsafe impl<T: Send + 'static> Sync for Queue<T> {}

impl<T: Send + 'static> Queue<T> {
    /// Creates a queue with the default node-arena configuration:
    /// chunks of 1024 nodes, unbounded, background prefetch.
    pub fn new() -> Result<Self> {
        let chunk = 1024;
        Self::with_config(ArenaConfig::new(chunk).with_alloc_threshold(chunk / 3))
    }

    /// Creates a queue whose node arena follows `config`.
    pub fn with_config(config: ArenaConfig) -> Result<Self> {
        Ok(Self {
            arena: Arena::with_config(config)?,
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
        })
    }

    /// Appends `value` at the tail.
    ///
    /// An `Err` hands the value back: the node arena refused a slot.
    pub fn push(&self, value: T) -> core::result::Result<(), PushError<T>> {
        let node = match self.arena.allocate_slot(value) {
            Ok(slot) => slot.as_ptr(),
            Err(value) => return Err(PushError(value)),
        };

        let mut backoff = Backoff::new();
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);

            if head.is_null() && !tail.is_null() {
                // Transient state: either an emptying pop left a stale
                // tail, or another first-node push is between its two
                // CASes. Only a *retired* tail (flag clear) is provably
                // stale; resetting a live one would strand whatever its
                // pusher installs next. In-flight peers resolve the state
                // themselves within one CAS; wait them out.
                // SAFETY: chunk memory stays mapped for the queue's
                // lifetime.
                let tail_link = unsafe { (*tail).link.load(Ordering::Acquire) };
                if !tail_link.in_use() {
                    let _ = self.tail.compare_exchange_weak(
                        tail,
                        ptr::null_mut(),
                        Ordering::SeqCst,
                        Ordering::Relaxed,
                    );
                }
                backoff.spin();
                continue;
            }

            if tail.is_null() {
                // Empty queue: install the first node.
                if self
                    .tail
                    .compare_exchange_weak(
                        ptr::null_mut(),
                        node,
                        Ordering::SeqCst,
                        Ordering::Relaxed,
                    )
                    .is_err()
                {
                    backoff.spin();
                    continue;
                }

                if head.is_null() {
                    // A failed CAS here means another thread already
                    // advanced head past us, consistent with invariant 1.
                    let _ = self.head.compare_exchange(
                        ptr::null_mut(),
                        node,
                        Ordering::SeqCst,
                        Ordering::Relaxed,
                    );
                }
                break;
            }

            // SAFETY: nodes live in the queue's arena; chunk memory stays
            // mapped for the queue's lifetime.
            let tail_link = unsafe { (*tail).link.load(Ordering::Acquire) };

            if !tail_link.in_use() {
                // The observed tail was already retired; head/tail are
                // about to be (or were) fixed up. Reload.
                backoff.spin();
                continue;
            }

            if !tail_link.ptr().is_null() {
                // Another pusher linked its node but has not swung tail
                // yet.
                backoff.spin();
                continue;
            }

            // SAFETY: same as the load above; the CAS covers the whole
            // word, so a concurrent retire or competing link makes it
            // fail.
            if unsafe {
                (*tail).link.compare_exchange_weak(
                    tail_link,
                    tail_link.with_ptr(node),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
            }
            .is_err()
            {
                backoff.spin();
                continue;
            }

            // Only the link-CAS winner reaches this line; no other pusher
            // races the swing.
            self.tail.swap(node, Ordering::AcqRel);
            break;
        }

        Ok(())
    }

    /// Detaches the head node and moves its payload out.
    pub fn pop(&self) -> core::result::Result<T, PopError> {
        let mut backoff = Backoff::new();

        let (slot, next) = loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return Err(PopError::Empty);
            }

            // SAFETY: arena chunk memory stays mapped for the queue's
            // lifetime, even if the node was concurrently retired.
            let link = unsafe { (*head).link.load(Ordering::Acquire) };
            if !link.in_use() {
                // Stale head pointer: the node was already popped and
                // retired. Reload.
                backoff.spin();
                continue;
            }

            let next = link.ptr();
            if self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break (head, next);
            }

            backoff.spin();
        };

        // The node is ours. One swap nulls the link *and* clears IN_USE,
        // so from this instant no pusher can append onto the detached
        // node (their link CAS requires the flag). The prior word also
        // surfaces a pusher that squeezed in between our head CAS and
        // this swap, possible only when we took the last node.
        // SAFETY: exclusive ownership established by the head CAS.
        let prior = unsafe {
            (*slot).link.swap(
                TaggedPtr::new(ptr::null_mut(), 0, self.arena.registry_index()),
                Ordering::AcqRel,
            )
        };

        if !prior.in_use() {
            // The node was already released behind our back: an
            // application-level double pop/free.
            return Err(PopError::DoubleFree);
        }

        if next.is_null() {
            let orphan = prior.ptr();
            if !orphan.is_null() {
                // A pusher linked a run onto the node after we detached
                // it. Its chain is unreachable from head, so adopt it:
                // head is still null (tail stays non-null until the
                // orphan pusher swings it, keeping first-node installs
                // out), making this CAS succeed.
                let _ = self.head.compare_exchange(
                    ptr::null_mut(),
                    orphan,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                );
            } else {
                // We emptied the queue; drop the stale tail reference.
                // A concurrent pusher may have done it for us already.
                let _ = self.tail.compare_exchange(
                    slot,
                    ptr::null_mut(),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                );
            }
        }

        // SAFETY: payload constructed by push, read exactly once; the
        // slot is not on the free list yet, so nobody can reuse it.
        let value = unsafe { ptr::read((*slot).payload_ptr()) };

        // SAFETY: detached, link nulled, flag cleared, payload moved out.
        unsafe { self.arena.retire_detached(NonNull::new_unchecked(slot)) };
        Ok(value)
    }

    /// Number of queued items (the arena's in-use count).
    pub fn size(&self) -> usize {
        self.arena.length()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Releases every node and resets the queue to empty.
    pub fn clear(&mut self) {
        self.head.store(ptr::null_mut(), Ordering::Release);
        self.tail.store(ptr::null_mut(), Ordering::Release);
        self.arena.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_queue() -> Queue<u32> {
        Queue::with_config(ArenaConfig::new(8)).unwrap()
    }

    #[test]
    fn fifo_single_thread() {
        let queue = small_queue();
        for i in 0..50 {
            queue.push(i).unwrap();
        }
        for i in 0..50 {
            assert_eq!(queue.pop(), Ok(i));
        }
        assert_eq!(queue.pop(), Err(PopError::Empty));
    }

    #[test]
    fn empty_transition() {
        let queue = small_queue();

        // Fill and fully drain several times to cross the empty state.
        for round in 0..10 {
            queue.push(round).unwrap();
            queue.push(round + 100).unwrap();
            assert_eq!(queue.pop(), Ok(round));
            assert_eq!(queue.pop(), Ok(round + 100));
            assert_eq!(queue.pop(), Err(PopError::Empty));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_releases_nodes() {
        let mut queue = small_queue();
        for i in 0..20 {
            queue.push(i).unwrap();
        }
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), Err(PopError::Empty));

        queue.push(1).unwrap();
        assert_eq!(queue.pop(), Ok(1));
    }
}
