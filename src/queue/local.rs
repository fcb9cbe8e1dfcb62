//! Single-owner queue

use core::ptr::{self, NonNull};

use crate::arena::slot::Slot;
use crate::arena::{ArenaConfig, LocalArena};
use crate::error::{PopError, PushError, Result};

/// Singly-linked FIFO queue for exactly one owner.
///
/// No synchronization whatsoever; `&mut self` receivers make that a
/// compile-time guarantee. [`SyncQueue`](super::SyncQueue) wraps this
/// type in a lock to produce the serialized variants.
pub struct LocalQueue<T: 'static> {
    arena: LocalArena<T>,
    head: *mut Slot<T>,
    tail: *mut Slot<T>,
}

// SAFETY: the queue owns its arena and nodes outright; moving it moves T
// values, sound whenever T: Send. Deliberately not Sync.
unsafe impl<T: Send + 'static> Send for LocalQueue<T> {}

impl<T: 'static> LocalQueue<T> {
    /// Creates a queue with the default node-arena configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(ArenaConfig::default())
    }

    /// Creates a queue whose node arena follows `config`.
    ///
    /// Growth is always synchronous here, so
    /// [`alloc_threshold`](ArenaConfig::alloc_threshold) is ignored.
    pub fn with_config(config: ArenaConfig) -> Result<Self> {
        Ok(Self {
            arena: LocalArena::with_config(config)?,
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
        })
    }

    /// Appends `value` at the tail.
    pub fn push(&mut self, value: T) -> core::result::Result<(), PushError<T>> {
        let slot = match self.arena.allocate_slot(value) {
            Ok(slot) => slot.as_ptr(),
            Err(value) => return Err(PushError(value)),
        };

        if self.head.is_null() {
            self.head = slot;
            self.tail = slot;
        } else {
            // SAFETY: tail is a live IN_USE node of our arena; linking
            // preserves its flag and counter bits.
            unsafe {
                let link = (*self.tail).link.load_unsync();
                debug_assert!(link.is_null(), "tail already has a successor");
                (*self.tail).link.store_unsync(link.with_ptr(slot));
            }
            self.tail = slot;
        }

        Ok(())
    }

    /// Detaches the head node and moves its payload out.
    pub fn pop(&mut self) -> core::result::Result<T, PopError> {
        if self.head.is_null() {
            return Err(PopError::Empty);
        }

        let slot = self.head;
        // SAFETY: head is a live IN_USE node of our arena; exclusive
        // access through &mut self.
        unsafe {
            let link = (*slot).link.load_unsync();
            self.head = link.ptr();
            if self.head.is_null() {
                self.tail = ptr::null_mut();
            }

            // The link must be null before the slot re-enters the free
            // list, where the same word becomes the free link.
            (*slot).link.store_unsync(link.with_ptr(ptr::null_mut()));

            let value = ptr::read((*slot).payload_ptr());
            match self.arena.retire_slot(NonNull::new_unchecked(slot)) {
                Ok(()) => Ok(value),
                Err(_) => Err(PopError::DoubleFree),
            }
        }
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
        self.head = ptr::null_mut();
        self.tail = ptr::null_mut();
        self.arena.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut queue: LocalQueue<u32> = LocalQueue::with_config(ArenaConfig::new(4)).unwrap();

        for i in 1..=10 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.size(), 10);

        for i in 1..=10 {
            assert_eq!(queue.pop(), Ok(i));
        }
        assert_eq!(queue.pop(), Err(PopError::Empty));
    }

    #[test]
    fn clear_resets() {
        let mut queue: LocalQueue<String> = LocalQueue::with_config(ArenaConfig::new(4)).unwrap();
        queue.push("a".into()).unwrap();
        queue.push("b".into()).unwrap();

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), Err(PopError::Empty));

        // Usable again after clear.
        queue.push("c".into()).unwrap();
        assert_eq!(queue.pop().unwrap(), "c");
    }

    #[test]
    fn interleaved_push_pop() {
        let mut queue: LocalQueue<u64> = LocalQueue::with_config(ArenaConfig::new(2)).unwrap();

        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.pop(), Ok(1));
        queue.push(3).unwrap();
        assert_eq!(queue.pop(), Ok(2));
        assert_eq!(queue.pop(), Ok(3));
        assert!(queue.is_empty());
    }
}
