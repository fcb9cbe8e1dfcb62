//! Single-owner stack

use core::ptr::{self, NonNull};

use crate::arena::slot::Slot;
use crate::arena::{ArenaConfig, LocalArena};
use crate::error::{PopError, PushError, Result};

/// Singly-linked LIFO stack for exactly one owner.
pub struct LocalStack<T: 'static> {
    arena: LocalArena<T>,
    head: *mut Slot<T>,
}

// SAFETY: owns its arena and nodes outright; not Sync by design.
unsafe impl<T: Send + 'static> Send for LocalStack<T> {}

impl<T: 'static> LocalStack<T> {
    /// Creates a stack with the default node-arena configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(ArenaConfig::default())
    }

    /// Creates a stack whose node arena follows `config`.
    pub fn with_config(config: ArenaConfig) -> Result<Self> {
        Ok(Self { arena: LocalArena::with_config(config)?, head: ptr::null_mut() })
    }

    /// Pushes `value` on top.
    pub fn push(&mut self, value: T) -> core::result::Result<(), PushError<T>> {
        let slot = match self.arena.allocate_slot(value) {
            Ok(slot) => slot.as_ptr(),
            Err(value) => return Err(PushError(value)),
        };

        // SAFETY: fresh IN_USE node of our arena; the link keeps its flag
        // and counter bits and gains the old head as successor.
        unsafe {
            let link = (*slot).link.load_unsync();
            (*slot).link.store_unsync(link.with_ptr(self.head));
        }
        self.head = slot;

        Ok(())
    }

    /// Pops the top value.
    pub fn pop(&mut self) -> core::result::Result<T, PopError> {
        if self.head.is_null() {
            return Err(PopError::Empty);
        }

        let slot = self.head;
        // SAFETY: head is a live IN_USE node of our arena; &mut self is
        // exclusive.
        unsafe {
            let link = (*slot).link.load_unsync();
            self.head = link.ptr();

            // Null before the word becomes a free link again.
            (*slot).link.store_unsync(link.with_ptr(ptr::null_mut()));

            let value = ptr::read((*slot).payload_ptr());
            match self.arena.retire_slot(NonNull::new_unchecked(slot)) {
                Ok(()) => Ok(value),
                Err(_) => Err(PopError::DoubleFree),
            }
        }
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
        self.head = ptr::null_mut();
        self.arena.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifo_order() {
        let mut stack: LocalStack<u32> = LocalStack::with_config(ArenaConfig::new(4)).unwrap();

        for i in 1..=5 {
            stack.push(i).unwrap();
        }
        for i in (1..=5).rev() {
            assert_eq!(stack.pop(), Ok(i));
        }
        assert_eq!(stack.pop(), Err(PopError::Empty));
    }

    #[test]
    fn clear_then_reuse() {
        let mut stack: LocalStack<u8> = LocalStack::with_config(ArenaConfig::new(4)).unwrap();
        stack.push(1).unwrap();
        stack.push(2).unwrap();
        stack.clear();
        assert!(stack.is_empty());

        stack.push(3).unwrap();
        assert_eq!(stack.pop(), Ok(3));
    }
}
