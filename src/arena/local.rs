//! Single-owner arena
//!
//! The `&mut self` receivers make exclusive access a compile-time fact,
//! so the free-list walk needs no atomics and no locks. This is the node
//! engine of the serialized queue/stack variants, which hold one of these
//! behind their own lock.

use core::ptr::{self, NonNull};

use super::config::ArenaConfig;
use super::slot::{Chunk, Slot};
use super::stats::ArenaStats;
use crate::error::{DeallocError, MemoryError, Result};
use crate::registry::ArenaRegistry;
use crate::tagged::{TaggedPtr, FLAG_IN_USE};

/// Single-owner slab arena for a fixed element type.
///
/// Functionally the same slab as [`Arena`](super::Arena) minus every
/// synchronization cost: no CAS loops, no prefetch worker (growth is
/// always synchronous; [`alloc_threshold`](ArenaConfig::alloc_threshold)
/// is ignored). The type is deliberately not `Sync`.
pub struct LocalArena<T: 'static> {
    free_head: *mut Slot<T>,
    used_slots: usize,
    free_slots: usize,
    max_length: usize,
    capacity: usize,
    chunks: Vec<Chunk<T>>,
    config: ArenaConfig,
    index: u16,
    registry: &'static ArenaRegistry<T>,
}

// SAFETY: the arena owns its chunks outright; moving it to another thread
// moves T values with it, which is fine whenever T: Send. There is no
// Sync impl; shared access is exactly what this type exists to exclude.
unsafe impl<T: Send + 'static> Send for LocalArena<T> {}

impl<T: 'static> LocalArena<T> {
    /// Creates an arena with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(ArenaConfig::default())
    }

    /// Creates an arena from `config`, reserving `initial_size` slots.
    pub fn with_config(config: ArenaConfig) -> Result<Self> {
        config.validate()?;

        let registry = ArenaRegistry::<T>::global();
        let index = registry
            .claim()
            .ok_or_else(|| MemoryError::registry_full(crate::registry::MAX_ARENAS))?;

        let mut arena = Self {
            free_head: ptr::null_mut(),
            used_slots: 0,
            free_slots: 0,
            max_length: 0,
            capacity: 0,
            chunks: Vec::new(),
            config,
            index,
            registry,
        };

        while arena.max_length < arena.config.initial_size {
            if !arena.grow() {
                let bytes = arena.config.initial_size * core::mem::size_of::<Slot<T>>();
                return Err(MemoryError::allocation_failed(bytes));
            }
        }

        Ok(arena)
    }

    /// Acquires a slot and moves `value` into it; hands `value` back when
    /// the size limit is reached or the memory source refuses a chunk.
    pub fn allocate(&mut self, value: T) -> core::result::Result<NonNull<T>, T> {
        match self.allocate_slot(value) {
            // SAFETY: slot fresh off the free list, non-null.
            Ok(slot) => Ok(unsafe { NonNull::new_unchecked((*slot.as_ptr()).payload_ptr()) }),
            Err(value) => Err(value),
        }
    }

    /// Destroys the payload behind `ptr` and returns its slot to the
    /// free list.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a payload pointer previously returned by
    /// `allocate` on this arena and not freed since.
    pub unsafe fn deallocate(&mut self, ptr: *mut T) -> core::result::Result<(), DeallocError> {
        if ptr.is_null() {
            return Err(DeallocError::NullPointer);
        }

        // SAFETY: payload pointer per the caller's contract.
        let slot = unsafe { Slot::from_payload(ptr) };
        // SAFETY: slot header alive while the arena is.
        let link = unsafe { (*slot).link.load_unsync() };
        if !link.in_use() {
            return Err(DeallocError::DoubleFree);
        }
        debug_assert_eq!(link.counter(), self.index, "slot belongs to a different arena");

        // SAFETY: IN_USE slot of this arena; payload initialized.
        unsafe { ptr::drop_in_place(ptr) };

        // SAFETY: flag checked above; payload just dropped.
        unsafe { self.retire_slot(NonNull::new_unchecked(slot)) }
    }

    /// Whether `ptr` falls inside any chunk of this arena. O(chunks).
    pub fn is_valid(&self, ptr: *const T) -> bool {
        if ptr.is_null() {
            return false;
        }
        self.chunks.iter().any(|chunk| chunk.contains_payload(ptr))
    }

    /// Drops every IN_USE payload, releases every chunk, resets counters.
    pub fn clear(&mut self) {
        for chunk in &self.chunks {
            // SAFETY: &mut self is exclusive; each payload dropped once
            // because the chunks are released right after.
            unsafe { chunk.drop_in_use() };
        }
        for chunk in self.chunks.drain(..) {
            // SAFETY: same source; no references remain.
            unsafe { chunk.release(self.config.source) };
        }

        self.free_head = ptr::null_mut();
        self.used_slots = 0;
        self.free_slots = 0;
        self.max_length = 0;
        self.capacity = 0;
    }

    /// Slots currently in use.
    pub fn length(&self) -> usize {
        self.used_slots
    }

    /// Slots currently on the free list.
    pub fn free_slots(&self) -> usize {
        self.free_slots
    }

    /// Total slots across all chunks.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Bytes currently reserved from the memory source.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest slot count this arena type can address.
    pub fn max_size(&self) -> usize {
        usize::MAX / core::mem::size_of::<Slot<T>>()
    }

    /// Hard slot ceiling from the configuration; 0 means unbounded.
    pub fn size_limit(&self) -> usize {
        self.config.size_limit
    }

    pub fn is_empty(&self) -> bool {
        self.used_slots == 0
    }

    /// Point-in-time accounting snapshot.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            length: self.used_slots,
            free_slots: self.free_slots,
            max_length: self.max_length,
            capacity: self.capacity,
            chunks: self.chunks.len(),
        }
    }

    /// Registry index of this arena.
    pub fn registry_index(&self) -> u16 {
        self.index
    }

    /// Allocates a raw slot for an intrusive structure.
    pub(crate) fn allocate_slot(&mut self, value: T) -> core::result::Result<NonNull<Slot<T>>, T> {
        if self.free_head.is_null() && !self.grow() {
            return Err(value);
        }

        let slot = self.free_head;
        if slot.is_null() {
            return Err(value);
        }

        // SAFETY: slot is the free head of this exclusively owned arena.
        unsafe {
            self.free_head = (*slot).link.load_unsync().ptr();
            (*slot)
                .link
                .store_unsync(TaggedPtr::new(ptr::null_mut(), FLAG_IN_USE, self.index));
            ptr::write((*slot).payload_ptr(), value);
        }

        self.used_slots += 1;
        self.free_slots -= 1;

        // SAFETY: checked non-null above.
        Ok(unsafe { NonNull::new_unchecked(slot) })
    }

    /// Returns a detached slot to the free list without touching the
    /// payload.
    ///
    /// # Safety
    ///
    /// `slot` must belong to this arena with its payload already moved
    /// out or dropped.
    pub(crate) unsafe fn retire_slot(
        &mut self,
        slot: NonNull<Slot<T>>,
    ) -> core::result::Result<(), DeallocError> {
        let slot = slot.as_ptr();

        // SAFETY: slot header valid per the caller's contract.
        if !unsafe { (*slot).link.load_unsync() }.in_use() {
            return Err(DeallocError::DoubleFree);
        }

        // SAFETY: exclusive access through &mut self.
        unsafe {
            (*slot).link.store_unsync(TaggedPtr::new(self.free_head, 0, self.index));
        }
        self.free_head = slot;

        self.used_slots -= 1;
        self.free_slots += 1;
        Ok(())
    }

    fn grow(&mut self) -> bool {
        let limit = self.config.size_limit;
        if limit != 0 && self.max_length >= limit {
            return false;
        }

        let Some(chunk) = Chunk::<T>::allocate(self.config.chunk_size, self.index, self.config.source)
        else {
            return false;
        };

        // Splice the freshly chained run in front of the free head.
        // SAFETY: the run is private until free_head points at it.
        unsafe {
            (*chunk.last_slot())
                .link
                .store_unsync(TaggedPtr::new(self.free_head, 0, self.index));
        }
        self.free_head = chunk.first_slot();

        self.free_slots += chunk.len();
        self.max_length += chunk.len();
        self.capacity += chunk.bytes();
        self.chunks.push(chunk);

        tracing::debug!(index = self.index, max_length = self.max_length, "extended arena");
        true
    }
}

impl<T: 'static> Drop for LocalArena<T> {
    fn drop(&mut self) {
        // Surrender the index before the memory goes away.
        self.registry.reset(self.index);
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifo_reuse() {
        let mut arena: LocalArena<u32> = LocalArena::with_config(ArenaConfig::new(4)).unwrap();

        let a = arena.allocate(1).ok().unwrap();
        let b = arena.allocate(2).ok().unwrap();
        unsafe {
            arena.deallocate(a.as_ptr()).unwrap();
            arena.deallocate(b.as_ptr()).unwrap();
        }

        // Free list is LIFO: b went last, comes back first.
        let c = arena.allocate(3).ok().unwrap();
        let d = arena.allocate(4).ok().unwrap();
        assert_eq!(c, b);
        assert_eq!(d, a);
    }

    #[test]
    fn size_limit_refuses() {
        let config = ArenaConfig::new(2).with_size_limit(2);
        let mut arena: LocalArena<u8> = LocalArena::with_config(config).unwrap();

        assert!(arena.allocate(1).is_ok());
        assert!(arena.allocate(2).is_ok());
        assert_eq!(arena.allocate(3), Err(3));
        assert_eq!(arena.length(), 2);
    }

    #[test]
    fn accounting_holds_across_growth() {
        let mut arena: LocalArena<u64> = LocalArena::with_config(ArenaConfig::new(2)).unwrap();

        let mut ptrs = Vec::new();
        for i in 0..5 {
            ptrs.push(arena.allocate(i).ok().unwrap());
        }

        assert!(arena.max_length() >= 6);
        assert_eq!(arena.length() + arena.free_slots(), arena.max_length());
        assert_eq!(arena.max_length() % 2, 0);

        for ptr in ptrs {
            unsafe { arena.deallocate(ptr.as_ptr()).unwrap() };
        }
        assert_eq!(arena.length(), 0);
    }
}
