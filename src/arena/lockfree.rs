//! Lock-free arena allocator
//!
//! # Safety
//!
//! The free list is a Treiber stack threaded through the slots' tagged
//! link words, with an `AtomicTaggedPtr` head:
//! - Pop (allocate): load head, CAS head to the head slot's own link word.
//! - Push (retire): write the slot's link = current head with `IN_USE`
//!   clear and the counter preserved, CAS head to the slot.
//!
//! One CAS therefore moves the list *and* the slot's meta state, because
//! address, flag, and arena index live in the same word.
//!
//! ## Invariants
//!
//! - A slot can only re-enter the free list through its current exclusive
//!   owner. This single-owner discipline is what excludes ABA on the head
//!   CAS: the classic failure needs a third party to re-free a slot the
//!   popper has not yet re-pushed, and no such party can exist. The
//!   counter bits carry the arena's registry index, not a generation; a
//!   thread must never free a slot freshly handed to it by another party.
//! - At most one chunk extension is in flight per arena (`growing` flag);
//!   the raw allocation always happens outside any list manipulation.
//! - Chunks are only released by `clear`/drop under exclusive access, so
//!   a racing operation never observes unmapped slot memory.

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::config::ArenaConfig;
use super::slot::{Chunk, Slot};
use super::stats::ArenaStats;
use crate::error::{DeallocError, MemoryError, Result};
use crate::registry::ArenaRegistry;
use crate::sync::Semaphore;
use crate::tagged::{AtomicTaggedPtr, TaggedPtr, FLAG_IN_USE};
use crate::utils::Backoff;

/// Outcome of a chunk-extension attempt.
enum Grow {
    /// One chunk was added.
    Added,
    /// Another thread's extension is still in flight.
    Busy,
    /// The size limit is reached or the memory source refused.
    Refused,
}

/// Shared state of one lock-free arena. Address-stable behind `Arc` for
/// the arena's lifetime; the registry stores a pointer to it.
pub(crate) struct ArenaCore<T: 'static> {
    free_head: AtomicTaggedPtr<Slot<T>>,
    used_slots: AtomicUsize,
    free_slots: AtomicUsize,
    max_length: AtomicUsize,
    capacity: AtomicUsize,
    chunks: Mutex<Vec<Chunk<T>>>,
    growing: AtomicBool,
    config: ArenaConfig,
    index: u16,
    registry: &'static ArenaRegistry<T>,
    prefetch: Semaphore,
    exit: AtomicBool,
}

// SAFETY: all shared mutation goes through atomics or the chunk-list
// mutex; payloads are only touched by the slot's exclusive owner. Moving
// or sharing the core across threads is sound whenever T values may move
// between threads.
unsafe impl<T: Send + 'static> Send for ArenaCore<T> {}
// SAFETY: see above.
unsafe impl<T: Send + 'static> Sync for ArenaCore<T> {}

/// Lock-free slab arena for a fixed element type.
///
/// `allocate` and `deallocate` are O(1), lock-free, and may be called
/// from any thread; `clear` requires the exclusive handle. With a
/// non-zero [`alloc_threshold`](ArenaConfig::alloc_threshold) a
/// background worker extends the arena by one chunk whenever the free
/// count runs low, keeping the allocation fast path free of growth work.
///
/// # Example
///
/// ```
/// use arenaq::{Arena, ArenaConfig};
///
/// let arena: Arena<u64> = Arena::with_config(ArenaConfig::new(64)).unwrap();
/// let ptr = arena.allocate(42).ok().unwrap();
/// assert_eq!(unsafe { *ptr.as_ref() }, 42);
/// assert_eq!(arena.length(), 1);
///
/// unsafe { arena.deallocate(ptr.as_ptr()).unwrap() };
/// assert_eq!(arena.length(), 0);
/// ```
pub struct Arena<T: 'static> {
    core: Arc<ArenaCore<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Arena<T> {
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

        let core = Arc::new(ArenaCore {
            free_head: AtomicTaggedPtr::new(TaggedPtr::null()),
            used_slots: AtomicUsize::new(0),
            free_slots: AtomicUsize::new(0),
            max_length: AtomicUsize::new(0),
            capacity: AtomicUsize::new(0),
            chunks: Mutex::new(Vec::new()),
            growing: AtomicBool::new(false),
            config,
            index,
            registry,
            prefetch: Semaphore::binary(),
            exit: AtomicBool::new(false),
        });

        registry.publish(index, Arc::as_ptr(&core) as *mut ());

        while core.max_length.load(Ordering::Relaxed) < core.config.initial_size {
            match core.try_grow() {
                Grow::Added => {},
                // Construction is single-threaded; Busy cannot happen.
                Grow::Busy | Grow::Refused => {
                    let bytes =
                        core.config.initial_size * core::mem::size_of::<Slot<T>>();
                    return Err(MemoryError::allocation_failed(bytes));
                },
            }
        }

        let worker = if core.config.alloc_threshold > 0 {
            let worker_core = Arc::clone(&core);
            let handle = std::thread::Builder::new()
                .name("arenaq-prefetch".into())
                .spawn(move || worker_core.prefetch_loop())
                .map_err(|err| MemoryError::system_error(err.to_string()))?;
            Some(handle)
        } else {
            None
        };

        Ok(Self { core, worker })
    }

    /// Acquires a slot and moves `value` into it.
    ///
    /// Returns the payload pointer, or hands `value` back when the arena
    /// is exhausted: the size limit is reached, the memory source refused
    /// a chunk, or (with prefetch enabled) the worker has not extended
    /// the arena yet.
    pub fn allocate(&self, value: T) -> core::result::Result<NonNull<T>, T> {
        match self.core.allocate_slot(value) {
            // SAFETY: the slot pointer is non-null and freshly allocated.
            Ok(slot) => Ok(unsafe { NonNull::new_unchecked((*slot.as_ptr()).payload_ptr()) }),
            Err(value) => Err(value),
        }
    }

    /// Destroys the payload behind `ptr` and returns its slot to the
    /// owning arena's free list.
    ///
    /// The owner is located through the registry index carried in the
    /// slot's counter bits, so `ptr` may come from any live lock-free
    /// arena of this element type, not just `self`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a payload pointer obtained from `allocate`
    /// on a live lock-free arena of `T`, currently owned exclusively by
    /// the caller. Passing a foreign or stale pointer is undefined
    /// behavior (only the null and double-free cases are detected).
    pub unsafe fn deallocate(&self, ptr: *mut T) -> core::result::Result<(), DeallocError> {
        if ptr.is_null() {
            return Err(DeallocError::NullPointer);
        }

        // SAFETY: ptr is a payload pointer per the caller's contract.
        let slot = unsafe { Slot::from_payload(ptr) };
        // SAFETY: the slot header is alive as long as its arena is.
        let link = unsafe { (*slot).link.load(Ordering::Acquire) };
        if !link.in_use() {
            return Err(DeallocError::DoubleFree);
        }

        // SAFETY: IN_USE slot owned by the caller; payload is initialized.
        unsafe { ptr::drop_in_place(ptr) };

        let owner = self.core.registry.lookup(link.counter()) as *const ArenaCore<T>;
        debug_assert!(!owner.is_null(), "slot counter does not name a live arena");

        // SAFETY: the registry entry points at the live owning core; the
        // slot is ours until the retire publishes it.
        unsafe { (*owner).retire_slot(NonNull::new_unchecked(slot)) }
    }

    /// Whether `ptr` falls inside any chunk of this arena.
    ///
    /// O(number of chunks); meant for debugging at non-critical moments.
    pub fn is_valid(&self, ptr: *const T) -> bool {
        if ptr.is_null() {
            return false;
        }
        self.core.chunks.lock().iter().any(|chunk| chunk.contains_payload(ptr))
    }

    /// Drops every IN_USE payload, releases every chunk, and resets the
    /// arena to zero slots.
    ///
    /// The `&mut` receiver guarantees no concurrent operation; the call
    /// additionally waits out an in-flight background extension.
    pub fn clear(&mut self) {
        self.core.quiesce_and_clear();
    }

    /// Slots currently in use.
    pub fn length(&self) -> usize {
        self.core.used_slots.load(Ordering::Relaxed)
    }

    /// Slots currently on the free list.
    pub fn free_slots(&self) -> usize {
        self.core.free_slots.load(Ordering::Relaxed)
    }

    /// Total slots across all chunks.
    pub fn max_length(&self) -> usize {
        self.core.max_length.load(Ordering::Relaxed)
    }

    /// Bytes currently reserved from the memory source.
    pub fn capacity(&self) -> usize {
        self.core.capacity.load(Ordering::Relaxed)
    }

    /// Largest slot count this arena type can address.
    pub fn max_size(&self) -> usize {
        usize::MAX / core::mem::size_of::<Slot<T>>()
    }

    /// Hard slot ceiling from the configuration; 0 means unbounded.
    pub fn size_limit(&self) -> usize {
        self.core.config.size_limit
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Point-in-time accounting snapshot.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            length: self.length(),
            free_slots: self.free_slots(),
            max_length: self.max_length(),
            capacity: self.capacity(),
            chunks: self.core.chunks.lock().len(),
        }
    }

    /// Registry index of this arena: the value every slot of this arena
    /// carries in its link counter bits.
    pub fn registry_index(&self) -> u16 {
        self.core.index
    }

    /// Allocates a raw slot for an intrusive structure.
    pub(crate) fn allocate_slot(&self, value: T) -> core::result::Result<NonNull<Slot<T>>, T> {
        self.core.allocate_slot(value)
    }

    /// Returns a slot that the caller already marked FREE (detached from
    /// a structure, link nulled, flag cleared) to the free list. The
    /// payload must have been moved out beforehand.
    ///
    /// # Safety
    ///
    /// `slot` must belong to this arena, be exclusively owned by the
    /// caller, carry a cleared `IN_USE` flag, and not be on the free
    /// list yet.
    pub(crate) unsafe fn retire_detached(&self, slot: NonNull<Slot<T>>) {
        // SAFETY: forwarded caller contract.
        unsafe { self.core.push_free(slot.as_ptr()) };
        self.core.used_slots.fetch_sub(1, Ordering::Relaxed);
        self.core.free_slots.fetch_add(1, Ordering::Relaxed);
    }
}

impl<T: 'static> Drop for Arena<T> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.core.exit.store(true, Ordering::Release);
            self.core.prefetch.release();
            let _ = worker.join();
        }
    }
}

impl<T: 'static> ArenaCore<T> {
    fn allocate_slot(&self, value: T) -> core::result::Result<NonNull<Slot<T>>, T> {
        let threshold = self.config.alloc_threshold;
        if threshold > 0 && self.free_slots.load(Ordering::Relaxed) <= threshold {
            self.prefetch.release();
        }

        let mut backoff = Backoff::new();
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            let slot = head.ptr();

            if slot.is_null() {
                if threshold > 0 {
                    // Growth is the worker's job; refuse for now.
                    return Err(value);
                }
                match self.try_grow() {
                    Grow::Added => continue,
                    Grow::Busy => {
                        backoff.spin();
                        continue;
                    },
                    Grow::Refused => return Err(value),
                }
            }

            // SAFETY: slot was the free head an instant ago; chunk memory
            // stays mapped while the arena lives. The loaded word may be
            // stale, in which case the CAS below fails.
            let next = unsafe { (*slot).link.load(Ordering::Acquire) };

            if self
                .free_head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // The slot is exclusively ours now.
                // SAFETY: exclusive ownership established by the CAS.
                unsafe {
                    (*slot).link.store(
                        TaggedPtr::new(ptr::null_mut(), FLAG_IN_USE, self.index),
                        Ordering::Release,
                    );
                    ptr::write((*slot).payload_ptr(), value);
                }

                self.free_slots.fetch_sub(1, Ordering::Relaxed);
                self.used_slots.fetch_add(1, Ordering::Relaxed);

                // SAFETY: slot came off the free list, never null.
                return Ok(unsafe { NonNull::new_unchecked(slot) });
            }

            backoff.spin();
        }
    }

    /// # Safety
    ///
    /// `slot` must belong to this arena, be exclusively owned by the
    /// caller, and its payload must already be moved out or dropped.
    unsafe fn retire_slot(
        &self,
        slot: NonNull<Slot<T>>,
    ) -> core::result::Result<(), DeallocError> {
        let slot = slot.as_ptr();

        // SAFETY: slot header is valid per the caller's contract.
        if !unsafe { (*slot).link.load(Ordering::Acquire) }.in_use() {
            return Err(DeallocError::DoubleFree);
        }

        // SAFETY: exclusive ownership per the caller's contract.
        unsafe { self.push_free(slot) };
        self.used_slots.fetch_sub(1, Ordering::Relaxed);
        self.free_slots.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Treiber push of an exclusively owned slot onto the free list.
    ///
    /// # Safety
    ///
    /// `slot` must belong to this arena, be exclusively owned by the
    /// caller, and not be reachable from any structure or list.
    unsafe fn push_free(&self, slot: *mut Slot<T>) {
        let mut backoff = Backoff::new();
        loop {
            let head = self.free_head.load(Ordering::Acquire);

            // SAFETY: the slot stays ours until the CAS publishes it.
            unsafe {
                (*slot)
                    .link
                    .store(TaggedPtr::new(head.ptr(), 0, self.index), Ordering::Release);
            }

            let new_head = TaggedPtr::new(slot, 0, self.index);
            if self
                .free_head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }

            backoff.spin();
        }
    }

    /// Adds one chunk if no other extension is in flight.
    fn try_grow(&self) -> Grow {
        if self.growing.swap(true, Ordering::Acquire) {
            return Grow::Busy;
        }

        let outcome = self.grow_exclusive();
        self.growing.store(false, Ordering::Release);
        outcome
    }

    fn grow_exclusive(&self) -> Grow {
        let limit = self.config.size_limit;
        if limit != 0 && self.max_length.load(Ordering::Relaxed) >= limit {
            return Grow::Refused;
        }

        let Some(chunk) =
            Chunk::<T>::allocate(self.config.chunk_size, self.index, self.config.source)
        else {
            return Grow::Refused;
        };

        let first = chunk.first_slot();
        let last = chunk.last_slot();
        let added = chunk.len();
        let bytes = chunk.bytes();

        // Record the chunk before it becomes reachable so clear/drop can
        // never miss spliced slots.
        self.chunks.lock().push(chunk);

        // Account before the splice: free_slots may transiently read high,
        // never below the number of slots actually poppable.
        self.max_length.fetch_add(added, Ordering::Relaxed);
        self.capacity.fetch_add(bytes, Ordering::Relaxed);
        self.free_slots.fetch_add(added, Ordering::Relaxed);

        // Splice the privately chained run onto the free head: point the
        // run's last slot at the current head, then swing the head to the
        // run's first slot.
        let mut backoff = Backoff::new();
        loop {
            let head = self.free_head.load(Ordering::Acquire);

            // SAFETY: the run is unreachable until the CAS below, so the
            // last slot's link is still privately owned.
            unsafe {
                (*last)
                    .link
                    .store(TaggedPtr::new(head.ptr(), 0, self.index), Ordering::Release);
            }

            let new_head = TaggedPtr::new(first, 0, self.index);
            if self
                .free_head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }

            backoff.spin();
        }

        tracing::debug!(
            index = self.index,
            added,
            max_length = self.max_length.load(Ordering::Relaxed),
            "extended arena by one chunk"
        );

        Grow::Added
    }

    fn prefetch_loop(&self) {
        tracing::debug!(index = self.index, "prefetch worker started");

        loop {
            self.prefetch.acquire();

            if self.exit.load(Ordering::Acquire) {
                break;
            }

            let limit = self.config.size_limit;
            if limit == 0 || self.max_length.load(Ordering::Relaxed) < limit {
                // A Refused outcome here means the physical memory limit;
                // allocate will keep reporting exhaustion.
                let _ = self.try_grow();
            }
        }

        tracing::debug!(index = self.index, "prefetch worker exiting");
    }

    /// Waits out an in-flight extension, then clears every chunk.
    fn quiesce_and_clear(&self) {
        let mut backoff = Backoff::new();
        while self.growing.swap(true, Ordering::Acquire) {
            backoff.spin_or_yield();
        }

        {
            let mut chunks = self.chunks.lock();
            for chunk in chunks.iter() {
                // SAFETY: the caller of clear/drop guarantees quiescence;
                // every IN_USE payload is dropped exactly once because the
                // chunks are released right after.
                unsafe { chunk.drop_in_use() };
            }
            for chunk in chunks.drain(..) {
                // SAFETY: same source the chunk came from; no references
                // remain past this point.
                unsafe { chunk.release(self.config.source) };
            }
        }

        self.free_head.store(TaggedPtr::null(), Ordering::Release);
        self.used_slots.store(0, Ordering::Relaxed);
        self.free_slots.store(0, Ordering::Relaxed);
        self.max_length.store(0, Ordering::Relaxed);
        self.capacity.store(0, Ordering::Relaxed);

        self.growing.store(false, Ordering::Release);
    }
}

impl<T: 'static> Drop for ArenaCore<T> {
    fn drop(&mut self) {
        // The registry entry must be gone before the memory is reused for
        // anything else.
        self.registry.reset(self.index);
        self.quiesce_and_clear();
    }
}
