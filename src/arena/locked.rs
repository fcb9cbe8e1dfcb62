//! Lock-serialized arena allocator
//!
//! The same slab as the lock-free arena with its free list, counters, and
//! chunk list guarded by one per-arena lock instead of CAS loops. The lock
//! discipline is pluggable through [`lock_api::RawMutex`]: a parking
//! mutex for long critical sections under low contention, the crate spin
//! lock when sections are tiny and contention is high.
//!
//! The lock is held only for list and counter mutations, never across
//! the payload's constructor or destructor, and never across the raw
//! chunk allocation.

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use lock_api::RawMutex;

use super::config::ArenaConfig;
use super::slot::{Chunk, Slot};
use super::stats::ArenaStats;
use crate::error::{DeallocError, MemoryError, Result};
use crate::registry::ArenaRegistry;
use crate::sync::{RawSpinLock, Semaphore};
use crate::tagged::{TaggedPtr, FLAG_IN_USE};

/// [`LockedArena`] behind `parking_lot`'s mutex.
pub type MutexArena<T> = LockedArena<T, parking_lot::RawMutex>;

/// [`LockedArena`] behind the crate spin lock.
pub type SpinArena<T> = LockedArena<T, RawSpinLock>;

struct ArenaState<T> {
    free_head: *mut Slot<T>,
    used_slots: usize,
    free_slots: usize,
    max_length: usize,
    capacity: usize,
    chunks: Vec<Chunk<T>>,
}

// SAFETY: the state owns its chunks; the raw free-head pointer refers
// into them. Sending it with the rest of the arena is sound when T is.
unsafe impl<T: Send> Send for ArenaState<T> {}

struct LockedCore<T: 'static, R: RawMutex> {
    state: lock_api::Mutex<R, ArenaState<T>>,
    config: ArenaConfig,
    index: u16,
    registry: &'static ArenaRegistry<T>,
    prefetch: Semaphore,
    exit: AtomicBool,
}

/// Slab arena serialized by a single pluggable lock.
///
/// Same contract as [`Arena`](super::Arena); use this variant when the
/// platform's CAS behaves poorly or when the predictability of a lock is
/// preferred. See [`MutexArena`] and [`SpinArena`] for the usual picks.
pub struct LockedArena<T: 'static, R: RawMutex = parking_lot::RawMutex> {
    core: Arc<LockedCore<T, R>>,
    worker: Option<JoinHandle<()>>,
}

impl<T, R> LockedArena<T, R>
where
    T: Send + 'static,
    R: RawMutex + Send + Sync + 'static,
{
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

        let core = Arc::new(LockedCore {
            state: lock_api::Mutex::new(ArenaState {
                free_head: ptr::null_mut(),
                used_slots: 0,
                free_slots: 0,
                max_length: 0,
                capacity: 0,
                chunks: Vec::new(),
            }),
            config,
            index,
            registry,
            prefetch: Semaphore::binary(),
            exit: AtomicBool::new(false),
        });

        registry.publish(index, Arc::as_ptr(&core) as *mut ());

        while core.state.lock().max_length < core.config.initial_size {
            if !core.grow() {
                let bytes = core.config.initial_size * core::mem::size_of::<Slot<T>>();
                return Err(MemoryError::allocation_failed(bytes));
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

    /// Acquires a slot and moves `value` into it; hands `value` back when
    /// the arena refuses (limit reached, chunk allocation failed, or the
    /// prefetch worker has not caught up yet).
    pub fn allocate(&self, value: T) -> core::result::Result<NonNull<T>, T> {
        let threshold = self.core.config.alloc_threshold;

        let slot = loop {
            let mut state = self.core.state.lock();

            if threshold > 0 {
                if state.free_slots <= threshold {
                    self.core.prefetch.release();
                }
            } else if state.free_head.is_null() {
                drop(state);
                if !self.core.grow() {
                    return Err(value);
                }
                continue;
            }

            let slot = state.free_head;
            if slot.is_null() {
                return Err(value);
            }

            // SAFETY: the lock serializes every free-list mutation; slot
            // is the current head.
            unsafe {
                state.free_head = (*slot).link.load_unsync().ptr();
                (*slot).link.store_unsync(TaggedPtr::new(
                    ptr::null_mut(),
                    FLAG_IN_USE,
                    self.core.index,
                ));
            }

            state.used_slots += 1;
            state.free_slots -= 1;
            break slot;
        };

        // The payload is written outside the lock: the slot is already
        // exclusively ours.
        // SAFETY: slot popped above, uninitialized payload cell.
        unsafe {
            ptr::write((*slot).payload_ptr(), value);
            Ok(NonNull::new_unchecked((*slot).payload_ptr()))
        }
    }

    /// Destroys the payload behind `ptr` and returns its slot to this
    /// arena's free list.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a payload pointer obtained from `allocate`
    /// on this arena, currently owned exclusively by the caller.
    pub unsafe fn deallocate(&self, ptr: *mut T) -> core::result::Result<(), DeallocError> {
        if ptr.is_null() {
            return Err(DeallocError::NullPointer);
        }

        // SAFETY: payload pointer per the caller's contract.
        let slot = unsafe { Slot::from_payload(ptr) };
        // SAFETY: slot header alive while the arena is. Acquire pairs
        // with whatever handed the pointer across threads.
        let link = unsafe { (*slot).link.load(Ordering::Acquire) };
        if !link.in_use() {
            return Err(DeallocError::DoubleFree);
        }
        debug_assert_eq!(link.counter(), self.core.index, "slot belongs to a different arena");

        // Destructor runs outside the lock under the caller's exclusive
        // ownership of the slot.
        // SAFETY: IN_USE slot, initialized payload.
        unsafe { ptr::drop_in_place(ptr) };

        let mut state = self.core.state.lock();
        // SAFETY: lock held; the slot re-enters the list with its link
        // redefined as the free link.
        unsafe {
            (*slot)
                .link
                .store_unsync(TaggedPtr::new(state.free_head, 0, self.core.index));
        }
        state.free_head = slot;
        state.used_slots -= 1;
        state.free_slots += 1;
        Ok(())
    }

    /// Whether `ptr` falls inside any chunk of this arena. O(chunks).
    pub fn is_valid(&self, ptr: *const T) -> bool {
        if ptr.is_null() {
            return false;
        }
        self.core.state.lock().chunks.iter().any(|chunk| chunk.contains_payload(ptr))
    }

    /// Drops every IN_USE payload, releases every chunk, and resets the
    /// arena to zero slots. Requires the exclusive handle.
    pub fn clear(&mut self) {
        let mut state = self.core.state.lock();
        clear_state(&mut state, self.core.config.source);
    }

    /// Slots currently in use.
    pub fn length(&self) -> usize {
        self.core.state.lock().used_slots
    }

    /// Slots currently on the free list.
    pub fn free_slots(&self) -> usize {
        self.core.state.lock().free_slots
    }

    /// Total slots across all chunks.
    pub fn max_length(&self) -> usize {
        self.core.state.lock().max_length
    }

    /// Bytes currently reserved from the memory source.
    pub fn capacity(&self) -> usize {
        self.core.state.lock().capacity
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

    /// Registry index of this arena.
    pub fn registry_index(&self) -> u16 {
        self.core.index
    }

    /// Point-in-time accounting snapshot.
    pub fn stats(&self) -> ArenaStats {
        let state = self.core.state.lock();
        ArenaStats {
            length: state.used_slots,
            free_slots: state.free_slots,
            max_length: state.max_length,
            capacity: state.capacity,
            chunks: state.chunks.len(),
        }
    }
}

impl<T: 'static, R: RawMutex> Drop for LockedArena<T, R> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.core.exit.store(true, Ordering::Release);
            self.core.prefetch.release();
            let _ = worker.join();
        }
    }
}

impl<T: 'static, R: RawMutex> LockedCore<T, R> {
    /// Adds one chunk; the raw allocation happens with the lock released.
    fn grow(&self) -> bool {
        let limit = self.config.size_limit;

        {
            let state = self.state.lock();
            if limit != 0 && state.max_length >= limit {
                return false;
            }
        }

        let Some(chunk) = Chunk::<T>::allocate(self.config.chunk_size, self.index, self.config.source)
        else {
            return false;
        };

        let first = chunk.first_slot();
        let last = chunk.last_slot();
        let added = chunk.len();
        let bytes = chunk.bytes();

        let mut state = self.state.lock();
        if limit != 0 && state.max_length >= limit {
            // Lost the race to the ceiling while unlocked.
            drop(state);
            // SAFETY: the chunk never became reachable.
            unsafe { chunk.release(self.config.source) };
            return false;
        }

        // SAFETY: lock held; the run is private until free_head points
        // at it.
        unsafe {
            (*last).link.store_unsync(TaggedPtr::new(state.free_head, 0, self.index));
        }
        state.free_head = first;
        state.free_slots += added;
        state.max_length += added;
        state.capacity += bytes;
        state.chunks.push(chunk);

        tracing::debug!(index = self.index, added, max_length = state.max_length, "extended arena");
        true
    }

    fn prefetch_loop(&self) {
        tracing::debug!(index = self.index, "prefetch worker started");

        loop {
            self.prefetch.acquire();

            if self.exit.load(Ordering::Acquire) {
                break;
            }

            let limit = self.config.size_limit;
            let below_limit = limit == 0 || self.state.lock().max_length < limit;
            if below_limit {
                let _ = self.grow();
            }
        }

        tracing::debug!(index = self.index, "prefetch worker exiting");
    }
}

impl<T: 'static, R: RawMutex> Drop for LockedCore<T, R> {
    fn drop(&mut self) {
        // Surrender the index before the memory goes away.
        self.registry.reset(self.index);
        clear_state(self.state.get_mut(), self.config.source);
    }
}

fn clear_state<T>(state: &mut ArenaState<T>, source: crate::source::MemorySource) {
    for chunk in &state.chunks {
        // SAFETY: caller holds the lock or exclusive ownership; payloads
        // are dropped once because the chunks are released right after.
        unsafe { chunk.drop_in_use() };
    }
    for chunk in state.chunks.drain(..) {
        // SAFETY: same source; no references remain.
        unsafe { chunk.release(source) };
    }

    state.free_head = ptr::null_mut();
    state.used_slots = 0;
    state.free_slots = 0;
    state.max_length = 0;
    state.capacity = 0;
}
