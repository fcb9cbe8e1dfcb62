//! Slots and chunks
//!
//! # Safety
//!
//! A slot is one element-sized cell headed by a tagged link word:
//!
//! ```text
//! #[repr(C)] { link: AtomicTaggedPtr<Slot<T>>, payload: MaybeUninit<T> }
//! ```
//!
//! The link word is reinterpreted by state:
//! - FREE: address = next free slot of the same arena (or null),
//!   `IN_USE` clear; payload uninitialized.
//! - IN_USE: `IN_USE` set; address is null when allocation completes and
//!   may later carry a queue/stack link while the structure owns the slot;
//!   payload holds a constructed `T`.
//!
//! The two roles are mutually exclusive in the slot state machine, which
//! is what makes sharing one word sound. The counter bits always hold the
//! owning arena's registry index; chunk initialization writes it once and
//! nothing mutates it afterwards.

use core::alloc::Layout;
use core::cell::UnsafeCell;
use core::mem::{self, MaybeUninit};
use core::ptr::{self, NonNull};

use crate::source::MemorySource;
use crate::tagged::{AtomicTaggedPtr, TaggedPtr};

/// One fixed-size cell: tagged link header plus payload.
#[repr(C)]
pub(crate) struct Slot<T> {
    pub(crate) link: AtomicTaggedPtr<Slot<T>>,
    payload: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    #[inline]
    pub(crate) fn payload_offset() -> usize {
        mem::offset_of!(Slot<T>, payload)
    }

    /// Pointer to the payload cell of this slot.
    #[inline]
    pub(crate) fn payload_ptr(&self) -> *mut T {
        self.payload.get().cast::<T>()
    }

    /// Recovers the slot from a payload pointer handed out by `allocate`.
    ///
    /// # Safety
    ///
    /// `payload` must point at the payload cell of a live slot of this
    /// exact element type.
    #[inline]
    pub(crate) unsafe fn from_payload(payload: *mut T) -> *mut Slot<T> {
        // SAFETY: the payload cell sits payload_offset() bytes into its
        // slot (repr(C)); stepping back inside the same allocation is in
        // bounds per the caller's contract.
        unsafe { payload.cast::<u8>().sub(Self::payload_offset()).cast::<Slot<T>>() }
    }
}

/// A contiguous run of slots obtained in one raw allocation.
///
/// Chunks are never released individually; only `clear` and drop return
/// them to the memory source, all at once.
pub(crate) struct Chunk<T> {
    first: NonNull<Slot<T>>,
    len: usize,
}

impl<T> Chunk<T> {
    fn layout(len: usize) -> Option<Layout> {
        Layout::array::<Slot<T>>(len).ok()
    }

    /// Allocates and initializes a run of `len` FREE slots chained
    /// first-to-last, each carrying `index` in its counter bits. The last
    /// slot's link is null until the arena splices the run into its free
    /// list.
    pub(crate) fn allocate(len: usize, index: u16, source: MemorySource) -> Option<Chunk<T>> {
        debug_assert!(len >= 1);

        let layout = Self::layout(len)?;
        let raw = source.allocate(layout);
        let first = NonNull::new(raw.cast::<Slot<T>>())?;

        let base = first.as_ptr();
        for i in 0..len {
            let next = if i + 1 < len {
                // SAFETY: i + 1 < len keeps the offset inside the chunk.
                unsafe { base.add(i + 1) }
            } else {
                ptr::null_mut()
            };

            // SAFETY: base..base+len is freshly allocated, properly
            // aligned for Slot<T>, and exclusively ours. Only the link
            // header is written; the payload stays uninitialized.
            unsafe {
                let slot = base.add(i);
                ptr::addr_of_mut!((*slot).link)
                    .write(AtomicTaggedPtr::new(TaggedPtr::new(next, 0, index)));
            }
        }

        Some(Chunk { first, len })
    }

    #[inline]
    pub(crate) fn first_slot(&self) -> *mut Slot<T> {
        self.first.as_ptr()
    }

    #[inline]
    pub(crate) fn last_slot(&self) -> *mut Slot<T> {
        // SAFETY: len >= 1 and the chunk spans len slots.
        unsafe { self.first.as_ptr().add(self.len - 1) }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Size of the underlying raw allocation in bytes.
    #[inline]
    pub(crate) fn bytes(&self) -> usize {
        match Self::layout(self.len) {
            Some(layout) => layout.size(),
            None => 0,
        }
    }

    /// Whether `payload` points into this chunk's payload region.
    pub(crate) fn contains_payload(&self, payload: *const T) -> bool {
        let base = self.first.as_ptr() as usize + Slot::<T>::payload_offset();
        let last = base + (self.len - 1) * mem::size_of::<Slot<T>>();
        let addr = payload as usize;
        addr >= base && addr <= last
    }

    /// Runs the payload destructor of every IN_USE slot.
    ///
    /// # Safety
    ///
    /// Caller must hold exclusive access to the whole arena (no
    /// concurrent allocate/deallocate), and must not double-drop: after
    /// this call the chunk may only be released.
    pub(crate) unsafe fn drop_in_use(&self) {
        for i in 0..self.len {
            // SAFETY: i < len; exclusive access per the caller's contract.
            unsafe {
                let slot = self.first.as_ptr().add(i);
                if (*slot).link.load_unsync().in_use() {
                    ptr::drop_in_place((*slot).payload_ptr());
                }
            }
        }
    }

    /// Returns the chunk's memory to `source`.
    ///
    /// # Safety
    ///
    /// `source` must be the source the chunk was allocated from; no slot
    /// of the chunk may be referenced afterwards.
    pub(crate) unsafe fn release(self, source: MemorySource) {
        if let Some(layout) = Self::layout(self.len) {
            // SAFETY: first/layout pair produced by Self::allocate with
            // the same source; caller guarantees no outstanding use.
            unsafe { source.release(self.first.as_ptr().cast::<u8>(), layout) };
        }
    }
}
