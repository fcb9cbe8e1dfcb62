//! Raw memory sources
//!
//! Arenas obtain chunk memory through a [`MemorySource`]: either the system
//! heap or anonymous page mappings. The source hands out raw, uninitialized
//! bytes; slot initialization is the arena's job.

use core::alloc::Layout;
use core::ptr;

/// Where an arena gets its chunk memory from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemorySource {
    /// `std::alloc`, the process heap.
    #[default]
    Heap,
    /// Anonymous private mappings (`mmap`); falls back to the heap on
    /// targets without it. Page granularity suits large chunks.
    Pages,
}

impl MemorySource {
    /// Allocates `layout.size()` bytes aligned to `layout.align()`.
    ///
    /// Returns null when the system refuses. The bytes are uninitialized.
    pub(crate) fn allocate(self, layout: Layout) -> *mut u8 {
        if layout.size() == 0 {
            return ptr::null_mut();
        }

        match self {
            // SAFETY: layout has non-zero size (checked above) and a valid
            // alignment (constructed via Layout::array in the arena).
            MemorySource::Heap => unsafe { std::alloc::alloc(layout) },
            MemorySource::Pages => pages_allocate(layout),
        }
    }

    /// Releases a block previously returned by [`allocate`](Self::allocate)
    /// with the same layout.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this source with exactly this `layout` and must
    /// not be used afterwards.
    pub(crate) unsafe fn release(self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() || layout.size() == 0 {
            return;
        }

        match self {
            // SAFETY: caller contract, ptr/layout pair from std::alloc::alloc.
            MemorySource::Heap => unsafe { std::alloc::dealloc(ptr, layout) },
            // SAFETY: caller contract, ptr/layout pair from pages_allocate.
            MemorySource::Pages => unsafe { pages_release(ptr, layout) },
        }
    }
}

#[cfg(unix)]
fn pages_allocate(layout: Layout) -> *mut u8 {
    // mmap returns page-aligned memory; page alignment dominates every
    // alignment a slot layout can ask for.
    debug_assert!(layout.align() <= page_size());

    // SAFETY: anonymous private mapping, no fd, no fixed address.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            layout.size(),
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        ptr.cast()
    }
}

#[cfg(unix)]
unsafe fn pages_release(ptr: *mut u8, layout: Layout) {
    // SAFETY: caller passes a mapping created by pages_allocate with the
    // same length.
    unsafe {
        libc::munmap(ptr.cast(), layout.size());
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf is thread-safe.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(not(unix))]
fn pages_allocate(layout: Layout) -> *mut u8 {
    // SAFETY: non-zero size checked by the caller.
    unsafe { std::alloc::alloc(layout) }
}

#[cfg(not(unix))]
unsafe fn pages_release(ptr: *mut u8, layout: Layout) {
    // SAFETY: caller contract, heap fallback.
    unsafe { std::alloc::dealloc(ptr, layout) }
}
