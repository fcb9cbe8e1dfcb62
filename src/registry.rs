//! Per-type arena instance registry
//!
//! Every live arena of an element type holds one index in a fixed table of
//! back-pointers. Slots carry that index in their link counter, which is
//! how `deallocate` finds the owning arena from a payload pointer alone.
//!
//! ## Invariants
//!
//! - Each live arena occupies exactly one index; each index references at
//!   most one live arena.
//! - An entry is reset before the arena's memory is released, never after.
//! - `lookup` on the deallocation path is one wait-free acquire load.
//!
//! The registry itself is an explicit once-initialized object per element
//! type, obtained through [`ArenaRegistry::global`]; entries are
//! type-erased `*mut ()` because two arena families (lock-free and locked)
//! share one index space per type.

use core::any::{Any, TypeId};
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
use std::sync::OnceLock;

use dashmap::DashMap;

/// Upper bound on live arenas per element type.
pub const MAX_ARENAS: usize = 1024;

/// Fixed-size table mapping a registry index to a live arena of one
/// element type.
pub struct ArenaRegistry<T> {
    cells: Box<[AtomicPtr<()>]>,
    _marker: PhantomData<fn(T) -> T>,
}

// SAFETY: the table is an array of atomics plus a fn-pointer PhantomData;
// no access to T values ever goes through the registry itself.
unsafe impl<T> Send for ArenaRegistry<T> {}
// SAFETY: see above; all cell access is atomic.
unsafe impl<T> Sync for ArenaRegistry<T> {}

/// Marker stored in a claimed-but-unpublished cell. Single-owner arenas
/// never publish a real pointer; their entries stay at the marker for
/// their whole lifetime (nothing looks them up).
static CLAIMED: u8 = 0;

#[inline]
fn claimed_marker() -> *mut () {
    &CLAIMED as *const u8 as *mut ()
}

impl<T> ArenaRegistry<T> {
    fn new() -> Self {
        let cells = (0..MAX_ARENAS).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        Self { cells, _marker: PhantomData }
    }

    /// Claims the first free index for `arena`.
    ///
    /// Returns `None` when all [`MAX_ARENAS`] entries are taken.
    pub(crate) fn add(&self, arena: *mut ()) -> Option<u16> {
        debug_assert!(!arena.is_null());

        let index = self.claim()?;
        self.publish(index, arena);
        Some(index)
    }

    /// Reserves the first free index, leaving a marker in the cell.
    ///
    /// The index is valid immediately (slots may start carrying it as
    /// their counter); [`publish`](Self::publish) installs the arena
    /// back-pointer once the arena's shared state has an address.
    pub(crate) fn claim(&self) -> Option<u16> {
        for (index, cell) in self.cells.iter().enumerate() {
            if cell
                .compare_exchange(
                    ptr::null_mut(),
                    claimed_marker(),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                tracing::trace!(index, "claimed arena registry index");
                return Some(index as u16);
            }
        }

        None
    }

    /// Installs the back-pointer for a previously claimed index.
    pub(crate) fn publish(&self, index: u16, arena: *mut ()) {
        debug_assert!(!arena.is_null());

        if let Some(cell) = self.cells.get(usize::from(index)) {
            cell.store(arena, Ordering::Release);
        }
    }

    /// Releases `index` back to the table.
    pub(crate) fn reset(&self, index: u16) {
        if let Some(cell) = self.cells.get(usize::from(index)) {
            cell.store(ptr::null_mut(), Ordering::Release);
            tracing::trace!(index, "reset arena registry entry");
        }
    }

    /// Resolves `index` to the arena registered there, or null.
    ///
    /// Wait-free; this sits on the deallocation hot path.
    #[inline]
    pub(crate) fn lookup(&self, index: u16) -> *mut () {
        match self.cells.get(usize::from(index)) {
            Some(cell) => cell.load(Ordering::Acquire),
            None => ptr::null_mut(),
        }
    }
}

impl<T: 'static> ArenaRegistry<T> {
    /// The process-wide registry for element type `T`.
    ///
    /// Initialized on first use and kept for the life of the process; an
    /// explicit object, not ambient mutable state.
    pub fn global() -> &'static Self {
        static REGISTRIES: OnceLock<DashMap<TypeId, &'static (dyn Any + Send + Sync)>> =
            OnceLock::new();

        let map = REGISTRIES.get_or_init(DashMap::new);
        let entry: &'static (dyn Any + Send + Sync) = *map
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::leak(Box::new(ArenaRegistry::<T>::new())));

        match entry.downcast_ref::<ArenaRegistry<T>>() {
            Some(registry) => registry,
            // The map is keyed by TypeId; the stored value is always the
            // registry of that exact type.
            None => unreachable!("registry entry holds a foreign type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_lookup_reset() {
        let registry = ArenaRegistry::<[u8; 3]>::new();
        let mut a = 0u32;
        let mut b = 0u32;

        let ia = registry.add(&mut a as *mut u32 as *mut ()).unwrap();
        let ib = registry.add(&mut b as *mut u32 as *mut ()).unwrap();
        assert_ne!(ia, ib);

        assert_eq!(registry.lookup(ia), &mut a as *mut u32 as *mut ());
        assert_eq!(registry.lookup(ib), &mut b as *mut u32 as *mut ());

        registry.reset(ia);
        assert!(registry.lookup(ia).is_null());

        // The freed index is the first null entry again.
        let ic = registry.add(&mut b as *mut u32 as *mut ()).unwrap();
        assert_eq!(ic, ia);
    }

    #[test]
    fn out_of_range_lookup_is_null() {
        let registry = ArenaRegistry::<u8>::new();
        assert!(registry.lookup(u16::MAX).is_null());
    }

    #[test]
    fn global_is_per_type() {
        let a = ArenaRegistry::<u128>::global() as *const _ as usize;
        let b = ArenaRegistry::<i128>::global() as *const _ as usize;
        let a2 = ArenaRegistry::<u128>::global() as *const _ as usize;
        assert_ne!(a, b);
        assert_eq!(a, a2);
    }
}
