//! # arenaq
//!
//! Fixed-type slab arenas with O(1) allocate/deallocate, and the
//! high-throughput concurrent structures built on them: a FIFO queue, a
//! LIFO stack, a multi-queue fan-out, and a blocking mailbox.
//!
//! Everything stands on one foundation: an arena that owns chunks of
//! equally-sized slots for a single statically-known element type,
//! threaded into an intrusive LIFO free list through tagged link words.
//! One 64-bit word per slot packs the link address, a free/in-use flag,
//! and the owning arena's registry index, so the lock-free paths move a
//! slot and its meta state with a single CAS, and a payload pointer alone
//! is enough to find the arena it came from.
//!
//! ## Quick start
//!
//! ```
//! use arenaq::{Arena, ArenaConfig, Queue};
//!
//! // A slab of u64 slots, growing by chunks of 64.
//! let arena: Arena<u64> = Arena::with_config(ArenaConfig::new(64))?;
//! let ptr = arena.allocate(7).ok().unwrap();
//! unsafe { arena.deallocate(ptr.as_ptr()).unwrap() };
//!
//! // A lock-free queue drawing its nodes from a dedicated arena.
//! let queue: Queue<u64> = Queue::new()?;
//! queue.push(1).unwrap();
//! assert_eq!(queue.pop().unwrap(), 1);
//! # Ok::<(), arenaq::MemoryError>(())
//! ```
//!
//! ## Picking a variant
//!
//! | Discipline | Arena | Queue | Stack |
//! |---|---|---|---|
//! | lock-free | [`Arena`] | [`Queue`] | [`Stack`] |
//! | mutex | [`MutexArena`] | [`MutexQueue`] | [`MutexStack`] |
//! | spin lock | [`SpinArena`] | [`SpinQueue`] | [`SpinStack`] |
//! | single owner | [`LocalArena`] | [`LocalQueue`] | [`LocalStack`] |
//!
//! The serialized variants are generic over [`lock_api::RawMutex`], so
//! any raw mutex plugs in where the aliases above make the common picks.
//!
//! ## Ownership contract
//!
//! A slot may only be freed by the thread that currently owns it
//! exclusively, never a slot freshly handed over by another party
//! without synchronization. The lock-free free list relies on this
//! discipline (instead of a generation counter) to exclude ABA; it is an
//! API invariant, not an implementation detail.

#![warn(clippy::all)]
#![warn(clippy::perf)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::new_without_default)]
// Result<_, T> hands the value back on refusal; an error type would only
// wrap it.
#![allow(clippy::result_unit_err)]

pub mod arena;
pub mod error;
pub mod queue;
pub mod registry;
pub mod source;
pub mod stack;
pub mod sync;
pub mod tagged;
pub mod utils;

pub use arena::{Arena, ArenaConfig, ArenaStats, LocalArena, LockedArena, MutexArena, SpinArena};
pub use error::{
    DeallocError, MemoryError, PopError, PushError, ReadError, Result, WaitOutcome,
};
pub use queue::{LocalQueue, Mailbox, MultiQueue, MutexQueue, Queue, SpinQueue, SyncQueue};
pub use registry::{ArenaRegistry, MAX_ARENAS};
pub use source::MemorySource;
pub use stack::{LocalStack, MutexStack, SpinStack, Stack, SyncStack};
pub use sync::{Event, RawSpinLock, Semaphore, SpinLock};
