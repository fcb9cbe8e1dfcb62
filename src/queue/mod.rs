//! FIFO queues over slab arenas
//!
//! Every queue owns a dedicated arena of nodes; a node is an arena slot
//! whose tagged link word doubles as the queue's next-link while the slot
//! is IN_USE. `size` is derived from the arena's in-use count; there is
//! deliberately no second counter to drift out of sync.
//!
//! Variants by synchronization discipline:
//!
//! - [`Queue`]: lock-free CAS protocol, safe from any thread.
//! - [`SyncQueue`]: one lock around a [`LocalQueue`]; pick the lock via
//!   [`MutexQueue`] or [`SpinQueue`], or hold the guard from
//!   [`lock`](SyncQueue::lock) across several operations.
//! - [`LocalQueue`]: raw single-owner variant, no synchronization.
//!
//! [`MultiQueue`] fans out over several lock-free queues by producer
//! thread; [`Mailbox`] adds a broadcast event so consumers can block.

mod local;
mod lockfree;
mod mailbox;
mod multi;
mod sync;

pub use local::LocalQueue;
pub use lockfree::Queue;
pub use mailbox::Mailbox;
pub use multi::MultiQueue;
pub use sync::{MutexQueue, SpinQueue, SyncQueue};
