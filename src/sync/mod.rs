//! Synchronization plumbing
//!
//! The small primitives the data structures are parameterized with: a
//! spin lock pluggable wherever a [`lock_api::RawMutex`] is accepted, a
//! broadcast [`Event`] for blocking consumers, and the condvar-backed
//! [`Semaphore`] driving the arenas' prefetch workers.

mod event;
mod semaphore;
mod spinlock;

pub use event::Event;
pub use semaphore::Semaphore;
pub use spinlock::{RawSpinLock, SpinLock};
