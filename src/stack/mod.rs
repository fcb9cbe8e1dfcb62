//! LIFO stacks over slab arenas
//!
//! The head-only mirror of the queue family: same node arenas, same
//! tagged link words, Treiber protocol on the lock-free path.

mod local;
mod lockfree;
mod sync;

pub use local::LocalStack;
pub use lockfree::Stack;
pub use sync::{MutexStack, SpinStack, SyncStack};
