//! Mailbox

use std::time::{Duration, Instant};

use super::lockfree::Queue;
use crate::arena::ArenaConfig;
use crate::error::{PopError, PushError, ReadError, Result};
use crate::sync::Event;

/// A named queue whose readers block instead of polling.
///
/// `write` pushes and broadcasts; `read` pops, and while the mailbox is
/// empty parks on the event until mail arrives or the deadline passes.
/// Spurious wakes just loop back to the pop.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use arenaq::{Mailbox, ReadError};
///
/// let mailbox: Mailbox<u32> = Mailbox::new("commands").unwrap();
/// assert_eq!(mailbox.read(Duration::ZERO), Err(ReadError::Timeout));
///
/// mailbox.write(7).unwrap();
/// assert_eq!(mailbox.read(Duration::from_secs(1)).unwrap(), 7);
/// ```
pub struct Mailbox<T: Send + 'static> {
    name: String,
    queue: Queue<T>,
    event: Event,
}

impl<T: Send + 'static> Mailbox<T> {
    /// Creates a mailbox with the default queue configuration.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Ok(Self { name: name.into(), queue: Queue::new()?, event: Event::new() })
    }

    /// Creates a mailbox whose queue's node arena follows `config`.
    pub fn with_config(name: impl Into<String>, config: ArenaConfig) -> Result<Self> {
        Ok(Self { name: name.into(), queue: Queue::with_config(config)?, event: Event::new() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Posts `value` and wakes every blocked reader.
    pub fn write(&self, value: T) -> core::result::Result<(), PushError<T>> {
        self.queue.push(value)?;
        self.event.notify();
        Ok(())
    }

    /// Takes the oldest value, waiting up to `timeout` for one to arrive.
    pub fn read(&self, timeout: Duration) -> core::result::Result<T, ReadError> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.queue.pop() {
                Ok(value) => return Ok(value),
                Err(PopError::DoubleFree) => return Err(ReadError::DoubleFree),
                Err(PopError::Empty) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ReadError::Timeout);
                    }
                    // Timeout or signal, either way re-check the queue.
                    let _ = self.event.wait(deadline - now);
                },
            }
        }
    }

    /// Mail currently queued.
    pub fn size(&self) -> usize {
        self.queue.size()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
