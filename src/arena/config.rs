//! Arena configuration

use crate::error::{MemoryError, Result};
use crate::source::MemorySource;

/// Construction-time knobs for every arena variant.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Slots added per chunk extension. Must be at least 1.
    pub chunk_size: usize,

    /// Slots reserved up front; rounded up to whole chunks. Must be at
    /// least `chunk_size`.
    pub initial_size: usize,

    /// Hard ceiling on total slots; 0 means unbounded.
    pub size_limit: usize,

    /// When non-zero, a background worker extends the arena whenever the
    /// free-slot count falls to or below this value, and the allocation
    /// fast path never grows inline. Zero selects synchronous growth.
    pub alloc_threshold: usize,

    /// Where chunk memory comes from.
    pub source: MemorySource,
}

impl ArenaConfig {
    /// Starts from `chunk_size` slots per chunk, reserving one chunk,
    /// unbounded, synchronous growth, heap memory.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            initial_size: chunk_size,
            size_limit: 0,
            alloc_threshold: 0,
            source: MemorySource::Heap,
        }
    }

    pub fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    pub fn with_size_limit(mut self, size_limit: usize) -> Self {
        self.size_limit = size_limit;
        self
    }

    pub fn with_alloc_threshold(mut self, alloc_threshold: usize) -> Self {
        self.alloc_threshold = alloc_threshold;
        self
    }

    pub fn with_source(mut self, source: MemorySource) -> Self {
        self.source = source;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(MemoryError::invalid_config("chunk_size must be at least 1"));
        }

        if self.initial_size < self.chunk_size {
            return Err(MemoryError::invalid_config("initial_size must be at least chunk_size"));
        }

        if self.size_limit != 0 && self.size_limit < self.initial_size {
            return Err(MemoryError::invalid_config("size_limit smaller than initial_size"));
        }

        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(1024)
    }
}
