//! Error and result types
//!
//! Every operation returns a tagged result; nothing on a hot path panics
//! for control flow. Construction-time problems surface as [`MemoryError`];
//! the per-operation enums below are deliberately tiny so they stay in
//! registers.

use core::fmt;

/// Result alias for fallible construction.
pub type Result<T> = core::result::Result<T, MemoryError>;

/// Errors raised while building an arena or a structure on top of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// A configuration value failed validation.
    InvalidConfig { message: &'static str },

    /// Every registry index for this element type is taken.
    RegistryFull { capacity: usize },

    /// The memory source refused the initial reservation.
    AllocationFailed { bytes: usize },

    /// The operating system refused a resource (worker thread spawn).
    SystemError { message: String },
}

impl MemoryError {
    /// Creates an invalid-configuration error.
    pub fn invalid_config(message: &'static str) -> Self {
        Self::InvalidConfig { message }
    }

    /// Creates a registry-full error.
    pub fn registry_full(capacity: usize) -> Self {
        Self::RegistryFull { capacity }
    }

    /// Creates an allocation-failed error.
    pub fn allocation_failed(bytes: usize) -> Self {
        Self::AllocationFailed { bytes }
    }

    /// Creates a system error.
    pub fn system_error(message: impl Into<String>) -> Self {
        Self::SystemError { message: message.into() }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { message } => {
                write!(f, "invalid configuration: {message}")
            },
            Self::RegistryFull { capacity } => {
                write!(f, "arena registry full ({capacity} entries)")
            },
            Self::AllocationFailed { bytes } => {
                write!(f, "initial reservation of {bytes} bytes failed")
            },
            Self::SystemError { message } => {
                write!(f, "system error: {message}")
            },
        }
    }
}

impl std::error::Error for MemoryError {}

/// Why a deallocation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeallocError {
    /// The pointer was null.
    NullPointer,
    /// The slot behind the pointer is already free.
    DoubleFree,
}

impl fmt::Display for DeallocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullPointer => write!(f, "deallocate called with a null pointer"),
            Self::DoubleFree => write!(f, "slot is already free"),
        }
    }
}

impl std::error::Error for DeallocError {}

/// A push was refused; the value is handed back untouched.
///
/// The only cause is the node arena refusing a slot (size limit reached,
/// the memory source out of chunks, or an extension still in flight).
pub struct PushError<T>(pub T);

impl<T> PushError<T> {
    /// Recovers the value that could not be pushed.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PushError(..)")
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "push refused: node arena exhausted")
    }
}

impl<T> std::error::Error for PushError<T> {}

/// Why a pop returned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// The structure holds no items.
    Empty,
    /// The detached node was already free: an application-level double
    /// release was detected while retiring it.
    DoubleFree,
}

impl fmt::Display for PopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::DoubleFree => write!(f, "detached node was already free"),
        }
    }
}

impl std::error::Error for PopError {}

/// Why a mailbox read returned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// The deadline passed with the mailbox still empty.
    Timeout,
    /// A double release was detected while retiring the node.
    DoubleFree,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out waiting for mail"),
            Self::DoubleFree => write!(f, "detached node was already free"),
        }
    }
}

impl std::error::Error for ReadError {}

/// Outcome of waiting on an [`Event`](crate::sync::Event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The event was notified (or the wait woke spuriously).
    Signaled,
    /// The timeout elapsed first.
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_strings() {
        assert_eq!(
            MemoryError::invalid_config("chunk_size must be >= 1").to_string(),
            "invalid configuration: chunk_size must be >= 1"
        );
        assert_eq!(MemoryError::registry_full(1024).to_string(), "arena registry full (1024 entries)");
        assert_eq!(DeallocError::DoubleFree.to_string(), "slot is already free");
        assert_eq!(PopError::Empty.to_string(), "empty");
    }

    #[test]
    fn push_error_returns_value() {
        let err = PushError(vec![1, 2, 3]);
        assert_eq!(err.into_inner(), vec![1, 2, 3]);
    }
}
