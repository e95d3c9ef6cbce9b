//! Unified error handling for hipmr
//!
//! Every fallible operation in the crate returns [`MemoryError`]. Errors are
//! categorized so callers can decide what to do with them:
//! - Recoverable (out of memory, free something and retry)
//! - User (invalid configuration, unsupported query)
//! - Backend (HIP driver failures)
//! - Internal (bugs, poisoned locks)
//!
//! Precondition violations on `deallocate` (double free, foreign pointer,
//! size mismatch) are not represented here. They are caller contract
//! violations and are reported through `debug_assert!`.

use std::fmt;

// Re-export thiserror for convenience
pub use thiserror;

/// Unified error type for hipmr
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// Neither the free list nor upstream growth can satisfy the request
    #[error("out of memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory { requested: usize, available: usize },

    /// A HIP runtime call failed for a reason other than exhaustion
    #[error("HIP call {call} failed with code {code}")]
    Hip { call: &'static str, code: i32 },

    /// Invalid resource or pool configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The resource cannot answer the query
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The event log was requested but logging is not enabled
    #[error("Event logging is not enabled")]
    LoggingDisabled,

    /// Lock poisoned (a thread panicked while holding a resource lock)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),

    /// The event log could not be rendered
    #[error("Event log error: {0}")]
    EventLog(String),
}

impl MemoryError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            MemoryError::OutOfMemory { .. } => ErrorCategory::Recoverable,
            MemoryError::InvalidConfiguration(_)
            | MemoryError::Unsupported(_)
            | MemoryError::LoggingDisabled => ErrorCategory::User,
            MemoryError::Hip { .. } => ErrorCategory::Backend,
            MemoryError::LockPoisoned(_) | MemoryError::EventLog(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this error is recoverable (temporary condition)
    ///
    /// Only exhaustion is recoverable: the caller may free other memory and
    /// try again. The allocator itself never retries.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Recoverable)
    }

    /// Check if this is a user-facing error (bad input or configuration)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }

    /// Shorthand used by the resources when a request cannot be met
    pub fn out_of_memory(requested: usize, available: usize) -> Self {
        MemoryError::OutOfMemory {
            requested,
            available,
        }
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User error - invalid input or configuration
    User,
    /// Recoverable error - temporary condition
    Recoverable,
    /// Internal error - indicates a bug
    Internal,
    /// Backend error - HIP driver failure
    Backend,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Recoverable => write!(f, "Recoverable"),
            ErrorCategory::Internal => write!(f, "Internal"),
            ErrorCategory::Backend => write!(f, "Backend"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for MemoryError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        MemoryError::LockPoisoned(err.to_string())
    }
}

impl From<csv::Error> for MemoryError {
    fn from(err: csv::Error) -> Self {
        MemoryError::EventLog(err.to_string())
    }
}

/// Helper type alias for Results using MemoryError
pub type MemResult<T> = std::result::Result<T, MemoryError>;

/// Create a configuration error with context
///
/// # Examples
/// ```ignore
/// return Err(config_error!("alignment {} is not a power of two", alignment));
/// ```
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::MemoryError::InvalidConfiguration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MemoryError::InvalidConfiguration(format!($fmt, $($arg)*))
    };
}
