//! Result and error types for Tarry.

use crate::client::ClientError;
use thiserror::Error;

/// Result type for Tarry operations
pub type TarryResult<T> = Result<T, TarryError>;

/// Errors that can occur while waiting
#[derive(Debug, Error)]
pub enum TarryError {
    /// Deadline elapsed before the condition was satisfied
    #[error("Timed out after {ms}ms waiting for {waited_for} ({ticks} tick(s))")]
    Timeout {
        /// Effective timeout in milliseconds
        ms: u64,
        /// Description of what was waited for
        waited_for: String,
        /// Number of predicate evaluations performed
        ticks: u32,
    },

    /// The predicate failed, panicked, or a client call inside it errored
    #[error("Predicate failed: {message}")]
    Predicate {
        /// Error message
        message: String,
    },

    /// Invalid poll configuration, rejected before polling starts
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Remote client call failed outside of a predicate
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TarryError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a predicate error
    #[must_use]
    pub fn predicate(message: impl Into<String>) -> Self {
        Self::Predicate {
            message: message.into(),
        }
    }

    /// Whether this error is a deadline expiry
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error came from the predicate
    #[must_use]
    pub const fn is_predicate(&self) -> bool {
        matches!(self, Self::Predicate { .. })
    }

    /// Whether this error is a configuration rejection
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}
