//! Centralized error types for shared platform primitives.
//!
//! Every keyed-store backend reports failures through [`PlatformError`],
//! with built-in retryability classification so callers can decide between
//! failing open, failing closed, or retrying.

use thiserror::Error;

/// Common error type for platform operations.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store could not be reached or refused the command
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Timeout occurred
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A stored value does not have the shape the caller expects
    #[error("Corrupt value at {key}: {reason}")]
    CorruptValue {
        /// Key holding the unexpected value
        key: String,
        /// What was wrong with it
        reason: String,
    },

    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlatformError {
    /// Check if this error is retryable.
    ///
    /// Retryable errors are transient store failures that may succeed on
    /// retry, such as a dropped connection or a timeout.
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_common::PlatformError;
    ///
    /// let err = PlatformError::unavailable("connection refused");
    /// assert!(err.is_retryable());
    ///
    /// let err = PlatformError::invalid_input("empty key");
    /// assert!(!err.is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }

    /// Create an unavailable error with the given message.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an invalid input error with the given message.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a corrupt value error for `key`.
    #[must_use]
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(PlatformError::unavailable("down").is_retryable());
        assert!(PlatformError::Timeout("slow".to_string()).is_retryable());
    }

    #[test]
    fn test_non_retryable_errors() {
        assert!(!PlatformError::invalid_input("test").is_retryable());
        assert!(!PlatformError::corrupt("k", "not a number").is_retryable());
        assert!(!PlatformError::Internal("test".to_string()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = PlatformError::corrupt("rate_limit:1.2.3.4", "not an integer");
        assert_eq!(
            err.to_string(),
            "Corrupt value at rate_limit:1.2.3.4: not an integer"
        );
    }
}
