//! Error types for the keyed dispatch primitives

use std::time::Duration;

use thiserror::Error;

/// Errors raised by [`ResultCell`](crate::ResultCell) and the signals built on it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CellError {
    #[error("cell was already completed")]
    AlreadyCompleted,
}

/// Errors related to configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid max parallel tasks: {value} (must be > 0)")]
    InvalidMaxParallel { value: usize },
}

/// Errors returned by the bounded-wait helpers in [`crate::timeout`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("Timed out after {duration:?}")]
    Elapsed { duration: Duration },
}

/// Result type alias for cell operations
pub type CellResult<T> = Result<T, CellError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    /// Create an invalid max parallel error
    pub fn invalid_max_parallel(value: usize) -> Self {
        ConfigError::InvalidMaxParallel { value }
    }
}

impl TimeoutError {
    /// Create an elapsed error
    pub fn elapsed(duration: Duration) -> Self {
        TimeoutError::Elapsed { duration }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_helpers() {
        let timeout = TimeoutError::elapsed(Duration::from_secs(5));
        assert_eq!(timeout.to_string(), "Timed out after 5s");
        assert_eq!(
            CellError::AlreadyCompleted.to_string(),
            "cell was already completed"
        );

        let invalid = ConfigError::invalid_max_parallel(0);
        assert_eq!(invalid, ConfigError::InvalidMaxParallel { value: 0 });
        assert_eq!(
            invalid.to_string(),
            "Invalid max parallel tasks: 0 (must be > 0)"
        );
    }
}
