//! Foresight Error Types
//!
//! Usage errors raised by the task wrapper and its executor facade.

use thiserror::Error;

use crate::foresight::types::TaskFailure;

/// Errors returned to callers of the wrapper API
#[derive(Error, Debug)]
pub enum ForesightError {
    // Invalid-state (usage) errors
    #[error("Foresight has already been fulfilled")]
    AlreadyFulfilled,

    #[error("Foresight has already started executing")]
    AlreadyStarted,

    #[error("Cannot cancel blocking Foresight")]
    CancelBlocking,

    #[error("Cannot cancel fulfilled Foresight")]
    CancelFulfilled,

    #[error("Cannot cancel completed Foresight")]
    CancelCompleted,

    // Outcome errors
    #[error("Foresight was cancelled")]
    Cancelled,

    #[error(transparent)]
    Task(#[from] TaskFailure),

    // Setup errors
    #[error("Executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ForesightError {
    /// Whether this is a programmer error (calling an operation in the wrong state)
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            ForesightError::AlreadyFulfilled
                | ForesightError::AlreadyStarted
                | ForesightError::CancelBlocking
                | ForesightError::CancelFulfilled
                | ForesightError::CancelCompleted
        )
    }
}

impl From<std::io::Error> for ForesightError {
    fn from(err: std::io::Error) -> Self {
        ForesightError::ExecutorUnavailable(err.to_string())
    }
}

impl From<toml::de::Error> for ForesightError {
    fn from(err: toml::de::Error) -> Self {
        ForesightError::InvalidConfig(err.to_string())
    }
}

/// Result type alias for wrapper operations
pub type ForesightResult<T> = Result<T, ForesightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_classification() {
        assert!(ForesightError::AlreadyFulfilled.is_invalid_state());
        assert!(ForesightError::CancelBlocking.is_invalid_state());
        assert!(ForesightError::CancelCompleted.is_invalid_state());
        assert!(!ForesightError::Cancelled.is_invalid_state());
        assert!(!ForesightError::ExecutorUnavailable("down".into()).is_invalid_state());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ForesightError::CancelBlocking.to_string(),
            "Cannot cancel blocking Foresight"
        );
        let err: ForesightError = TaskFailure::Panicked("boom".into()).into();
        assert_eq!(err.to_string(), "Computation panicked: boom");
    }
}
