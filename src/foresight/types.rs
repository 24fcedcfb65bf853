//! Foresight Types
//!
//! Identity, lifecycle state and failure types for the task wrapper.

use log::warn;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier of a wrapper, used for timing output and log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a new random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskState {
    /// Created, nothing executed yet
    Pending = 0,
    /// A compute call is in flight
    Running = 1,
    /// A blocking call returned without touching the result slot
    Returned = 2,
    /// The asynchronous chain produced its (possibly absent) value
    Fulfilled = 3,
    /// Cancelled before the chain could complete
    Cancelled = 4,
}

impl TaskState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Returned,
            3 => Self::Fulfilled,
            _ => Self::Cancelled,
        }
    }

    /// Fulfilled in the lifecycle sense: produced a value or was cancelled
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled | Self::Cancelled)
    }

    /// Check if a compute call has already been made
    pub fn is_started(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Returned => write!(f, "returned"),
            Self::Fulfilled => write!(f, "fulfilled"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a computation did not produce a value
#[derive(Error, Debug)]
pub enum TaskFailure {
    #[error("Computation failed: {0}")]
    Error(anyhow::Error),

    #[error("Computation panicked: {0}")]
    Panicked(String),

    #[error("Computation was cancelled")]
    Cancelled,

    #[error("Task result was already claimed")]
    Detached,
}

impl TaskFailure {
    /// Convert a caught panic payload into a failure
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        TaskFailure::Panicked(message)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskFailure::Cancelled)
    }
}

/// Callback receiving a computation failure
pub type FailureHandler = Arc<dyn Fn(&TaskFailure) + Send + Sync>;

/// Callback receiving a successfully resolved value
pub type SuccessHandler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// What to do when the computation fails: an optional handler and an optional fallback value
pub struct Recovery<T> {
    on_failure: Option<FailureHandler>,
    fallback: Option<T>,
}

impl<T> Recovery<T> {
    /// No handler, no fallback: failures resolve to an absent value
    pub fn none() -> Self {
        Self {
            on_failure: None,
            fallback: None,
        }
    }

    /// Set the failure handler
    pub fn on_failure<F>(mut self, handler: F) -> Self
    where
        F: Fn(&TaskFailure) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(handler));
        self
    }

    /// Set the value substituted for a failed computation
    pub fn fallback(mut self, value: T) -> Self {
        self.fallback = Some(value);
        self
    }

    pub fn has_handler(&self) -> bool {
        self.on_failure.is_some()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Hand the failure to the handler only; the fallback is not consulted.
    ///
    /// A panicking handler is logged and otherwise ignored.
    pub(crate) fn notify(&self, failure: &TaskFailure) {
        let Some(handler) = &self.on_failure else {
            return;
        };

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(failure))) {
            warn!(
                "Failure handler panicked: {}",
                TaskFailure::from_panic(payload)
            );
        }
    }
}

impl<T: Clone> Recovery<T> {
    /// Hand the failure to the handler and resolve to the fallback, if any
    pub(crate) fn recover(&self, failure: &TaskFailure) -> Option<T> {
        self.notify(failure);
        self.fallback.clone()
    }
}

impl<T> Default for Recovery<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T: Clone> Clone for Recovery<T> {
    fn clone(&self) -> Self {
        Self {
            on_failure: self.on_failure.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_task_ids_are_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }

    #[test]
    fn test_state_round_trip_and_flags() {
        for state in [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Returned,
            TaskState::Fulfilled,
            TaskState::Cancelled,
        ] {
            assert_eq!(TaskState::from_u8(state as u8), state);
        }
        assert!(!TaskState::Pending.is_started());
        assert!(!TaskState::Returned.is_fulfilled());
        assert!(TaskState::Cancelled.is_fulfilled());
    }

    #[test]
    fn test_panic_payload_extraction() {
        let failure = TaskFailure::from_panic(Box::new("boom"));
        assert!(matches!(failure, TaskFailure::Panicked(ref m) if m == "boom"));

        let failure = TaskFailure::from_panic(Box::new(String::from("owned")));
        assert!(matches!(failure, TaskFailure::Panicked(ref m) if m == "owned"));

        let failure = TaskFailure::from_panic(Box::new(7_u32));
        assert!(matches!(failure, TaskFailure::Panicked(_)));
    }

    #[test]
    fn test_recovery_resolves_to_fallback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let recovery = Recovery::none()
            .on_failure(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .fallback("default");

        assert!(recovery.has_handler());
        assert!(recovery.has_fallback());

        let failure = TaskFailure::Error(anyhow::anyhow!("bad"));
        assert_eq!(recovery.recover(&failure), Some("default"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let empty: Recovery<&str> = Recovery::none();
        assert!(!empty.has_handler());
        assert!(!empty.has_fallback());
        assert_eq!(empty.recover(&failure), None);
    }

    #[test]
    fn test_panicking_handler_still_resolves_fallback() {
        let recovery = Recovery::none()
            .on_failure(|_| panic!("handler broke"))
            .fallback(3_u8);

        let failure = TaskFailure::Error(anyhow::anyhow!("bad"));
        assert_eq!(recovery.recover(&failure), Some(3));
    }
}
