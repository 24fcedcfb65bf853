//! Foresight Module
//!
//! The single-value task wrapper: lifecycle state, failure types and the
//! wrapper itself.

pub mod types;
pub mod wrapper;

pub use types::{FailureHandler, Recovery, SuccessHandler, TaskFailure, TaskId, TaskState};
pub use wrapper::{Computation, Foresight};
