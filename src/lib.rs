//! Foresight
//!
//! Wraps a zero-argument computation, runs it on the caller's thread or on a
//! tokio runtime, and delivers its single value by callback or blocking
//! return. Supports one-time cancellation and optional timing reports.

pub mod config;
pub mod error;
pub mod executor;
pub mod foresight;
pub mod timing;

pub use config::{BlockingDispatch, BlockingFailurePolicy, ExecutorConfig, ForesightConfig, ForesightOptions};
pub use error::{ForesightError, ForesightResult};
pub use executor::{Executor, TaskHandle};
pub use foresight::{Foresight, Recovery, TaskFailure, TaskId, TaskState};
pub use timing::{StdoutSink, TimingReport, TimingSink};
