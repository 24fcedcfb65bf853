//! Configuration
//!
//! Per-wrapper execution options and settings for dedicated executors.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ForesightResult;

/// What a blocking `compute` does after the synchronous run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingDispatch {
    /// Also submit the computation asynchronously; the async run owns the result slot.
    /// The computation and `on_success` may therefore run twice.
    #[default]
    Mirror,
    /// Only run synchronously and settle the result slot from that run
    SyncOnly,
}

/// How a blocking run treats a computation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingFailurePolicy {
    /// `compute` hands the failure to `on_failure` only; `compute_result` discards it and returns `None`
    #[default]
    Contain,
    /// Consult `on_failure` and the fallback exactly like the asynchronous chain
    Recover,
}

/// Execution options of a single wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForesightOptions {
    /// Run on the caller's thread
    pub blocking: bool,
    /// Report elapsed time on completion
    pub timed: bool,
    pub dispatch: BlockingDispatch,
    pub blocking_failure: BlockingFailurePolicy,
}

impl ForesightOptions {
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn timed(mut self) -> Self {
        self.timed = true;
        self
    }

    pub fn with_dispatch(mut self, dispatch: BlockingDispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_blocking_failure(mut self, policy: BlockingFailurePolicy) -> Self {
        self.blocking_failure = policy;
        self
    }
}

/// Settings for a dedicated tokio runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Async worker threads (tokio default when unset)
    pub worker_threads: Option<usize>,
    /// Upper bound of the blocking pool that runs computations and callbacks
    pub max_blocking_threads: Option<usize>,
    /// Name given to runtime threads
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            max_blocking_threads: None,
            thread_name: "foresight-worker".to_string(),
        }
    }
}

/// Top-level settings file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForesightConfig {
    pub executor: ExecutorConfig,
    pub task: ForesightOptions,
}

impl ForesightConfig {
    /// Parse settings from TOML text
    pub fn from_toml_str(raw: &str) -> ForesightResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> ForesightResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            crate::error::ForesightError::InvalidConfig(format!(
                "{}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_options() {
        let options = ForesightOptions::default();
        assert!(!options.blocking);
        assert!(!options.timed);
        assert_eq!(options.dispatch, BlockingDispatch::Mirror);
        assert_eq!(options.blocking_failure, BlockingFailurePolicy::Contain);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = ForesightConfig::from_toml_str(
            r#"
            [executor]
            worker_threads = 2

            [task]
            timed = true
            dispatch = "sync_only"
            "#,
        )
        .unwrap();

        assert_eq!(config.executor.worker_threads, Some(2));
        assert_eq!(config.executor.thread_name, "foresight-worker");
        assert!(config.task.timed);
        assert!(!config.task.blocking);
        assert_eq!(config.task.dispatch, BlockingDispatch::SyncOnly);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = ForesightConfig::from_toml_str("[task]\nblocking = \"yes\"").unwrap_err();
        assert!(matches!(err, crate::error::ForesightError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[task]\nblocking = true\nblocking_failure = \"recover\"").unwrap();

        let config = ForesightConfig::load(file.path()).unwrap();
        assert!(config.task.blocking);
        assert_eq!(config.task.blocking_failure, BlockingFailurePolicy::Recover);

        assert!(ForesightConfig::load("/definitely/not/here.toml").is_err());
    }
}
