//! Executor Module
//!
//! Thin facade over tokio's runtime. Computations run on the runtime's
//! blocking pool; the facade only submits work and hands back a
//! [`TaskHandle`] for tracking, cancelling and awaiting it.

pub mod handle;

pub use handle::{CancelSignal, TaskHandle};

use log::{debug, info};
use std::sync::{Arc, OnceLock};
use tokio::runtime::{Builder, Handle, Runtime};

use crate::config::ExecutorConfig;
use crate::error::{ForesightError, ForesightResult};
use crate::foresight::types::TaskFailure;

/// Process-wide runtime used when the caller is not inside one
static SHARED_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Submits computations to a tokio runtime
#[derive(Clone)]
pub struct Executor {
    handle: Handle,
    /// Keeps a dedicated runtime alive; `None` for borrowed or shared runtimes
    owned: Option<Arc<Runtime>>,
}

impl Executor {
    /// Use the ambient runtime if there is one, otherwise the shared runtime
    pub fn current() -> ForesightResult<Self> {
        match Handle::try_current() {
            Ok(handle) => Ok(Self::from_handle(handle)),
            Err(_) => Self::shared(),
        }
    }

    /// The lazily built process-wide runtime
    pub fn shared() -> ForesightResult<Self> {
        if let Some(runtime) = SHARED_RUNTIME.get() {
            return Ok(Self::from_handle(runtime.handle().clone()));
        }

        let runtime = build_runtime(&ExecutorConfig::default())?;
        let runtime = SHARED_RUNTIME.get_or_init(move || {
            info!("Started shared foresight runtime");
            runtime
        });
        Ok(Self::from_handle(runtime.handle().clone()))
    }

    /// Wrap an existing runtime handle
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            owned: None,
        }
    }

    /// Build a dedicated runtime.
    ///
    /// The runtime shuts down when the last clone of this executor is
    /// dropped, which must not happen from within an async context.
    pub fn from_config(config: &ExecutorConfig) -> ForesightResult<Self> {
        let runtime = build_runtime(config)?;
        debug!("Started dedicated runtime '{}'", config.thread_name);

        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Some(Arc::new(runtime)),
        })
    }

    /// Submit a job to the blocking pool
    pub fn submit<T, F>(&self, job: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, TaskFailure> + Send + 'static,
    {
        TaskHandle::spawn(&self.handle, Arc::new(CancelSignal::default()), job)
    }

    /// Whether this executor owns its runtime
    pub fn is_dedicated(&self) -> bool {
        self.owned.is_some()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("flavor", &self.handle.runtime_flavor())
            .field("dedicated", &self.is_dedicated())
            .finish()
    }
}

fn build_runtime(config: &ExecutorConfig) -> ForesightResult<Runtime> {
    let mut builder = Builder::new_multi_thread();
    builder.enable_all().thread_name(config.thread_name.clone());

    if let Some(threads) = config.worker_threads {
        if threads == 0 {
            return Err(ForesightError::InvalidConfig(
                "worker_threads must be greater than 0".to_string(),
            ));
        }
        builder.worker_threads(threads);
    }

    if let Some(threads) = config.max_blocking_threads {
        // A computation that nests compute calls on the same runtime needs
        // one more blocking thread per level
        if threads == 0 {
            return Err(ForesightError::InvalidConfig(
                "max_blocking_threads must be greater than 0".to_string(),
            ));
        }
        builder.max_blocking_threads(threads);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_executor_outside_runtime() {
        let executor = Executor::current().unwrap();
        assert!(!executor.is_dedicated());
        let handle = executor.submit(|| Ok::<_, TaskFailure>("done"));
        assert_eq!(handle.await_result().unwrap(), "done");
    }

    #[test]
    fn test_dedicated_executor_from_config() {
        let config = ExecutorConfig {
            worker_threads: Some(1),
            max_blocking_threads: Some(2),
            thread_name: "foresight-test".to_string(),
        };
        let executor = Executor::from_config(&config).unwrap();
        assert!(executor.is_dedicated());

        let handle = executor.submit(|| {
            Ok::<_, TaskFailure>(std::thread::current().name().map(str::to_string))
        });
        assert_eq!(handle.await_result().unwrap().as_deref(), Some("foresight-test"));
    }

    #[test]
    fn test_undersized_pools_rejected() {
        let config = ExecutorConfig {
            worker_threads: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            Executor::from_config(&config),
            Err(ForesightError::InvalidConfig(_))
        ));

        let config = ExecutorConfig {
            max_blocking_threads: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            Executor::from_config(&config),
            Err(ForesightError::InvalidConfig(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_current_uses_ambient_runtime() {
        let executor = Executor::current().unwrap();
        let handle = executor.submit(|| Ok::<_, TaskFailure>(7));
        let value = tokio::task::spawn_blocking(move || handle.await_result())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 7);
    }
}
