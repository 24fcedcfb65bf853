//! Task Handle
//!
//! Tracks one submitted job: completion, cancellation, continuations and
//! blocking retrieval of its outcome.

use futures::executor::block_on;
use log::debug;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::foresight::types::TaskFailure;

/// Cancellation request shared by every stage of one chain
#[derive(Debug, Default)]
pub struct CancelSignal {
    cancelled: AtomicBool,
    interrupt: AtomicBool,
}

impl CancelSignal {
    /// Returns false if cancellation was already requested
    fn cancel(&self, interrupt: bool) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.interrupt.store(interrupt, Ordering::Release);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn interrupt_requested(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }
}

/// Handle for a job running on the executor's blocking pool
pub struct TaskHandle<T> {
    join: JoinHandle<()>,
    receiver: Mutex<Option<oneshot::Receiver<Result<T, TaskFailure>>>>,
    signal: Arc<CancelSignal>,
    runtime: Handle,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Spawn `job` on the blocking pool of `runtime`
    pub(crate) fn spawn<F>(runtime: &Handle, signal: Arc<CancelSignal>, job: F) -> Self
    where
        F: FnOnce() -> Result<T, TaskFailure> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let guard = signal.clone();

        let join = runtime.spawn_blocking(move || {
            if guard.is_cancelled() {
                debug!("Job cancelled before it started");
                return;
            }

            let outcome = match catch_unwind(AssertUnwindSafe(job)) {
                Ok(outcome) => outcome,
                Err(payload) => Err(TaskFailure::from_panic(payload)),
            };

            // Receiver may already be gone if nobody waits for the result
            let _ = tx.send(outcome);
        });

        Self {
            join,
            receiver: Mutex::new(Some(rx)),
            signal,
            runtime: runtime.clone(),
        }
    }

    /// Check if the job has run to completion (or was dropped before starting)
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Check if cancellation has been requested on this chain
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Check if the cancellation asked for the job to be aborted
    pub fn interrupt_requested(&self) -> bool {
        self.signal.interrupt_requested()
    }

    /// Request cancellation.
    ///
    /// Stages that have not started yet will never run. A stage that is
    /// already running cannot be pre-empted and runs to completion; its
    /// outcome is discarded. `interrupt` additionally aborts the scheduled
    /// job. Returns false if the job already finished or was already cancelled.
    pub fn request_cancel(&self, interrupt: bool) -> bool {
        if self.is_finished() {
            return false;
        }

        if !self.signal.cancel(interrupt) {
            return false;
        }

        if interrupt {
            self.join.abort();
        }

        debug!("Cancellation requested (interrupt: {})", interrupt);
        true
    }

    /// Attach a continuation that receives this job's outcome.
    ///
    /// Waiting for the upstream happens on the async side of the runtime;
    /// only `stage` itself occupies a blocking thread. The continuation
    /// shares this handle's cancellation signal, so cancelling the returned
    /// handle also stops a not-yet-started upstream.
    pub fn then<U, F>(self, stage: F) -> TaskHandle<U>
    where
        U: Send + 'static,
        F: FnOnce(Result<T, TaskFailure>) -> Result<U, TaskFailure> + Send + 'static,
    {
        let upstream = self.receiver.lock().take();
        let signal = self.signal.clone();
        let guard = signal.clone();
        let runtime = self.runtime.clone();
        let (tx, rx) = oneshot::channel();

        let join = self.runtime.spawn(async move {
            let outcome = match upstream {
                Some(receiver) => receiver.await.unwrap_or_else(|_| Err(TaskFailure::Cancelled)),
                None => Err(TaskFailure::Detached),
            };

            if guard.is_cancelled() {
                debug!("Continuation cancelled before it started");
                let _ = tx.send(Err(TaskFailure::Cancelled));
                return;
            }

            let outcome = match runtime.spawn_blocking(move || stage(outcome)).await {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => Err(TaskFailure::from_panic(err.into_panic())),
                Err(_) => Err(TaskFailure::Cancelled),
            };
            let _ = tx.send(outcome);
        });

        TaskHandle {
            join,
            receiver: Mutex::new(Some(rx)),
            signal,
            runtime: self.runtime.clone(),
        }
    }

    /// Block the calling thread until the job resolves.
    ///
    /// Only the first caller receives the outcome; later calls get `Detached`.
    pub fn await_result(&self) -> Result<T, TaskFailure> {
        let receiver = self.receiver.lock().take();
        match receiver {
            Some(rx) => block_on(rx).unwrap_or_else(|_| Err(TaskFailure::Cancelled)),
            None => Err(TaskFailure::Detached),
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.join.is_finished())
            .field("cancelled", &self.signal.is_cancelled())
            .field("interrupt", &self.signal.interrupt_requested())
            .finish()
    }
}
