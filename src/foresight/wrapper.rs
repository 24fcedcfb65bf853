//! Foresight Wrapper
//!
//! Runs a zero-argument computation once, either on the caller's thread or
//! on the executor, and delivers its value by callback or blocking return.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use super::types::{Recovery, SuccessHandler, TaskFailure, TaskId, TaskState};
use crate::config::{BlockingDispatch, BlockingFailurePolicy, ForesightOptions};
use crate::error::{ForesightError, ForesightResult};
use crate::executor::{Executor, TaskHandle};
use crate::timing::{StdoutSink, Stopwatch, TimingSink};

/// The wrapped computation
pub type Computation<T> = Arc<dyn Fn() -> anyhow::Result<T> + Send + Sync>;

/// State shared between the wrapper and its asynchronous chain
struct Shared<T> {
    state: AtomicU8,
    /// Interrupt flag of the cancel call, for handles stored after it
    interrupt: AtomicBool,
    result: Mutex<Option<T>>,
    handle: Mutex<Option<Arc<TaskHandle<Option<T>>>>>,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(TaskState::Pending as u8),
            interrupt: AtomicBool::new(false),
            result: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the single execution attempt
    fn begin(&self) -> ForesightResult<()> {
        if self.transition(TaskState::Pending, TaskState::Running) {
            return Ok(());
        }

        if self.state().is_fulfilled() {
            Err(ForesightError::AlreadyFulfilled)
        } else {
            Err(ForesightError::AlreadyStarted)
        }
    }

    /// Store the resolved value; loses to a concurrent cancellation
    fn fulfil(&self, value: Option<T>) -> bool {
        let mut slot = self.result.lock();
        if !self.transition(TaskState::Running, TaskState::Fulfilled) {
            return false;
        }
        *slot = value;
        true
    }
}

/// Reports elapsed time for timed wrappers; a no-op otherwise
#[derive(Clone)]
struct Timer {
    id: TaskId,
    sink: Option<Arc<dyn TimingSink>>,
    watch: Stopwatch,
}

impl Timer {
    fn finish(&self) {
        if let Some(sink) = &self.sink {
            sink.record(&self.watch.report(self.id));
        }
    }
}

/// Run the computation inside a failure boundary that also catches panics
fn run_guarded<T>(computation: &Computation<T>) -> Result<T, TaskFailure> {
    match catch_unwind(AssertUnwindSafe(|| computation())) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskFailure::Error(err)),
        Err(payload) => Err(TaskFailure::from_panic(payload)),
    }
}

/// Hand `value` to `on_success`; a panicking callback is logged and ignored
fn deliver<T>(id: TaskId, on_success: &SuccessHandler<T>, value: T) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| on_success(value))) {
        warn!(
            "Success handler of Foresight {} panicked: {}",
            id,
            TaskFailure::from_panic(payload)
        );
    }
}

/// Single-value task wrapper.
///
/// Configure with the `with_*` methods before the first compute call; a
/// wrapper executes at most once and cannot be reused afterwards.
pub struct Foresight<T> {
    id: TaskId,
    computation: Computation<T>,
    options: ForesightOptions,
    executor: Option<Executor>,
    sink: Arc<dyn TimingSink>,
    shared: Arc<Shared<T>>,
}

impl<T> Foresight<T>
where
    T: Clone + Send + 'static,
{
    /// Wrap a fallible computation. Nothing runs until a compute call.
    pub fn of<F, E>(computation: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<anyhow::Error>,
    {
        Self::from_computation(Arc::new(move || computation().map_err(Into::into)))
    }

    /// Wrap a computation that can only fail by panicking
    pub fn infallible<F>(computation: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::from_computation(Arc::new(move || Ok(computation())))
    }

    fn from_computation(computation: Computation<T>) -> Self {
        let id = TaskId::new();
        debug!("Created Foresight {}", id);

        Self {
            id,
            computation,
            options: ForesightOptions::default(),
            executor: None,
            sink: Arc::new(StdoutSink),
            shared: Arc::new(Shared::new()),
        }
    }

    fn configure(mut self, setting: &str, apply: impl FnOnce(&mut Self)) -> Self {
        if self.is_started() {
            warn!(
                "Ignoring {} on Foresight {}: execution already started",
                setting, self.id
            );
            return self;
        }
        apply(&mut self);
        self
    }

    /// Run on the caller's thread
    pub fn with_blocking(self) -> Self {
        self.configure("with_blocking", |f| f.options.blocking = true)
    }

    /// Report elapsed time on completion
    pub fn with_timing(self) -> Self {
        self.configure("with_timing", |f| f.options.timed = true)
    }

    /// Replace all execution options at once
    pub fn with_options(self, options: ForesightOptions) -> Self {
        self.configure("with_options", |f| f.options = options)
    }

    pub fn with_dispatch(self, dispatch: BlockingDispatch) -> Self {
        self.configure("with_dispatch", |f| f.options.dispatch = dispatch)
    }

    pub fn with_blocking_failure(self, policy: BlockingFailurePolicy) -> Self {
        self.configure("with_blocking_failure", |f| {
            f.options.blocking_failure = policy
        })
    }

    /// Submit to `executor` instead of the ambient/shared runtime
    pub fn with_executor(self, executor: Executor) -> Self {
        self.configure("with_executor", |f| f.executor = Some(executor))
    }

    /// Send timing reports somewhere other than stdout
    pub fn with_timing_sink(self, sink: Arc<dyn TimingSink>) -> Self {
        self.configure("with_timing_sink", |f| f.sink = sink)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    pub fn options(&self) -> ForesightOptions {
        self.options
    }

    pub fn is_blocking(&self) -> bool {
        self.options.blocking
    }

    pub fn is_timed(&self) -> bool {
        self.options.timed
    }

    pub fn is_started(&self) -> bool {
        self.state().is_started()
    }

    /// Produced a value (possibly absent) or was cancelled
    pub fn is_fulfilled(&self) -> bool {
        self.state().is_fulfilled()
    }

    /// The value stored by the asynchronous completion, if any
    pub fn result(&self) -> Option<T> {
        self.shared.result.lock().clone()
    }

    /// Cancel, interrupting the computation if possible
    pub fn cancel(&self) -> ForesightResult<()> {
        self.cancel_with(true)
    }

    /// Cancel this wrapper.
    ///
    /// Fails for blocking wrappers, fulfilled wrappers and wrappers whose job
    /// already finished. Cancelling a wrapper that was never started is
    /// allowed and makes every later compute call fail.
    pub fn cancel_with(&self, interrupt: bool) -> ForesightResult<()> {
        if self.options.blocking {
            return Err(ForesightError::CancelBlocking);
        }

        if self.is_fulfilled() {
            return Err(ForesightError::CancelFulfilled);
        }

        let handle = self.shared.handle.lock().clone();
        if handle.as_ref().is_some_and(|h| h.is_finished()) {
            return Err(ForesightError::CancelCompleted);
        }

        self.shared.interrupt.store(interrupt, Ordering::Release);
        let cancelled = self.shared.transition(TaskState::Pending, TaskState::Cancelled)
            || self.shared.transition(TaskState::Running, TaskState::Cancelled);
        if !cancelled {
            // Lost the race against completion
            return Err(match self.state() {
                TaskState::Returned => ForesightError::CancelCompleted,
                _ => ForesightError::CancelFulfilled,
            });
        }

        if let Some(handle) = handle {
            handle.request_cancel(interrupt);
        }
        *self.shared.result.lock() = None;

        info!("Cancelled Foresight {} (interrupt: {})", self.id, interrupt);
        Ok(())
    }

    /// Compute and hand the value to `on_success`
    pub fn compute<S>(&self, on_success: S) -> ForesightResult<()>
    where
        S: Fn(T) + Send + Sync + 'static,
    {
        self.compute_with(on_success, Recovery::none())
    }

    /// Compute, handing failures to `on_failure`
    pub fn compute_catching<S, F>(&self, on_success: S, on_failure: F) -> ForesightResult<()>
    where
        S: Fn(T) + Send + Sync + 'static,
        F: Fn(&TaskFailure) + Send + Sync + 'static,
    {
        self.compute_with(on_success, Recovery::none().on_failure(on_failure))
    }

    /// Compute with full control over failure handling.
    ///
    /// In blocking mode the computation first runs on the calling thread.
    /// Unless dispatch is [`BlockingDispatch::SyncOnly`], it is then also
    /// submitted to the executor, so both the computation and `on_success`
    /// may run twice. Only the asynchronous run updates the result slot.
    pub fn compute_with<S>(&self, on_success: S, recovery: Recovery<T>) -> ForesightResult<()>
    where
        S: Fn(T) + Send + Sync + 'static,
    {
        let on_success: SuccessHandler<T> = Arc::new(on_success);
        let sync_only =
            self.options.blocking && self.options.dispatch == BlockingDispatch::SyncOnly;
        let executor = if sync_only {
            None
        } else {
            Some(self.executor()?)
        };

        self.shared.begin()?;
        let timer = self.timer();

        if self.options.blocking {
            debug!("Running Foresight {} on the calling thread", self.id);
            let value = self.run_blocking(&timer, &recovery, Some(&on_success));

            if sync_only {
                self.shared.fulfil(value);
                return Ok(());
            }
        }

        if let Some(executor) = executor {
            self.dispatch(executor, Some(on_success), recovery, timer);
        }
        Ok(())
    }

    /// Compute and return the value
    pub fn compute_result(&self) -> ForesightResult<Option<T>> {
        self.compute_result_with(Recovery::none())
    }

    /// Compute and return the value, handing failures to `on_failure`
    pub fn compute_result_catching<F>(&self, on_failure: F) -> ForesightResult<Option<T>>
    where
        F: Fn(&TaskFailure) + Send + Sync + 'static,
    {
        self.compute_result_with(Recovery::none().on_failure(on_failure))
    }

    /// Compute and return the value, or `fallback` if the computation fails
    pub fn compute_result_or(&self, fallback: T) -> ForesightResult<Option<T>> {
        self.compute_result_with(Recovery::none().fallback(fallback))
    }

    /// Compute and return the value.
    ///
    /// Non-blocking wrappers submit to the executor and park the calling
    /// thread until the chain resolves. Blocking wrappers run inline and,
    /// under [`BlockingFailurePolicy::Contain`], return `None` on failure
    /// without consulting `recovery`.
    pub fn compute_result_with(&self, recovery: Recovery<T>) -> ForesightResult<Option<T>> {
        if self.options.blocking {
            self.shared.begin()?;
            let timer = self.timer();
            let value = self.run_blocking(&timer, &recovery, None);
            self.shared.transition(TaskState::Running, TaskState::Returned);
            return Ok(value);
        }

        let executor = self.executor()?;
        self.shared.begin()?;
        let handle = self.dispatch(executor, None, recovery, self.timer());

        match handle.await_result() {
            Ok(value) => Ok(value),
            Err(TaskFailure::Cancelled) => Err(ForesightError::Cancelled),
            Err(failure) => Err(failure.into()),
        }
    }

    fn executor(&self) -> ForesightResult<Executor> {
        match &self.executor {
            Some(executor) => Ok(executor.clone()),
            None => Executor::current(),
        }
    }

    fn timer(&self) -> Timer {
        Timer {
            id: self.id,
            sink: self.options.timed.then(|| self.sink.clone()),
            watch: Stopwatch::start(),
        }
    }

    /// Run on the calling thread and apply the blocking failure policy.
    ///
    /// `on_success` is only given by the callback-style compute.
    fn run_blocking(
        &self,
        timer: &Timer,
        recovery: &Recovery<T>,
        on_success: Option<&SuccessHandler<T>>,
    ) -> Option<T> {
        let failure = match run_guarded(&self.computation) {
            Ok(value) => {
                timer.finish();
                if let Some(on_success) = on_success {
                    deliver(self.id, on_success, value.clone());
                }
                return Some(value);
            }
            Err(failure) => failure,
        };

        match self.options.blocking_failure {
            BlockingFailurePolicy::Contain => {
                // compute_result discards the failure; compute only notifies
                if on_success.is_none() {
                    debug!("Foresight {} blocking run failed: {}", self.id, failure);
                } else if recovery.has_handler() {
                    recovery.notify(&failure);
                } else {
                    warn!("Foresight {} failed without a failure handler: {}", self.id, failure);
                }
                None
            }
            BlockingFailurePolicy::Recover => {
                let value = recovery.recover(&failure);
                if let (Some(on_success), Some(value)) = (on_success, value.clone()) {
                    deliver(self.id, on_success, value);
                }
                value
            }
        }
    }

    /// Submit the computation and attach the completion chain
    fn dispatch(
        &self,
        executor: Executor,
        on_success: Option<SuccessHandler<T>>,
        recovery: Recovery<T>,
        timer: Timer,
    ) -> Arc<TaskHandle<Option<T>>> {
        let computation = self.computation.clone();
        let shared = self.shared.clone();
        let id = self.id;

        let handle = executor
            .submit(move || run_guarded(&computation))
            .then(move |outcome| {
                let resolved = match outcome {
                    Ok(value) => Some(value),
                    Err(failure) if failure.is_cancelled() => return Err(failure),
                    Err(failure) => {
                        debug!(
                            "Foresight {} failed: {} (fallback: {})",
                            id,
                            failure,
                            recovery.has_fallback()
                        );
                        recovery.recover(&failure)
                    }
                };

                if !shared.fulfil(resolved.clone()) {
                    debug!("Foresight {} was cancelled, discarding its value", id);
                    return Err(TaskFailure::Cancelled);
                }

                timer.finish();
                if let (Some(on_success), Some(value)) = (on_success, resolved.clone()) {
                    deliver(id, &on_success, value);
                }
                Ok(resolved)
            });

        let handle = Arc::new(handle);
        *self.shared.handle.lock() = Some(handle.clone());

        // A cancel that landed before the handle was stored could not reach it
        if self.shared.state() == TaskState::Cancelled {
            handle.request_cancel(self.shared.interrupt.load(Ordering::Acquire));
        }

        debug!("Submitted Foresight {} to the executor", self.id);
        handle
    }
}

impl<T> std::fmt::Debug for Foresight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Foresight")
            .field("id", &self.id)
            .field("state", &self.shared.state())
            .field("options", &self.options)
            .finish()
    }
}
