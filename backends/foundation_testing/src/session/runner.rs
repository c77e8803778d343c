//! Synchronous driving of one task at a time.
//!
//! The runner blocks the calling thread on a [`CompletionLatch`] released by
//! the terminal callback of the task it started. The wait is bounded by the
//! effective timeout plus the observer's grace margin; a task still running
//! after that is reported as stalled and cancelled.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use foundation_urlsession::{CompletionLatch, Request, SessionError, SessionTask};

use super::hooks::CompleteHook;
use super::observer::SessionObserver;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RunError {
    #[error("task failed: {0}")]
    Transport(#[from] SessionError),

    #[error("task did not settle within {waited:?}")]
    Stalled { waited: Duration },
}

impl RunError {
    /// The transport error, if the task settled with one.
    #[must_use]
    pub fn transport(&self) -> Option<&SessionError> {
        match self {
            Self::Transport(err) => Some(err),
            Self::Stalled { .. } => None,
        }
    }

    #[must_use]
    pub fn is_stalled(&self) -> bool {
        matches!(self, Self::Stalled { .. })
    }
}

pub type RunResult = Result<(), RunError>;

/// Terminal outcome of the task a run started.
struct Settlement {
    latch: CompletionLatch,
    error: Mutex<Option<SessionError>>,
}

impl Settlement {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            latch: CompletionLatch::new(),
            error: Mutex::new(None),
        })
    }

    fn finish(&self, error: Option<SessionError>) {
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = error;
        self.latch.signal();
    }

    fn result(&self) -> RunResult {
        match self.error.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some(err) => Err(RunError::Transport(err)),
            None => Ok(()),
        }
    }
}

impl SessionObserver {
    /// How long the runner waits for `request` to settle.
    ///
    /// Only an explicitly set request timeout takes part; an unset one does
    /// not stand in with its 60 second default.
    #[must_use]
    pub fn wait_deadline(&self, request: &Request) -> Duration {
        let session_timeout = self.configuration().timeout_interval_for_request;
        request
            .timeout
            .map_or(session_timeout, |timeout| timeout.max(session_timeout))
            + self.grace_margin
    }

    /// Runs `request` through the delegate callbacks and blocks until it settles.
    pub fn run_data_task(&self, request: Request) -> RunResult {
        self.run_data_task_with_timeout(request, None)
    }

    /// Like [`Self::run_data_task`], explicitly setting the request timeout when given.
    pub fn run_data_task_with_timeout(
        &self,
        mut request: Request,
        timeout: Option<Duration>,
    ) -> RunResult {
        if let Some(timeout) = timeout {
            request.set_timeout_interval(timeout);
        }
        let deadline = self.wait_deadline(&request);

        // Suspended until `await_task` resumes it, so no completion can be missed.
        let task = self.session.data_task(request)?;
        let settlement = Settlement::new();
        let previous = self.core.hook(|hooks| hooks.did_complete.clone());
        self.install_completion_signal(&task, previous.clone(), Arc::clone(&settlement));

        let settled = self.await_task(&task, &settlement.latch, deadline);
        self.update_hooks(|hooks| hooks.did_complete = previous);
        settled?;

        settlement.result()
    }

    /// Runs a GET for `url`.
    ///
    /// # Panics
    ///
    /// When `url` does not parse; that is a mistake in the scenario itself.
    pub fn run_url(&self, url: &str) -> RunResult {
        let request = match Request::parse(url) {
            Ok(request) => request,
            Err(err) => panic!("scenario passed an invalid url {url:?}: {err}"),
        };
        self.run_data_task(request)
    }

    /// Runs `request` as a completion-handler task.
    ///
    /// Body, response and error arrive through the handler; the delegate's
    /// data and completion callbacks do not fire, so they are not logged.
    pub fn run_data_task_with_completion_handler(&self, request: Request) -> RunResult {
        let deadline = self.wait_deadline(&request);
        let settlement = Settlement::new();

        let core = Arc::clone(&self.core);
        let handler_settlement = Arc::clone(&settlement);
        let task = self
            .session
            .data_task_with_completion(request, move |data, response, error| {
                core.record_completion(data, response, error.clone());
                handler_settlement.finish(error);
            })?;

        self.await_task(&task, &settlement.latch, deadline)?;
        settlement.result()
    }

    /// Chains `previous` and releases `settlement` once `started`, or the task
    /// it was converted into, completes.
    fn install_completion_signal(
        &self,
        started: &SessionTask,
        previous: Option<CompleteHook>,
        settlement: Arc<Settlement>,
    ) {
        let origin = started.origin_identifier();
        self.on_complete(move |task: &SessionTask, error: Option<&SessionError>| {
            if let Some(hook) = &previous {
                hook(task, error);
            }
            if task.origin_identifier() == origin {
                settlement.finish(error.cloned());
            } else {
                tracing::debug!(
                    "Ignoring completion of task {} while waiting on {}",
                    task.task_identifier(),
                    origin
                );
            }
        });
    }

    fn await_task(
        &self,
        task: &SessionTask,
        latch: &CompletionLatch,
        deadline: Duration,
    ) -> Result<(), RunError> {
        tracing::debug!(
            "Running task {} on {} (deadline {:?})",
            task.task_identifier(),
            self.session.id(),
            deadline
        );
        task.resume();

        if latch.wait_timeout(deadline) {
            return Ok(());
        }

        tracing::warn!(
            "Task {} stalled after {:?}, cancelling",
            task.task_identifier(),
            deadline
        );
        task.cancel();
        if !latch.wait_timeout(self.grace_margin) {
            tracing::warn!(
                "Cancelled task {} did not complete within {:?}",
                task.task_identifier(),
                self.grace_margin
            );
        }
        Err(RunError::Stalled { waited: deadline })
    }
}
