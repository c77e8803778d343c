use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::UrlCache;
use crate::config::SessionConfiguration;
use crate::delegate::{SessionDelegate, SessionId};
use crate::errors::{SessionError, SessionResult};
use crate::request::Request;
use crate::response::Response;
use crate::synca::DelegateQueue;
use crate::task::{CompletionHandler, SessionTask, TaskKind, TaskState};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Invalidation {
    Active,
    Finishing,
    Invalidated,
}

struct SessionState {
    tasks: HashMap<u64, SessionTask>,
    invalidation: Invalidation,
}

pub(crate) struct SessionInner {
    id: SessionId,
    config: SessionConfiguration,
    delegate: Arc<dyn SessionDelegate>,
    queue: DelegateQueue,
    cache: UrlCache,
    state: Mutex<SessionState>,
    next_task: AtomicU64,
}

/// Reusable context creating tasks under one configuration.
///
/// All delegate callbacks of a session run on its own serial delivery thread.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("tasks", &self.inner.outstanding())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

impl Session {
    pub fn new(
        config: SessionConfiguration,
        delegate: Arc<dyn SessionDelegate>,
    ) -> SessionResult<Self> {
        let id = SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst));
        let queue = DelegateQueue::spawn(format!("urlsession-delegate-{}", id.0))?;

        tracing::info!("Created {}", id);
        Ok(Self {
            inner: Arc::new(SessionInner {
                id,
                config,
                delegate,
                queue,
                cache: UrlCache::new(),
                state: Mutex::new(SessionState {
                    tasks: HashMap::new(),
                    invalidation: Invalidation::Active,
                }),
                next_task: AtomicU64::new(1),
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    #[must_use]
    pub fn configuration(&self) -> &SessionConfiguration {
        &self.inner.config
    }

    #[must_use]
    pub fn url_cache(&self) -> &UrlCache {
        &self.inner.cache
    }

    /// Creates a suspended data task reporting to the session delegate.
    pub fn data_task(&self, request: Request) -> SessionResult<SessionTask> {
        self.create_task(request, None)
    }

    pub fn data_task_with_url(&self, url: &str) -> SessionResult<SessionTask> {
        self.data_task(Request::parse(url)?)
    }

    /// Creates a suspended data task whose body, response and error go to
    /// `handler` instead of the delegate's data and completion callbacks.
    pub fn data_task_with_completion<F>(&self, request: Request, handler: F) -> SessionResult<SessionTask>
    where
        F: FnOnce(Option<Vec<u8>>, Option<Response>, Option<SessionError>) + Send + 'static,
    {
        self.create_task(request, Some(Box::new(handler)))
    }

    fn create_task(
        &self,
        request: Request,
        handler: Option<CompletionHandler>,
    ) -> SessionResult<SessionTask> {
        let mut state = self.inner.lock_state();
        if state.invalidation != Invalidation::Active {
            return Err(SessionError::SessionInvalidated);
        }

        let identifier = self.inner.next_task.fetch_add(1, Ordering::SeqCst);
        let task = SessionTask::new(
            identifier,
            TaskKind::Data,
            Arc::downgrade(&self.inner),
            request,
            handler,
        );
        state.tasks.insert(identifier, task.clone());

        tracing::debug!("{} created task {}", self.inner.id, identifier);
        Ok(task)
    }

    /// Tasks that have not completed yet.
    #[must_use]
    pub fn all_tasks(&self) -> Vec<SessionTask> {
        self.inner.lock_state().tasks.values().cloned().collect()
    }

    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.inner.lock_state().invalidation != Invalidation::Active
    }

    /// Stops accepting tasks; `session_did_become_invalid` follows the last
    /// outstanding task's completion.
    pub fn finish_tasks_and_invalidate(&self) {
        tracing::info!("{} finishing tasks and invalidating", self.inner.id);
        self.inner.begin_invalidation();
    }

    /// Cancels outstanding tasks, then invalidates like `finish_tasks_and_invalidate`.
    pub fn invalidate_and_cancel(&self) {
        tracing::info!("{} invalidating and cancelling", self.inner.id);
        let tasks = self.all_tasks();
        self.inner.begin_invalidation();
        for task in tasks {
            task.cancel();
        }
    }
}

impl SessionInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outstanding(&self) -> usize {
        self.lock_state().tasks.len()
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn config(&self) -> &SessionConfiguration {
        &self.config
    }

    pub(crate) fn delegate(&self) -> Arc<dyn SessionDelegate> {
        self.delegate.clone()
    }

    pub(crate) fn cache(&self) -> &UrlCache {
        &self.cache
    }

    /// Queues `job` on the delivery thread.
    pub(crate) fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.queue.dispatch(job)
    }

    /// Swaps a data task for the download or stream task it became.
    pub(crate) fn convert_task(&self, task: &SessionTask, kind: TaskKind) -> SessionTask {
        let identifier = self.next_task.fetch_add(1, Ordering::SeqCst);
        let converted = task.converted(identifier, kind);

        let mut state = self.lock_state();
        state.tasks.remove(&task.task_identifier());
        state.tasks.insert(identifier, converted.clone());
        drop(state);

        task.set_state(TaskState::Completed);
        converted
    }

    /// Delivers the terminal callback for `task` exactly once.
    ///
    /// `data` is only used for tasks created with a completion handler.
    pub(crate) fn complete_task(
        &self,
        task: &SessionTask,
        error: Option<SessionError>,
        data: Option<Vec<u8>>,
    ) {
        let mut state = self.lock_state();
        if state.tasks.remove(&task.task_identifier()).is_none() {
            tracing::warn!("Task {} completed twice", task.task_identifier());
            return;
        }
        task.set_state(TaskState::Completed);

        match &error {
            Some(err) => tracing::info!("Task {} failed: {}", task.task_identifier(), err),
            None => tracing::info!("Task {} completed", task.task_identifier()),
        }

        if let Some(handler) = task.take_completion_handler() {
            let response = task.response();
            let data = if error.is_none() {
                Some(data.unwrap_or_default())
            } else {
                None
            };
            self.dispatch(move || handler(data, response, error));
        } else {
            let delegate = self.delegate.clone();
            let completed = task.clone();
            self.dispatch(move || delegate.task_did_complete(&completed, error));
        }

        let finished = state.invalidation == Invalidation::Finishing && state.tasks.is_empty();
        if finished {
            state.invalidation = Invalidation::Invalidated;
        }
        drop(state);

        if finished {
            self.deliver_invalidation();
        }
    }

    fn begin_invalidation(&self) {
        let mut state = self.lock_state();
        if state.invalidation != Invalidation::Active {
            return;
        }

        let finished = state.tasks.is_empty();
        state.invalidation = if finished {
            Invalidation::Invalidated
        } else {
            Invalidation::Finishing
        };
        drop(state);

        if finished {
            self.deliver_invalidation();
        }
    }

    fn deliver_invalidation(&self) {
        let delegate = self.delegate.clone();
        let id = self.id;
        self.dispatch(move || delegate.session_did_become_invalid(id, None));
        self.queue.close();
        tracing::info!("{} invalidated", id);
    }
}
