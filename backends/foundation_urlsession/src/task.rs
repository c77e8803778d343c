use std::fmt;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::errors::SessionError;
use crate::request::Request;
use crate::response::Response;
use crate::session::SessionInner;
use crate::transport;

/// Callback receiving the outcome of a task created with a completion handler.
pub type CompletionHandler =
    Box<dyn FnOnce(Option<Vec<u8>>, Option<Response>, Option<SessionError>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Data,
    Download,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Suspended,
    Running,
    Canceling,
    Completed,
}

pub(crate) struct TaskShared {
    identifier: u64,
    origin: u64,
    kind: TaskKind,
    session: Weak<SessionInner>,
    original_request: Request,
    current_request: Mutex<Request>,
    response: Mutex<Option<Response>>,
    state: Mutex<TaskState>,
    started: AtomicBool,
    cancelled: AtomicBool,
    connection: Mutex<Option<TcpStream>>,
    completion_handler: Mutex<Option<CompletionHandler>>,
}

/// Handle to one in-flight request/response exchange.
///
/// Cheap to clone; every clone refers to the same task.
#[derive(Clone)]
pub struct SessionTask {
    shared: Arc<TaskShared>,
}

impl fmt::Debug for SessionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTask")
            .field("identifier", &self.shared.identifier)
            .field("kind", &self.shared.kind)
            .field("state", &self.state())
            .field("url", &self.current_request().url.as_str())
            .finish()
    }
}

impl PartialEq for SessionTask {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for SessionTask {}

impl SessionTask {
    pub(crate) fn new(
        identifier: u64,
        kind: TaskKind,
        session: Weak<SessionInner>,
        request: Request,
        completion_handler: Option<CompletionHandler>,
    ) -> Self {
        Self::with_origin(identifier, identifier, kind, session, request, completion_handler)
    }

    fn with_origin(
        identifier: u64,
        origin: u64,
        kind: TaskKind,
        session: Weak<SessionInner>,
        request: Request,
        completion_handler: Option<CompletionHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(TaskShared {
                identifier,
                origin,
                kind,
                session,
                current_request: Mutex::new(request.clone()),
                original_request: request,
                response: Mutex::new(None),
                state: Mutex::new(TaskState::Suspended),
                started: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                connection: Mutex::new(None),
                completion_handler: Mutex::new(completion_handler),
            }),
        }
    }

    /// Creates the task a data task turns into after a `BecomeDownload` or
    /// `BecomeStream` disposition. The new task is already running.
    pub(crate) fn converted(&self, identifier: u64, kind: TaskKind) -> Self {
        let converted = Self::with_origin(
            identifier,
            self.shared.origin,
            kind,
            self.shared.session.clone(),
            self.original_request().clone(),
            None,
        );
        converted.set_current_request(self.current_request());
        if let Some(response) = self.response() {
            converted.set_response(response);
        }
        converted.shared.started.store(true, Ordering::SeqCst);
        converted.set_state(TaskState::Running);
        converted
    }

    #[must_use]
    pub fn task_identifier(&self) -> u64 {
        self.shared.identifier
    }

    /// Identifier of the data task this one was converted from, or its own.
    #[must_use]
    pub fn origin_identifier(&self) -> u64 {
        self.shared.origin
    }

    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.shared.kind
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        *self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        *self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    #[must_use]
    pub fn original_request(&self) -> &Request {
        &self.shared.original_request
    }

    #[must_use]
    pub fn current_request(&self) -> Request {
        self.shared
            .current_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_current_request(&self, request: Request) {
        *self
            .shared
            .current_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = request;
    }

    #[must_use]
    pub fn response(&self) -> Option<Response> {
        self.shared
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_response(&self, response: Response) {
        *self
            .shared
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(response);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn session(&self) -> Option<Arc<SessionInner>> {
        self.shared.session.upgrade()
    }

    pub(crate) fn has_completion_handler(&self) -> bool {
        self.shared
            .completion_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn take_completion_handler(&self) -> Option<CompletionHandler> {
        self.shared
            .completion_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Remembers the live connection so `cancel` can unblock pending I/O.
    pub(crate) fn attach_connection(&self, stream: Option<TcpStream>) {
        *self
            .shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = stream;
        if self.is_cancelled() {
            self.shutdown_connection();
        }
    }

    fn shutdown_connection(&self) {
        if let Some(stream) = self
            .shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            // already closed connections report an error we have no use for
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Starts the task on its own worker thread. Calling it again is a no-op.
    pub fn resume(&self) {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Task {} already started", self.shared.identifier);
            return;
        }

        let Some(session) = self.session() else {
            tracing::warn!(
                "Task {} resumed after its session was dropped",
                self.shared.identifier
            );
            return;
        };

        if !self.is_cancelled() {
            self.set_state(TaskState::Running);
        }

        let task = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("urlsession-task-{}", self.shared.identifier))
            .spawn(move || transport::drive(&session, &task));

        if let Err(err) = spawned {
            tracing::error!("Failed to spawn task worker: {}", err);
            if let Some(session) = self.session() {
                session.complete_task(self, Some(SessionError::from(err)), None);
            }
        }
    }

    /// Requests cancellation; the task completes with `SessionError::Cancelled`.
    pub fn cancel(&self) {
        if self.state() == TaskState::Completed {
            return;
        }

        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Cancelling task {}", self.shared.identifier);
        self.set_state(TaskState::Canceling);
        self.shutdown_connection();

        // a task that never ran still reports its cancellation
        if !self.shared.started.load(Ordering::SeqCst) {
            self.resume();
        }
    }
}
