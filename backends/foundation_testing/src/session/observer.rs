//! The recording session delegate.
//!
//! WHY: Scenarios need to see every lifecycle callback of a task in order and
//! to steer any decision point without writing a delegate of their own.
//!
//! WHAT: `SessionObserver` owns a `Session` whose delegate logs each callback
//! into an `EventLog`, keeps the latest response, accumulated body bytes and
//! terminal error, then hands decisions to the matching hook in `Hooks`.
//!
//! HOW: The delegate half (`ObserverCore`) lives behind an `Arc` shared with
//! the session; its state sits behind mutexes since callbacks arrive on the
//! session's delivery thread while the scenario reads from its own thread.

use std::ffi::OsString;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use foundation_urlsession::{
    AuthChallenge, BodyStream, CachedResponse, ChallengeResolution, Completion, ConfigResult,
    Request, Response, ResponseDisposition, Session, SessionConfiguration, SessionDelegate,
    SessionError, SessionId, SessionResult, SessionTask, TaskStreams,
};
use serde_json::Value;

use super::events::{Event, EventLog, EventParameter};
use super::hooks::Hooks;
use super::json_path::{lookup_bytes, JsonKey};

/// Extra time the runner waits beyond the effective timeout.
pub const DEFAULT_GRACE_MARGIN: Duration = Duration::from_secs(4);

/// Names a TOML file holding the session configuration scenarios run with.
pub const SESSION_CONFIG_ENV: &str = "SESSION_CONFIG";

/// Session configuration for scenario runs.
///
/// Loaded from the file named by [`SESSION_CONFIG_ENV`]; defaults when unset.
pub fn scenario_configuration() -> ConfigResult<SessionConfiguration> {
    configuration_from(std::env::var_os(SESSION_CONFIG_ENV))
}

fn configuration_from(path: Option<OsString>) -> ConfigResult<SessionConfiguration> {
    match path.filter(|path| !path.is_empty()) {
        Some(path) => {
            tracing::info!("Loading session configuration from {:?}", path);
            SessionConfiguration::from_path(path)
        }
        None => Ok(SessionConfiguration::default()),
    }
}

#[derive(Default)]
struct ObservedState {
    error: Option<SessionError>,
    received_data: Option<Vec<u8>>,
    response: Option<Response>,
    downloaded_data: Option<Vec<u8>>,
    streams: Option<TaskStreams>,
}

pub(super) struct ObserverCore {
    log: Mutex<EventLog>,
    state: Mutex<ObservedState>,
    hooks: RwLock<Hooks>,
}

fn stall<T>(completion: Completion<T>, slot: &str) {
    tracing::warn!("No {} hook installed, task stalls", slot);
    drop(completion);
}

impl ObserverCore {
    fn new() -> Self {
        Self {
            log: Mutex::new(EventLog::new()),
            state: Mutex::new(ObservedState::default()),
            hooks: RwLock::new(Hooks::default()),
        }
    }

    fn record(&self, name: &str, parameters: Vec<EventParameter>) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .log(name, parameters);
    }

    fn state(&self) -> MutexGuard<'_, ObservedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self) -> MutexGuard<'_, EventLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clones one hook slot so the lock is not held while the hook runs.
    pub(super) fn hook<T>(&self, slot: impl FnOnce(&Hooks) -> Option<T>) -> Option<T> {
        slot(&self.hooks.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(super) fn update_hooks(&self, update: impl FnOnce(&mut Hooks)) {
        update(&mut self.hooks.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// Stores what a completion handler received; nothing is logged.
    pub(super) fn record_completion(
        &self,
        data: Option<Vec<u8>>,
        response: Option<Response>,
        error: Option<SessionError>,
    ) {
        let mut state = self.state();
        state.received_data = data;
        if response.is_some() {
            state.response = response;
        }
        state.error = error;
    }
}

impl SessionDelegate for ObserverCore {
    fn session_did_become_invalid(&self, session: SessionId, error: Option<SessionError>) {
        self.record(
            "didBecomeInvalid",
            vec![
                EventParameter::Session(session),
                EventParameter::Error(error.clone()),
            ],
        );
        if let Some(hook) = self.hook(|hooks| hooks.did_become_invalid.clone()) {
            hook(session, error.as_ref());
        }
    }

    fn session_did_receive_challenge(
        &self,
        session: SessionId,
        challenge: AuthChallenge,
        completion: Completion<ChallengeResolution>,
    ) {
        self.record(
            "didReceiveChallenge",
            vec![
                EventParameter::Session(session),
                EventParameter::Challenge(challenge.clone()),
            ],
        );
        match self.hook(|hooks| hooks.session_challenge.clone()) {
            Some(hook) => hook(session, &challenge, completion),
            None => stall(completion, "session challenge"),
        }
    }

    fn task_will_perform_redirection(
        &self,
        task: &SessionTask,
        response: &Response,
        proposed: Request,
        completion: Completion<Option<Request>>,
    ) {
        self.record(
            "taskWillPerformHTTPRedirection",
            vec![
                EventParameter::Task(task.clone()),
                EventParameter::Response(response.clone()),
                EventParameter::Request(proposed.clone()),
            ],
        );
        match self.hook(|hooks| hooks.redirect.clone()) {
            Some(hook) => hook(task, response, proposed, completion),
            None => stall(completion, "redirect"),
        }
    }

    fn task_did_receive_challenge(
        &self,
        task: &SessionTask,
        challenge: AuthChallenge,
        completion: Completion<ChallengeResolution>,
    ) {
        self.record(
            "taskDidReceiveChallenge",
            vec![
                EventParameter::Task(task.clone()),
                EventParameter::Challenge(challenge.clone()),
            ],
        );
        match self.hook(|hooks| hooks.task_challenge.clone()) {
            Some(hook) => hook(task, &challenge, completion),
            None => stall(completion, "task challenge"),
        }
    }

    fn task_need_new_body_stream(
        &self,
        task: &SessionTask,
        completion: Completion<Option<BodyStream>>,
    ) {
        self.record(
            "taskNeedNewBodyStream",
            vec![EventParameter::Task(task.clone())],
        );
        match self.hook(|hooks| hooks.need_new_body_stream.clone()) {
            Some(hook) => hook(task, completion),
            None => stall(completion, "body stream"),
        }
    }

    fn task_did_send_body_data(
        &self,
        task: &SessionTask,
        bytes_sent: u64,
        total_bytes_sent: u64,
        total_bytes_expected: Option<u64>,
    ) {
        self.record(
            "taskDidSendBodyData",
            vec![
                EventParameter::Task(task.clone()),
                EventParameter::Count(bytes_sent),
                EventParameter::Count(total_bytes_sent),
                EventParameter::ExpectedCount(total_bytes_expected),
            ],
        );
        if let Some(hook) = self.hook(|hooks| hooks.did_send_body_data.clone()) {
            hook(task, bytes_sent, total_bytes_sent, total_bytes_expected);
        }
    }

    fn task_did_complete(&self, task: &SessionTask, error: Option<SessionError>) {
        self.record(
            "taskDidComplete",
            vec![
                EventParameter::Task(task.clone()),
                EventParameter::Error(error.clone()),
            ],
        );
        self.state().error.clone_from(&error);
        if let Some(hook) = self.hook(|hooks| hooks.did_complete.clone()) {
            hook(task, error.as_ref());
        }
    }

    fn data_task_did_receive_response(
        &self,
        task: &SessionTask,
        response: &Response,
        completion: Completion<ResponseDisposition>,
    ) {
        self.record(
            "dataTaskDidReceiveResponse",
            vec![
                EventParameter::Task(task.clone()),
                EventParameter::Response(response.clone()),
            ],
        );
        self.state().response = Some(response.clone());
        match self.hook(|hooks| hooks.response.clone()) {
            Some(hook) => hook(task, response, completion),
            None => stall(completion, "response"),
        }
    }

    fn data_task_did_become_download_task(&self, task: &SessionTask, download: &SessionTask) {
        self.record(
            "dataTaskDidBecomeDownloadTask",
            vec![
                EventParameter::Task(task.clone()),
                EventParameter::Task(download.clone()),
            ],
        );
        if let Some(hook) = self.hook(|hooks| hooks.did_become_download_task.clone()) {
            hook(task, download);
        }
    }

    fn data_task_did_become_stream_task(&self, task: &SessionTask, stream: &SessionTask) {
        self.record(
            "dataTaskDidBecomeStreamTask",
            vec![
                EventParameter::Task(task.clone()),
                EventParameter::Task(stream.clone()),
            ],
        );
        if let Some(hook) = self.hook(|hooks| hooks.did_become_stream_task.clone()) {
            hook(task, stream);
        }
    }

    fn data_task_did_receive_data(&self, task: &SessionTask, data: &[u8]) {
        self.record(
            "dataTaskDidReceiveData",
            vec![
                EventParameter::Task(task.clone()),
                EventParameter::Data(data.to_vec()),
            ],
        );
        self.state()
            .received_data
            .get_or_insert_with(Vec::new)
            .extend_from_slice(data);
        if let Some(hook) = self.hook(|hooks| hooks.did_receive_data.clone()) {
            hook(task, data);
        }
    }

    fn data_task_will_cache_response(
        &self,
        task: &SessionTask,
        proposed: CachedResponse,
        completion: Completion<Option<CachedResponse>>,
    ) {
        self.record(
            "dataTaskWillCacheResponse",
            vec![
                EventParameter::Task(task.clone()),
                EventParameter::CachedResponse(proposed.clone()),
            ],
        );
        match self.hook(|hooks| hooks.will_cache_response.clone()) {
            Some(hook) => hook(task, proposed, completion),
            None => stall(completion, "cache"),
        }
    }

    fn download_task_did_finish_downloading(&self, task: &SessionTask, location: &Path) {
        self.record(
            "downloadTaskDidFinishDownloading",
            vec![
                EventParameter::Task(task.clone()),
                EventParameter::Location(location.to_path_buf()),
            ],
        );
        match std::fs::read(location) {
            Ok(contents) => self.state().downloaded_data = Some(contents),
            Err(err) => tracing::warn!("Could not read download {}: {}", location.display(), err),
        }
        if let Some(hook) = self.hook(|hooks| hooks.did_finish_downloading.clone()) {
            hook(task, location);
        }
    }

    fn download_task_did_write_data(
        &self,
        task: &SessionTask,
        bytes_written: u64,
        total_bytes_written: u64,
        total_bytes_expected: Option<u64>,
    ) {
        self.record(
            "downloadTaskDidWriteData",
            vec![
                EventParameter::Task(task.clone()),
                EventParameter::Count(bytes_written),
                EventParameter::Count(total_bytes_written),
                EventParameter::ExpectedCount(total_bytes_expected),
            ],
        );
        if let Some(hook) = self.hook(|hooks| hooks.did_write_data.clone()) {
            hook(task, bytes_written, total_bytes_written, total_bytes_expected);
        }
    }

    fn download_task_did_resume(
        &self,
        task: &SessionTask,
        file_offset: u64,
        expected_total_bytes: Option<u64>,
    ) {
        self.record(
            "downloadTaskDidResume",
            vec![
                EventParameter::Task(task.clone()),
                EventParameter::Count(file_offset),
                EventParameter::ExpectedCount(expected_total_bytes),
            ],
        );
        if let Some(hook) = self.hook(|hooks| hooks.did_resume.clone()) {
            hook(task, file_offset, expected_total_bytes);
        }
    }

    fn stream_task_write_closed(&self, task: &SessionTask) {
        self.record(
            "streamTaskWriteClosed",
            vec![EventParameter::Task(task.clone())],
        );
        if let Some(hook) = self.hook(|hooks| hooks.write_closed.clone()) {
            hook(task);
        }
    }

    fn stream_task_better_route_discovered(&self, task: &SessionTask) {
        self.record(
            "streamTaskBetterRouteDiscovered",
            vec![EventParameter::Task(task.clone())],
        );
        if let Some(hook) = self.hook(|hooks| hooks.better_route_discovered.clone()) {
            hook(task);
        }
    }

    fn stream_task_did_become_streams(&self, task: &SessionTask, streams: TaskStreams) {
        self.record(
            "streamTaskDidBecomeStreams",
            vec![EventParameter::Task(task.clone()), EventParameter::Streams],
        );
        match self.hook(|hooks| hooks.did_become_streams.clone()) {
            Some(hook) => hook(task, streams),
            None => self.state().streams = Some(streams),
        }
    }
}

/// Weak handle to an observer's recorded state, safe to capture in hooks.
#[derive(Clone)]
pub struct ObserverRecorder {
    core: Weak<ObserverCore>,
}

impl core::fmt::Debug for ObserverRecorder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObserverRecorder")
            .field("alive", &(self.core.strong_count() > 0))
            .finish()
    }
}

impl ObserverRecorder {
    /// Drops bytes accumulated so far, e.g. the body of a response about to be retried.
    pub fn reset_received_data(&self) {
        if let Some(core) = self.core.upgrade() {
            core.state().received_data = None;
        }
    }

    /// `None` once the observer is gone.
    #[must_use]
    pub fn event_sequence(&self) -> Option<String> {
        self.core.upgrade().map(|core| core.log().event_sequence())
    }
}

/// Event-recording observer owning one session.
///
/// One observer per scenario; it is never reused across scenarios.
pub struct SessionObserver {
    pub(super) core: Arc<ObserverCore>,
    pub(super) session: Session,
    pub(super) grace_margin: Duration,
}

impl core::fmt::Debug for SessionObserver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionObserver")
            .field("session", &self.session)
            .field("events", &self.core.log().len())
            .field("grace_margin", &self.grace_margin)
            .finish()
    }
}

impl SessionObserver {
    /// Creates the observer and the session it observes.
    pub fn new(config: SessionConfiguration) -> SessionResult<Self> {
        let core = Arc::new(ObserverCore::new());
        let delegate: Arc<dyn SessionDelegate> = core.clone();
        let session = Session::new(config, delegate)?;

        Ok(Self {
            core,
            session,
            grace_margin: DEFAULT_GRACE_MARGIN,
        })
    }

    pub fn with_default_configuration() -> SessionResult<Self> {
        Self::new(SessionConfiguration::default())
    }

    #[must_use]
    pub fn with_grace_margin(mut self, grace_margin: Duration) -> Self {
        self.grace_margin = grace_margin;
        self
    }

    #[must_use]
    pub fn grace_margin(&self) -> Duration {
        self.grace_margin
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn configuration(&self) -> &SessionConfiguration {
        self.session.configuration()
    }

    /// The delegate registered with the session.
    #[must_use]
    pub fn delegate(&self) -> Arc<dyn SessionDelegate> {
        self.core.clone()
    }

    #[must_use]
    pub fn recorder(&self) -> ObserverRecorder {
        ObserverRecorder {
            core: Arc::downgrade(&self.core),
        }
    }

    // -- recorded state

    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.core.log().events().to_vec()
    }

    #[must_use]
    pub fn event_log(&self) -> EventLog {
        self.core.log().clone()
    }

    /// Comma-joined callback names, consecutive duplicates included.
    #[must_use]
    pub fn event_sequence(&self) -> String {
        self.core.log().event_sequence()
    }

    #[must_use]
    pub fn collapsed_event_sequence(&self) -> String {
        self.core.log().collapsed_event_sequence()
    }

    #[must_use]
    pub fn error(&self) -> Option<SessionError> {
        self.core.state().error.clone()
    }

    #[must_use]
    pub fn response(&self) -> Option<Response> {
        self.core.state().response.clone()
    }

    #[must_use]
    pub fn received_data(&self) -> Option<Vec<u8>> {
        self.core.state().received_data.clone()
    }

    /// Body bytes as UTF-8; `None` when absent or not valid UTF-8.
    #[must_use]
    pub fn received_string(&self) -> Option<String> {
        self.received_data()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }

    /// The whole body decoded as JSON.
    #[must_use]
    pub fn received_json(&self) -> Option<Value> {
        self.json_value(&[])
    }

    #[must_use]
    pub fn json_value(&self, path: &[JsonKey]) -> Option<Value> {
        let state = self.core.state();
        let bytes = state.received_data.as_deref()?;
        lookup_bytes(bytes, path)
    }

    #[must_use]
    pub fn json_string(&self, path: &[JsonKey]) -> Option<String> {
        match self.json_value(path)? {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn json_bool(&self, path: &[JsonKey]) -> Option<bool> {
        self.json_value(path)?.as_bool()
    }

    #[must_use]
    pub fn json_i64(&self, path: &[JsonKey]) -> Option<i64> {
        self.json_value(path)?.as_i64()
    }

    /// Contents of the file reported by `downloadTaskDidFinishDownloading`.
    #[must_use]
    pub fn downloaded_data(&self) -> Option<Vec<u8>> {
        self.core.state().downloaded_data.clone()
    }

    /// Stream halves kept when no streams hook was installed.
    pub fn take_streams(&self) -> Option<TaskStreams> {
        self.core.state().streams.take()
    }

    // -- hooks

    /// Edits the hook slots in place; set a slot to `None` to clear it.
    pub fn update_hooks(&self, update: impl FnOnce(&mut Hooks)) {
        self.core.update_hooks(update);
    }

    pub fn on_session_challenge<F>(&self, hook: F)
    where
        F: Fn(SessionId, &AuthChallenge, Completion<ChallengeResolution>) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.session_challenge = Some(Arc::new(hook)));
    }

    pub fn on_task_challenge<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, &AuthChallenge, Completion<ChallengeResolution>)
            + Send
            + Sync
            + 'static,
    {
        self.update_hooks(|hooks| hooks.task_challenge = Some(Arc::new(hook)));
    }

    pub fn on_redirect<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, &Response, Request, Completion<Option<Request>>)
            + Send
            + Sync
            + 'static,
    {
        self.update_hooks(|hooks| hooks.redirect = Some(Arc::new(hook)));
    }

    pub fn on_need_new_body_stream<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, Completion<Option<BodyStream>>) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.need_new_body_stream = Some(Arc::new(hook)));
    }

    pub fn on_response<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, &Response, Completion<ResponseDisposition>) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.response = Some(Arc::new(hook)));
    }

    pub fn on_will_cache_response<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, CachedResponse, Completion<Option<CachedResponse>>)
            + Send
            + Sync
            + 'static,
    {
        self.update_hooks(|hooks| hooks.will_cache_response = Some(Arc::new(hook)));
    }

    pub fn on_complete<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, Option<&SessionError>) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.did_complete = Some(Arc::new(hook)));
    }

    pub fn on_become_invalid<F>(&self, hook: F)
    where
        F: Fn(SessionId, Option<&SessionError>) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.did_become_invalid = Some(Arc::new(hook)));
    }

    pub fn on_receive_data<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, &[u8]) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.did_receive_data = Some(Arc::new(hook)));
    }

    pub fn on_send_body_data<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, u64, u64, Option<u64>) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.did_send_body_data = Some(Arc::new(hook)));
    }

    pub fn on_write_data<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, u64, u64, Option<u64>) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.did_write_data = Some(Arc::new(hook)));
    }

    pub fn on_finish_downloading<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, &Path) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.did_finish_downloading = Some(Arc::new(hook)));
    }

    pub fn on_resume<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, u64, Option<u64>) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.did_resume = Some(Arc::new(hook)));
    }

    pub fn on_become_download_task<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, &SessionTask) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.did_become_download_task = Some(Arc::new(hook)));
    }

    pub fn on_become_stream_task<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, &SessionTask) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.did_become_stream_task = Some(Arc::new(hook)));
    }

    pub fn on_become_streams<F>(&self, hook: F)
    where
        F: Fn(&SessionTask, TaskStreams) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.did_become_streams = Some(Arc::new(hook)));
    }

    pub fn on_write_closed<F>(&self, hook: F)
    where
        F: Fn(&SessionTask) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.write_closed = Some(Arc::new(hook)));
    }

    pub fn on_better_route_discovered<F>(&self, hook: F)
    where
        F: Fn(&SessionTask) + Send + Sync + 'static,
    {
        self.update_hooks(|hooks| hooks.better_route_discovered = Some(Arc::new(hook)));
    }
}
