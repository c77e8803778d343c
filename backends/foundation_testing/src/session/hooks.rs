//! Overridable decision points of the observer.
//!
//! Every decision hook receives the continuation the session handed to the
//! delegate. A hook slot set to `None` never completes its continuation, so
//! the task stalls until the runner's deadline cancels it.

use std::path::Path;
use std::sync::Arc;

use foundation_urlsession::{
    AuthChallenge, BodyStream, CachedResponse, ChallengeDisposition, ChallengeResolution,
    Completion, Request, Response, ResponseDisposition, SessionError, SessionId, SessionTask,
    TaskStreams,
};

pub type SessionChallengeHook =
    Arc<dyn Fn(SessionId, &AuthChallenge, Completion<ChallengeResolution>) + Send + Sync>;

pub type ChallengeHook =
    Arc<dyn Fn(&SessionTask, &AuthChallenge, Completion<ChallengeResolution>) + Send + Sync>;

pub type RedirectHook =
    Arc<dyn Fn(&SessionTask, &Response, Request, Completion<Option<Request>>) + Send + Sync>;

pub type BodyStreamHook = Arc<dyn Fn(&SessionTask, Completion<Option<BodyStream>>) + Send + Sync>;

pub type ResponseHook =
    Arc<dyn Fn(&SessionTask, &Response, Completion<ResponseDisposition>) + Send + Sync>;

pub type CacheHook =
    Arc<dyn Fn(&SessionTask, CachedResponse, Completion<Option<CachedResponse>>) + Send + Sync>;

pub type CompleteHook = Arc<dyn Fn(&SessionTask, Option<&SessionError>) + Send + Sync>;

pub type InvalidHook = Arc<dyn Fn(SessionId, Option<&SessionError>) + Send + Sync>;

pub type DataHook = Arc<dyn Fn(&SessionTask, &[u8]) + Send + Sync>;

/// `(bytes, total_bytes, total_expected)` progress notifications.
pub type ProgressHook = Arc<dyn Fn(&SessionTask, u64, u64, Option<u64>) + Send + Sync>;

pub type DownloadHook = Arc<dyn Fn(&SessionTask, &Path) + Send + Sync>;

/// `(original, replacement)` when a data task turns into a download or stream task.
pub type ConversionHook = Arc<dyn Fn(&SessionTask, &SessionTask) + Send + Sync>;

/// `(file_offset, expected_total_bytes)` for a resumed download.
pub type ResumeHook = Arc<dyn Fn(&SessionTask, u64, Option<u64>) + Send + Sync>;

pub type TaskHook = Arc<dyn Fn(&SessionTask) + Send + Sync>;

/// Receives the stream halves; when unset the observer keeps them for `take_streams`.
pub type StreamsHook = Arc<dyn Fn(&SessionTask, TaskStreams) + Send + Sync>;

/// One slot per callback kind.
///
/// Decision slots start out with the default policy; notification slots start empty.
#[derive(Clone)]
pub struct Hooks {
    pub session_challenge: Option<SessionChallengeHook>,
    pub task_challenge: Option<ChallengeHook>,
    pub redirect: Option<RedirectHook>,
    pub need_new_body_stream: Option<BodyStreamHook>,
    pub response: Option<ResponseHook>,
    pub will_cache_response: Option<CacheHook>,

    pub did_complete: Option<CompleteHook>,
    pub did_become_invalid: Option<InvalidHook>,
    pub did_receive_data: Option<DataHook>,
    pub did_send_body_data: Option<ProgressHook>,
    pub did_write_data: Option<ProgressHook>,
    pub did_finish_downloading: Option<DownloadHook>,
    pub did_resume: Option<ResumeHook>,
    pub did_become_download_task: Option<ConversionHook>,
    pub did_become_stream_task: Option<ConversionHook>,
    pub did_become_streams: Option<StreamsHook>,
    pub write_closed: Option<TaskHook>,
    pub better_route_discovered: Option<TaskHook>,
}

impl core::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hooks")
            .field("session_challenge", &self.session_challenge.is_some())
            .field("task_challenge", &self.task_challenge.is_some())
            .field("redirect", &self.redirect.is_some())
            .field("need_new_body_stream", &self.need_new_body_stream.is_some())
            .field("response", &self.response.is_some())
            .field("will_cache_response", &self.will_cache_response.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            session_challenge: Some(Arc::new(
                |_session: SessionId,
                 _challenge: &AuthChallenge,
                 completion: Completion<ChallengeResolution>| {
                    completion.complete((ChallengeDisposition::PerformDefaultHandling, None));
                },
            )),
            task_challenge: Some(default_challenge_hook()),
            redirect: Some(follow_redirects_hook()),
            need_new_body_stream: Some(Arc::new(
                |_task: &SessionTask, completion: Completion<Option<BodyStream>>| {
                    completion.complete(None);
                },
            )),
            response: Some(allow_response_hook()),
            will_cache_response: Some(Arc::new(
                |_task: &SessionTask,
                 proposed: CachedResponse,
                 completion: Completion<Option<CachedResponse>>| {
                    completion.complete(Some(proposed));
                },
            )),
            did_complete: None,
            did_become_invalid: None,
            did_receive_data: None,
            did_send_body_data: None,
            did_write_data: None,
            did_finish_downloading: None,
            did_resume: None,
            did_become_download_task: None,
            did_become_stream_task: None,
            did_become_streams: None,
            write_closed: None,
            better_route_discovered: None,
        }
    }
}

/// Answers every task challenge with `PerformDefaultHandling`.
#[must_use]
pub fn default_challenge_hook() -> ChallengeHook {
    Arc::new(
        |_task: &SessionTask,
         _challenge: &AuthChallenge,
         completion: Completion<ChallengeResolution>| {
            completion.complete((ChallengeDisposition::PerformDefaultHandling, None));
        },
    )
}

/// Follows every redirect unchanged.
#[must_use]
pub fn follow_redirects_hook() -> RedirectHook {
    Arc::new(
        |_task: &SessionTask,
         _response: &Response,
         proposed: Request,
         completion: Completion<Option<Request>>| completion.complete(Some(proposed)),
    )
}

/// Refuses every redirect; the 3xx response is delivered instead.
#[must_use]
pub fn block_redirects_hook() -> RedirectHook {
    Arc::new(
        |_task: &SessionTask,
         _response: &Response,
         _proposed: Request,
         completion: Completion<Option<Request>>| completion.complete(None),
    )
}

/// Accepts every response.
#[must_use]
pub fn allow_response_hook() -> ResponseHook {
    response_disposition_hook(ResponseDisposition::Allow)
}

/// Answers every response with `disposition`.
#[must_use]
pub fn response_disposition_hook(disposition: ResponseDisposition) -> ResponseHook {
    Arc::new(
        move |_task: &SessionTask,
              _response: &Response,
              completion: Completion<ResponseDisposition>| completion.complete(disposition),
    )
}
