//! The callback contract between a `Session` and its observer.
//!
//! Every method has a default body, so a delegate only overrides what it
//! cares about. Decision callbacks receive a [`Completion`] which must be
//! completed exactly once to resume the task; the defaults complete it
//! immediately with the documented policy.

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use crate::auth::{AuthChallenge, ChallengeDisposition, ChallengeResolution};
use crate::errors::SessionError;
use crate::request::{BodyStream, Request};
use crate::response::{CachedResponse, Response, ResponseDisposition};
use crate::synca::Completion;
use crate::task::SessionTask;

/// Identifies the session a session-level callback belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("session-{_0}")]
pub struct SessionId(pub u64);

/// Connection halves handed over when a data task becomes a stream task.
pub struct TaskStreams {
    pub input: Box<dyn Read + Send>,
    pub output: Box<dyn Write + Send>,
}

impl fmt::Debug for TaskStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStreams").finish_non_exhaustive()
    }
}

#[allow(unused_variables)]
pub trait SessionDelegate: Send + Sync {
    // -- session level

    /// Delivered last, once the session finished invalidating.
    fn session_did_become_invalid(&self, session: SessionId, error: Option<SessionError>) {}

    /// Connection-wide challenges (Negotiate, NTLM).
    fn session_did_receive_challenge(
        &self,
        session: SessionId,
        challenge: AuthChallenge,
        completion: Completion<ChallengeResolution>,
    ) {
        completion.complete((ChallengeDisposition::PerformDefaultHandling, None));
    }

    // -- task level

    /// Completing with `None` blocks the redirect; the 3xx response is delivered instead.
    fn task_will_perform_redirection(
        &self,
        task: &SessionTask,
        response: &Response,
        proposed: Request,
        completion: Completion<Option<Request>>,
    ) {
        completion.complete(Some(proposed));
    }

    fn task_did_receive_challenge(
        &self,
        task: &SessionTask,
        challenge: AuthChallenge,
        completion: Completion<ChallengeResolution>,
    ) {
        completion.complete((ChallengeDisposition::PerformDefaultHandling, None));
    }

    /// Asked when a streamed body must be sent again.
    fn task_need_new_body_stream(
        &self,
        task: &SessionTask,
        completion: Completion<Option<BodyStream>>,
    ) {
        completion.complete(None);
    }

    fn task_did_send_body_data(
        &self,
        task: &SessionTask,
        bytes_sent: u64,
        total_bytes_sent: u64,
        total_bytes_expected: Option<u64>,
    ) {
    }

    /// Terminal callback, delivered exactly once per task.
    fn task_did_complete(&self, task: &SessionTask, error: Option<SessionError>) {}

    // -- data task level

    fn data_task_did_receive_response(
        &self,
        task: &SessionTask,
        response: &Response,
        completion: Completion<ResponseDisposition>,
    ) {
        completion.complete(ResponseDisposition::Allow);
    }

    fn data_task_did_become_download_task(&self, task: &SessionTask, download: &SessionTask) {}

    fn data_task_did_become_stream_task(&self, task: &SessionTask, stream: &SessionTask) {}

    fn data_task_did_receive_data(&self, task: &SessionTask, data: &[u8]) {}

    /// Completing with `None` keeps the response out of the cache.
    fn data_task_will_cache_response(
        &self,
        task: &SessionTask,
        proposed: CachedResponse,
        completion: Completion<Option<CachedResponse>>,
    ) {
        completion.complete(Some(proposed));
    }

    // -- download task level

    fn download_task_did_finish_downloading(&self, task: &SessionTask, location: &Path) {}

    fn download_task_did_write_data(
        &self,
        task: &SessionTask,
        bytes_written: u64,
        total_bytes_written: u64,
        total_bytes_expected: Option<u64>,
    ) {
    }

    fn download_task_did_resume(
        &self,
        task: &SessionTask,
        file_offset: u64,
        expected_total_bytes: Option<u64>,
    ) {
    }

    // -- stream task level

    fn stream_task_write_closed(&self, task: &SessionTask) {}

    fn stream_task_better_route_discovered(&self, task: &SessionTask) {}

    fn stream_task_did_become_streams(&self, task: &SessionTask, streams: TaskStreams) {}
}

/// Delegate keeping every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDelegate;

impl SessionDelegate for DefaultDelegate {}
