//! Drives a task from its first request to its terminal callback.
//!
//! Runs on the task's worker thread. Informational callbacks are queued on
//! the session's delivery thread; decision callbacks are queued the same way
//! and the worker blocks on the returned continuation until the delegate
//! completes it or the task is cancelled.

mod data_url;
mod http;
mod redirects;

use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::{
    AuthChallenge, AuthenticationMethod, ChallengeAnswer, ChallengeDisposition,
    ChallengeResolution, Credential, DigestChallenge, ProtectionSpace,
};
use crate::delegate::{SessionDelegate, TaskStreams};
use crate::errors::{SessionError, SessionResult};
use crate::request::{BodyStream, Method, Request, RequestBody};
use crate::response::{CachedResponse, Response, ResponseDisposition};
use crate::session::SessionInner;
use crate::synca::Completion;
use crate::task::{SessionTask, TaskKind};

use self::http::{request_target, Exchange, CHUNK_SIZE};

/// How often a blocked decision re-checks cancellation and resource timeouts.
const DECISION_POLL: Duration = Duration::from_millis(25);

pub(crate) fn drive(session: &Arc<SessionInner>, task: &SessionTask) {
    let mut driver = TaskDriver::new(session, task.clone());
    let outcome = driver.execute();
    driver.finish(outcome);
}

enum ChallengeOutcome {
    Retry(ChallengeAnswer),
    Deliver,
}

struct TaskDriver<'a> {
    session: &'a Arc<SessionInner>,
    delegate: Arc<dyn SessionDelegate>,
    task: SessionTask,
    started: Instant,
    redirects: u8,
    challenges: usize,
    handler_mode: bool,
    collected: Vec<u8>,
}

impl<'a> TaskDriver<'a> {
    fn new(session: &'a Arc<SessionInner>, task: SessionTask) -> Self {
        let handler_mode = task.has_completion_handler();
        Self {
            session,
            delegate: session.delegate(),
            task,
            started: Instant::now(),
            redirects: 0,
            challenges: 0,
            handler_mode,
            collected: Vec::new(),
        }
    }

    fn resource_expired(&self) -> bool {
        self.started.elapsed() > self.session.config().timeout_interval_for_resource
    }

    fn check_alive(&self) -> SessionResult<()> {
        if self.task.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        if self.resource_expired() {
            tracing::warn!(
                "Task {} exceeded its resource timeout",
                self.task.task_identifier()
            );
            return Err(SessionError::TimedOut);
        }
        Ok(())
    }

    /// Queues an informational callback for the current task.
    fn notify(&self, callback: impl FnOnce(&dyn SessionDelegate, &SessionTask) + Send + 'static) {
        let delegate = self.delegate.clone();
        let task = self.task.clone();
        self.session
            .dispatch(move || callback(delegate.as_ref(), &task));
    }

    /// Queues a decision callback and blocks until its continuation completes.
    fn ask<T: Send + 'static>(
        &self,
        callback: impl FnOnce(&dyn SessionDelegate, &SessionTask, Completion<T>) + Send + 'static,
    ) -> SessionResult<T> {
        let (completion, pending) = Completion::pair();
        let delegate = self.delegate.clone();
        let task = self.task.clone();

        if !self
            .session
            .dispatch(move || callback(delegate.as_ref(), &task, completion))
        {
            return Err(SessionError::SessionInvalidated);
        }

        let watched = self.task.clone();
        match pending.wait(DECISION_POLL, || {
            watched.is_cancelled() || self.resource_expired()
        }) {
            Some(value) => Ok(value),
            None if self.task.is_cancelled() => Err(SessionError::Cancelled),
            None => Err(SessionError::TimedOut),
        }
    }

    fn execute(&mut self) -> SessionResult<()> {
        self.check_alive()?;

        let request = self.task.current_request();
        match request.url.scheme() {
            "data" => self.execute_data_url(&request),
            "http" => self.execute_http(request),
            _ => Err(SessionError::UnsupportedUrl(request.url.to_string())),
        }
    }

    fn execute_data_url(&mut self, request: &Request) -> SessionResult<()> {
        let decoded = data_url::decode(&request.url)?;
        let response = Response::new_data(
            request.url.clone(),
            decoded.mime_type,
            decoded.charset,
            decoded.body.len() as u64,
        );
        self.task.set_response(response.clone());
        self.deliver_response(request, response, Box::new(Cursor::new(decoded.body)), None)
    }

    fn execute_http(&mut self, mut request: Request) -> SessionResult<()> {
        let config = self.session.config().clone();
        let mut answer: Option<ChallengeAnswer> = None;
        let mut consumed_stream: Option<BodyStream> = None;

        loop {
            self.check_alive()?;

            let needs_new_stream = match (request.body_stream(), consumed_stream.as_ref()) {
                (Some(current), Some(consumed)) => current.ptr_eq(consumed),
                _ => false,
            };
            if needs_new_stream {
                let replacement = self.ask(|delegate, task, completion| {
                    delegate.task_need_new_body_stream(task, completion);
                })?;
                match replacement {
                    Some(stream) => request.body = Some(RequestBody::Stream(stream)),
                    None => return Err(SessionError::BodyStreamUnavailable),
                }
            }

            self.task.set_current_request(request.clone());
            let timeout = request.effective_timeout(&config);

            let mut exchange = Exchange::open(&request.url, timeout)?;
            self.task.attach_connection(exchange.try_clone_stream());

            let delegate = self.delegate.clone();
            let session = self.session.clone();
            let progress_task = self.task.clone();
            let mut progress = move |sent: u64, total: u64, expected: Option<u64>| {
                let delegate = delegate.clone();
                let task = progress_task.clone();
                session.dispatch(move || {
                    delegate.task_did_send_body_data(&task, sent, total, expected);
                });
            };
            let authorization = answer.as_mut().map(|answer| {
                answer.authorization(request.method.as_str(), request_target(&request.url))
            });
            exchange.send_request(&request, &config, authorization.as_deref(), &mut progress)?;
            if let Some(stream) = request.body_stream() {
                consumed_stream = Some(stream.clone());
            }

            let head = exchange.read_head()?;
            tracing::debug!(
                "Task {} received {} for {}",
                self.task.task_identifier(),
                head.status,
                request.url
            );
            let response = Response::new_http(request.url.clone(), head.status, head.headers.clone());

            if head.status == 401 {
                if let Some(header) = response.header("WWW-Authenticate") {
                    let header = header.to_string();
                    match self.handle_challenge(&request, &response, &header)? {
                        ChallengeOutcome::Retry(next) => {
                            answer = Some(next);
                            continue;
                        }
                        ChallengeOutcome::Deliver => {}
                    }
                }
            }

            if redirects::is_redirect_status(head.status) {
                if let Some(location) = response.header("Location") {
                    if self.redirects >= config.http_maximum_redirects {
                        return Err(SessionError::TooManyRedirects);
                    }

                    let target = redirects::resolve_location(&request.url, location)?;
                    let proposed = redirects::build_follow_up(&request, target, head.status);
                    let redirect_response = response.clone();
                    let decision = self.ask(move |delegate, task, completion| {
                        delegate.task_will_perform_redirection(
                            task,
                            &redirect_response,
                            proposed,
                            completion,
                        );
                    })?;

                    if let Some(mut next) = decision {
                        self.redirects += 1;
                        if next.timeout.is_none() {
                            next.timeout = request.timeout;
                        }
                        let same_host = next.url.host_str() == request.url.host_str();
                        if !same_host {
                            answer = None;
                        }
                        tracing::info!(
                            "Task {} following redirect to {}",
                            self.task.task_identifier(),
                            next.url
                        );
                        request = next;
                        continue;
                    }

                    tracing::info!(
                        "Task {} redirect to {} blocked",
                        self.task.task_identifier(),
                        location
                    );
                }
            }

            self.task.set_response(response.clone());
            let connection = exchange.try_clone_stream();
            let body = exchange.into_body(request.method, &head, config.automatic_decompression)?;
            return self.deliver_response(&request, response, body, connection);
        }
    }

    fn handle_challenge(
        &mut self,
        request: &Request,
        response: &Response,
        header: &str,
    ) -> SessionResult<ChallengeOutcome> {
        let host = request.url.host_str().unwrap_or_default();
        let port = request.url.port_or_known_default().unwrap_or(80);
        let protection_space = ProtectionSpace::from_www_authenticate(host, port, header);
        let method = protection_space.authentication_method.clone();

        let proposed = url_credential(&request.url);
        let challenge = AuthChallenge {
            protection_space,
            previous_failure_count: self.challenges,
            proposed_credential: proposed.clone(),
            failure_response: Some(response.clone()),
        };
        self.challenges += 1;

        let (disposition, credential): ChallengeResolution = if method.is_task_level() {
            self.ask(move |delegate, task, completion| {
                delegate.task_did_receive_challenge(task, challenge, completion);
            })?
        } else {
            let session_id = self.session.id();
            self.ask(move |delegate, _task, completion| {
                delegate.session_did_receive_challenge(session_id, challenge, completion);
            })?
        };

        tracing::debug!(
            "Challenge {:?} answered with {:?}",
            method,
            disposition
        );

        Ok(match disposition {
            ChallengeDisposition::UseCredential => match credential {
                Some(credential) => answer_for(&method, header, credential),
                None => ChallengeOutcome::Deliver,
            },
            ChallengeDisposition::PerformDefaultHandling => match proposed {
                Some(credential) if self.challenges == 1 => answer_for(&method, header, credential),
                _ => ChallengeOutcome::Deliver,
            },
            ChallengeDisposition::RejectProtectionSpace => ChallengeOutcome::Deliver,
            ChallengeDisposition::CancelAuthenticationChallenge => {
                return Err(SessionError::Cancelled)
            }
        })
    }

    fn deliver_response(
        &mut self,
        request: &Request,
        response: Response,
        body: Box<dyn Read + Send>,
        connection: Option<TcpStream>,
    ) -> SessionResult<()> {
        let disposition = if self.handler_mode {
            ResponseDisposition::Allow
        } else {
            let proposed = response.clone();
            self.ask(move |delegate, task, completion| {
                delegate.data_task_did_receive_response(task, &proposed, completion);
            })?
        };

        match disposition {
            ResponseDisposition::Cancel => Err(SessionError::Cancelled),
            ResponseDisposition::Allow => self.stream_body(request, response, body),
            ResponseDisposition::BecomeDownload => self.become_download(&response, body),
            ResponseDisposition::BecomeStream => self.become_stream(body, connection),
        }
    }

    fn stream_body(
        &mut self,
        request: &Request,
        response: Response,
        mut body: Box<dyn Read + Send>,
    ) -> SessionResult<()> {
        let config = self.session.config();
        let cacheable = config.url_cache_enabled
            && !self.handler_mode
            && request.method == Method::Get
            && response.is_success();

        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            self.check_alive()?;
            let read = read_some(&mut body, &mut buffer)?;
            if read == 0 {
                break;
            }

            let chunk = buffer[..read].to_vec();
            if self.handler_mode || cacheable {
                self.collected.extend_from_slice(&chunk);
            }
            if !self.handler_mode {
                self.notify(move |delegate, task| delegate.data_task_did_receive_data(task, &chunk));
            }
        }
        self.check_alive()?;

        if cacheable && !self.collected.is_empty() {
            let proposed = CachedResponse::new(response, self.collected.clone());
            let accepted = self.ask(move |delegate, task, completion| {
                delegate.data_task_will_cache_response(task, proposed, completion);
            })?;
            if let Some(cached) = accepted {
                self.session.cache().store(&request.url, cached);
            }
        }
        Ok(())
    }

    fn become_download(
        &mut self,
        response: &Response,
        mut body: Box<dyn Read + Send>,
    ) -> SessionResult<()> {
        let download = self.session.convert_task(&self.task, TaskKind::Download);
        let converted = download.clone();
        self.notify(move |delegate, task| {
            delegate.data_task_did_become_download_task(task, &converted);
        });
        self.task = download;

        let location = std::env::temp_dir().join(format!(
            "urlsession-download-{:016x}.tmp",
            fastrand::u64(..)
        ));
        let mut file = File::create(&location)
            .map_err(|e| SessionError::DownloadFailed(format!("{}: {e}", location.display())))?;

        let expected = response.expected_content_length;
        let mut written = 0u64;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            self.check_alive()?;
            let read = read_some(&mut body, &mut buffer)?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .map_err(|e| SessionError::DownloadFailed(e.to_string()))?;
            written += read as u64;

            let chunk = read as u64;
            let total = written;
            self.notify(move |delegate, task| {
                delegate.download_task_did_write_data(task, chunk, total, expected);
            });
        }
        file.flush()
            .map_err(|e| SessionError::DownloadFailed(e.to_string()))?;
        drop(file);

        let finished: PathBuf = location;
        self.notify(move |delegate, task| {
            delegate.download_task_did_finish_downloading(task, &finished);
            // the delegate moves the file if it wants to keep it
            let _ = std::fs::remove_file(&finished);
        });
        Ok(())
    }

    fn become_stream(
        &mut self,
        body: Box<dyn Read + Send>,
        connection: Option<TcpStream>,
    ) -> SessionResult<()> {
        let stream = self.session.convert_task(&self.task, TaskKind::Stream);
        let converted = stream.clone();
        self.notify(move |delegate, task| {
            delegate.data_task_did_become_stream_task(task, &converted);
        });
        self.task = stream;

        let output: Box<dyn Write + Send> = match connection {
            Some(connection) => Box::new(connection),
            None => Box::new(io::sink()),
        };
        let streams = TaskStreams {
            input: body,
            output,
        };
        self.notify(move |delegate, task| delegate.stream_task_did_become_streams(task, streams));
        Ok(())
    }

    fn finish(self, outcome: SessionResult<()>) {
        let error = match outcome {
            Ok(()) => None,
            Err(_) if self.task.is_cancelled() => Some(SessionError::Cancelled),
            Err(err) => Some(err),
        };

        self.task.attach_connection(None);
        let data = self.handler_mode.then_some(self.collected);
        self.session.complete_task(&self.task, error, data);
    }
}

/// Reads from a body, retrying reads interrupted by signals.
fn read_some(body: &mut Box<dyn Read + Send>, buffer: &mut [u8]) -> SessionResult<usize> {
    loop {
        match body.read(buffer) {
            Ok(read) => return Ok(read),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(SessionError::from(err)),
        }
    }
}

/// Credentials embedded in the URL's user-info, used by default handling.
/// Binds `credential` to the challenged scheme; schemes without support deliver the 401.
fn answer_for(
    method: &AuthenticationMethod,
    header: &str,
    credential: Credential,
) -> ChallengeOutcome {
    match method {
        AuthenticationMethod::HttpBasic => {
            ChallengeOutcome::Retry(ChallengeAnswer::Basic(credential))
        }
        AuthenticationMethod::HttpDigest => match DigestChallenge::parse(header) {
            Some(challenge) => ChallengeOutcome::Retry(ChallengeAnswer::Digest {
                credential,
                challenge,
                nonce_count: 0,
            }),
            None => {
                tracing::warn!("Unsupported digest challenge: {}", header);
                ChallengeOutcome::Deliver
            }
        },
        _ => {
            tracing::warn!("Credentials for {:?} are not supported", method);
            ChallengeOutcome::Deliver
        }
    }
}

fn url_credential(url: &url::Url) -> Option<Credential> {
    let user = url.username();
    if user.is_empty() {
        return None;
    }
    let decode = |value: &str| {
        percent_encoding::percent_decode_str(value)
            .decode_utf8_lossy()
            .into_owned()
    };
    Some(Credential::new(
        decode(user),
        decode(url.password().unwrap_or_default()),
    ))
}
