//! Loopback HTTP/1.1 server the session scenarios talk to.
//!
//! WHY: Session callbacks only fire against a real socket, and the scenarios
//! must not depend on the network.
//!
//! WHAT: `TestHttpServer` answers each request through a handler closure.
//! An `HttpResponse` can hold its head back for a while and drip its body out
//! in timed pieces, which is what the timeout scenarios lean on.
//!
//! HOW: A nonblocking accept loop hands each connection to its own thread.
//! Request bodies are read by `Content-Length` or de-chunked.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

type ResponseHandler = Arc<Mutex<Box<dyn Fn(&HttpRequest) -> HttpResponse + Send>>>;

const MAX_HEAD_LINE: u64 = 16 * 1024;

/// A request as the handler sees it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method token as sent
    pub method: String,
    /// Raw request target (e.g., "/get?a=b")
    pub target: String,
    /// Path portion of the target (e.g., "/get")
    pub path: String,
    /// Decoded query parameters in order
    pub query: Vec<(String, String)>,
    /// Headers in arrival order, names as sent
    pub headers: Vec<(String, String)>,
    /// Body of the request, de-chunked
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// First header value matching `name`, ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// First query value for `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// A canned response, optionally paced.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    /// `Content-Length` and `Connection` are always written by the server
    pub headers: Vec<(String, String)>,
    /// Response body, sent right after the head
    pub body: Vec<u8>,
    /// Pause before anything is written
    pub delay: Duration,
    /// Body pieces written after `body`, each preceded by its pause
    pub drip: Vec<(Duration, Vec<u8>)>,
}

impl HttpResponse {
    /// `200` with a `text/plain` body.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200, "OK")
            .with_header("Content-Type", "text/plain")
            .with_body(body)
    }

    /// `200` carrying `document` as `application/json`.
    #[must_use]
    pub fn json(document: &serde_json::Value) -> Self {
        let mut body = document.to_string().into_bytes();
        body.push(b'\n');
        Self::status(200, "OK")
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    /// `302` pointing at `location`.
    #[must_use]
    pub fn redirect(location: &str) -> Self {
        Self::status(302, "Found").with_header("Location", location)
    }

    /// Empty response with the given status line.
    #[must_use]
    pub fn status(code: u16, text: &str) -> Self {
        Self {
            status: code,
            status_text: text.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            delay: Duration::ZERO,
            drip: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, code: u16) -> Self {
        self.status = code;
        self.status_text = reason_phrase(code).to_string();
        self
    }

    /// Sets a header, replacing an existing one of the same name.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Appends a body piece written after `pause`.
    #[must_use]
    pub fn with_drip(mut self, pause: Duration, piece: impl Into<Vec<u8>>) -> Self {
        self.drip.push((pause, piece.into()));
        self
    }

    fn content_length(&self) -> usize {
        self.body.len() + self.drip.iter().map(|(_, piece)| piece.len()).sum::<usize>()
    }

    fn render_head(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.status_text);
        let written_by_server = ["Content-Length", "Connection"];

        for (name, value) in &self.headers {
            if written_by_server
                .iter()
                .any(|reserved| name.eq_ignore_ascii_case(reserved))
            {
                continue;
            }
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.content_length()
        ));

        head.into_bytes()
    }

    fn write_to(&self, stream: &mut TcpStream) -> io::Result<()> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let mut first = self.render_head();
        first.extend_from_slice(&self.body);
        stream.write_all(&first)?;

        for (pause, piece) in &self.drip {
            thread::sleep(*pause);
            stream.write_all(piece)?;
        }
        stream.flush()
    }
}

/// Reason phrase for the status codes the echo routes produce.
#[must_use]
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        418 => "I'm a teapot",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Handler-driven server bound to an ephemeral loopback port.
///
/// The accept loop stops once the server is dropped; connections already
/// handed to a thread finish their response.
///
/// ```rust
/// use foundation_testing::http::{HttpResponse, TestHttpServer};
///
/// let server = TestHttpServer::with_response(|_req| HttpResponse::ok(b"pong".to_vec()));
/// assert!(server.url("/ping").starts_with("http://127.0.0.1:"));
/// ```
pub struct TestHttpServer {
    addr: String,
    accept_loop: Option<thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl core::fmt::Debug for TestHttpServer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TestHttpServer")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl TestHttpServer {
    /// Server answering `200 OK` to every request.
    ///
    /// # Panics
    ///
    /// Panics when no local port can be bound.
    #[must_use]
    pub fn start() -> Self {
        Self::with_response(|_req| HttpResponse::ok(b"OK".to_vec()))
    }

    /// Server answering through `handler`.
    ///
    /// # Panics
    ///
    /// Panics when no local port can be bound.
    #[must_use]
    pub fn with_response<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + 'static,
    {
        Self::try_with_response(handler).expect("Failed to bind test HTTP server to localhost")
    }

    /// Fallible variant of [`Self::with_response`].
    pub fn try_with_response<F>(handler: F) -> io::Result<Self>
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = format!("http://{}", listener.local_addr()?);
        listener.set_nonblocking(true)?;

        let running = Arc::new(AtomicBool::new(true));
        let handler: ResponseHandler = Arc::new(Mutex::new(Box::new(handler)));
        let keep_accepting = Arc::clone(&running);

        let accept_loop = thread::Builder::new()
            .name("test-http-accept".into())
            .spawn(move || {
                while keep_accepting.load(Ordering::Relaxed) {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            tracing::debug!("Accepted connection from {peer}");
                            let handler = Arc::clone(&handler);
                            thread::spawn(move || {
                                if let Err(err) = Self::serve(stream, &handler) {
                                    tracing::info!("Test server connection failed: {err}");
                                }
                            });
                        }
                        Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(5));
                        }
                        Err(err) => {
                            tracing::warn!("Test server stopped accepting: {err}");
                            break;
                        }
                    }
                }
            })?;

        tracing::info!("Test server listening on {addr}");
        Ok(Self {
            addr,
            accept_loop: Some(accept_loop),
            running,
        })
    }

    /// Absolute URL of `path` (which carries its own leading slash and query).
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        let mut url = self.addr.clone();
        url.push_str(path);
        url
    }

    /// `http://127.0.0.1:<port>` without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.addr
    }

    fn serve(stream: TcpStream, handler: &ResponseHandler) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);

        let Some(request) = read_request(&mut reader)? else {
            tracing::debug!("Client closed connection before sending a request");
            return Ok(());
        };

        tracing::info!("Received {} {}", request.method, request.target);

        let response = {
            let respond = handler.lock().unwrap_or_else(PoisonError::into_inner);
            respond(&request)
        };

        response.write_to(&mut writer)?;
        tracing::debug!("Sent {} for {}", response.status, request.target);
        Ok(())
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(accept_loop) = self.accept_loop.take() {
            let _ = accept_loop.join();
        }
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    let read = reader.by_ref().take(MAX_HEAD_LINE).read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// Parses one request; `None` when the peer closed without sending anything.
pub(crate) fn read_request<R: BufRead>(reader: &mut R) -> io::Result<Option<HttpRequest>> {
    let Some(request_line) = read_line(reader)? else {
        return Ok(None);
    };

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(invalid(format!("malformed request line: {request_line}")));
    };
    let method = method.to_string();
    let target = target.to_string();

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader)?.ok_or_else(|| invalid("connection closed inside headers"))?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| invalid(format!("malformed header: {line}")))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let header = |name: &str| {
        headers
            .iter()
            .find(|(key, _): &&(String, String)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    };

    let body = if header("Transfer-Encoding").is_some_and(|value| value.contains("chunked")) {
        read_chunked(reader)?
    } else if let Some(length) = header("Content-Length") {
        let length: u64 = length
            .parse()
            .map_err(|_| invalid(format!("bad content length: {length}")))?;
        let mut body = Vec::new();
        reader.by_ref().take(length).read_to_end(&mut body)?;
        body
    } else {
        Vec::new()
    };

    let (path, raw_query) = target.split_once('?').unwrap_or((target.as_str(), ""));
    let query = url::form_urlencoded::parse(raw_query.as_bytes())
        .into_owned()
        .collect();

    Ok(Some(HttpRequest {
        method,
        path: path.to_string(),
        target: target.clone(),
        query,
        headers,
        body,
    }))
}

fn read_chunked<R: BufRead>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line = read_line(reader)?.ok_or_else(|| invalid("connection closed inside chunk"))?;
        let size = line.split(';').next().unwrap_or_default().trim();
        let size =
            u64::from_str_radix(size, 16).map_err(|_| invalid(format!("bad chunk size: {line}")))?;

        if size == 0 {
            while read_line(reader)?.is_some_and(|trailer| !trailer.is_empty()) {}
            return Ok(body);
        }

        reader.by_ref().take(size).read_to_end(&mut body)?;
        read_line(reader)?;
    }
}
