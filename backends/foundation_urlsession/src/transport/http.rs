//! Plain HTTP/1.1 exchange over a `TcpStream`, one connection per request.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use url::{Position, Url};

use crate::config::SessionConfiguration;
use crate::errors::{SessionError, SessionResult};
use crate::request::{Headers, Method, Request, RequestBody};

/// Size of upload slices and of body reads.
pub(crate) const CHUNK_SIZE: usize = 16 * 1024;

const MAX_HEAD_LINE: usize = 16 * 1024;

const DEFAULT_FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: u16,
    pub headers: Headers,
}

pub(crate) struct Exchange {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Exchange {
    /// Connects to the URL's authority; `timeout` bounds connect and every read/write.
    pub(crate) fn open(url: &Url, timeout: Duration) -> SessionResult<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| SessionError::InvalidUrl(format!("missing host: {url}")))?;
        let port = url.port_or_known_default().unwrap_or(80);

        let addresses = (host, port)
            .to_socket_addrs()
            .map_err(|e| SessionError::CannotConnect(format!("{host}:{port}: {e}")))?;

        let mut last_error = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, timeout) {
                Ok(stream) => {
                    tracing::debug!("Connected to {}", address);
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    stream.set_nodelay(true)?;
                    let reader = BufReader::new(stream.try_clone()?);
                    return Ok(Self { stream, reader });
                }
                Err(err) => last_error = Some(err),
            }
        }

        Err(match last_error {
            Some(err) if err.kind() == io::ErrorKind::TimedOut => SessionError::TimedOut,
            Some(err) => SessionError::CannotConnect(format!("{host}:{port}: {err}")),
            None => SessionError::CannotConnect(format!("{host}:{port}: no addresses")),
        })
    }

    pub(crate) fn try_clone_stream(&self) -> Option<TcpStream> {
        self.stream.try_clone().ok()
    }

    /// Writes the request head and body, reporting each written body slice.
    pub(crate) fn send_request(
        &mut self,
        request: &Request,
        config: &SessionConfiguration,
        authorization: Option<&str>,
        progress: &mut dyn FnMut(u64, u64, Option<u64>),
    ) -> SessionResult<()> {
        let head = render_head(request, config, authorization);
        tracing::debug!("Sending {} {}", request.method, request.url);
        self.stream.write_all(head.as_bytes())?;

        match &request.body {
            None => {}
            Some(RequestBody::Bytes(bytes)) => {
                let total = bytes.len() as u64;
                let mut sent = 0u64;
                for slice in bytes.chunks(CHUNK_SIZE) {
                    self.stream.write_all(slice)?;
                    sent += slice.len() as u64;
                    progress(slice.len() as u64, sent, Some(total));
                }
            }
            Some(RequestBody::Stream(stream)) => {
                let mut buffer = vec![0u8; CHUNK_SIZE];
                let mut sent = 0u64;
                loop {
                    let read = stream.read_chunk(&mut buffer)?;
                    if read == 0 {
                        break;
                    }
                    write!(self.stream, "{read:X}\r\n")?;
                    self.stream.write_all(&buffer[..read])?;
                    self.stream.write_all(b"\r\n")?;
                    sent += read as u64;
                    progress(read as u64, sent, None);
                }
                self.stream.write_all(b"0\r\n\r\n")?;
            }
        }

        self.stream.flush()?;
        Ok(())
    }

    /// Reads the status line and headers, skipping interim 1xx responses.
    pub(crate) fn read_head(&mut self) -> SessionResult<ResponseHead> {
        loop {
            let head = read_response_head(&mut self.reader)?;
            if (100..200).contains(&head.status) && head.status != 101 {
                tracing::debug!("Skipping interim response {}", head.status);
                continue;
            }
            return Ok(head);
        }
    }

    /// Turns the exchange into a reader over the (decoded) response body.
    pub(crate) fn into_body(
        self,
        method: Method,
        head: &ResponseHead,
        decompress: bool,
    ) -> SessionResult<Box<dyn Read + Send>> {
        body_reader(self.reader, method, head, decompress)
    }
}

fn render_head(
    request: &Request,
    config: &SessionConfiguration,
    authorization: Option<&str>,
) -> String {
    let url = &request.url;
    let mut headers = Headers::new();

    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };
    headers.set("Host", host);
    headers.set("User-Agent", config.user_agent.clone());
    headers.set("Accept", "*/*");
    if config.automatic_decompression && cfg!(feature = "compression") {
        headers.set("Accept-Encoding", "gzip, deflate");
    }

    for (name, value) in &config.http_additional_headers {
        headers.set(name.clone(), value.clone());
    }

    for (name, value) in request.headers.iter() {
        if is_framing_header(name) {
            continue;
        }
        headers.set(name, value);
    }

    if let Some(authorization) = authorization {
        headers.set("Authorization", authorization);
    }

    match &request.body {
        Some(body) => {
            if !headers.contains("Content-Type") {
                headers.set("Content-Type", DEFAULT_FORM_CONTENT_TYPE);
            }
            match body.known_length() {
                Some(length) => headers.set("Content-Length", length.to_string()),
                None => headers.set("Transfer-Encoding", "chunked"),
            }
        }
        None if matches!(request.method, Method::Post | Method::Put | Method::Patch) => {
            headers.set("Content-Length", "0");
        }
        None => {}
    }
    headers.set("Connection", "close");

    let mut head = format!("{} {} HTTP/1.1\r\n", request.method, request_target(url));
    for (name, value) in headers.iter() {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head
}

/// Path and query as sent on the request line.
pub(crate) fn request_target(url: &Url) -> &str {
    &url[Position::BeforePath..Position::AfterQuery]
}

fn is_framing_header(name: &str) -> bool {
    ["Content-Length", "Transfer-Encoding", "Connection", "Host"]
        .iter()
        .any(|framing| framing.eq_ignore_ascii_case(name))
}

fn read_line<R: BufRead>(reader: &mut R) -> SessionResult<Option<String>> {
    let mut line = String::new();
    let read = reader
        .by_ref()
        .take(MAX_HEAD_LINE as u64)
        .read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        return Err(SessionError::BadServerResponse(
            "header line too long".to_string(),
        ));
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

pub(crate) fn read_response_head<R: BufRead>(reader: &mut R) -> SessionResult<ResponseHead> {
    let status_line = read_line(reader)?.ok_or_else(|| {
        SessionError::BadServerResponse("connection closed before response".to_string())
    })?;

    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(SessionError::BadServerResponse(format!(
            "unexpected status line: {status_line}"
        )));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            SessionError::BadServerResponse(format!("invalid status code: {status_line}"))
        })?;

    let mut headers = Headers::new();
    loop {
        let line = read_line(reader)?.ok_or_else(|| {
            SessionError::BadServerResponse("connection closed inside headers".to_string())
        })?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            SessionError::BadServerResponse(format!("malformed header line: {line}"))
        })?;
        headers.append(name.trim(), value.trim());
    }

    Ok(ResponseHead { status, headers })
}

pub(crate) fn body_reader<R>(
    reader: R,
    method: Method,
    head: &ResponseHead,
    decompress: bool,
) -> SessionResult<Box<dyn Read + Send>>
where
    R: BufRead + Send + 'static,
{
    let no_body = method == Method::Head
        || (100..200).contains(&head.status)
        || head.status == 204
        || head.status == 304;

    let framed: Box<dyn Read + Send> = if no_body {
        Box::new(io::empty())
    } else if head
        .headers
        .get("Transfer-Encoding")
        .is_some_and(|value| value.to_ascii_lowercase().contains("chunked"))
    {
        Box::new(ChunkedReader::new(reader))
    } else if let Some(length) = head.headers.get("Content-Length") {
        let length = length.trim().parse::<u64>().map_err(|_| {
            SessionError::BadServerResponse(format!("invalid content length: {length}"))
        })?;
        Box::new(reader.take(length))
    } else {
        Box::new(reader)
    };

    if !decompress {
        return Ok(framed);
    }

    let encoding = head
        .headers
        .get("Content-Encoding")
        .map(|value| value.trim().to_ascii_lowercase());
    Ok(decode_content(framed, encoding.as_deref()))
}

#[cfg(feature = "compression")]
fn decode_content(framed: Box<dyn Read + Send>, encoding: Option<&str>) -> Box<dyn Read + Send> {
    match encoding {
        Some("gzip" | "x-gzip") => Box::new(flate2::read::GzDecoder::new(framed)),
        Some("deflate") => Box::new(flate2::read::ZlibDecoder::new(framed)),
        _ => framed,
    }
}

#[cfg(not(feature = "compression"))]
fn decode_content(framed: Box<dyn Read + Send>, _encoding: Option<&str>) -> Box<dyn Read + Send> {
    framed
}

/// Decodes a `Transfer-Encoding: chunked` body.
pub(crate) struct ChunkedReader<R> {
    inner: R,
    remaining: u64,
    done: bool,
}

impl<R: BufRead> ChunkedReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: 0,
            done: false,
        }
    }

    fn next_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        if self.inner.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside chunked body",
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn start_chunk(&mut self) -> io::Result<()> {
        let line = self.next_line()?;
        let size = line.split(';').next().unwrap_or_default().trim();
        self.remaining = u64::from_str_radix(size, 16).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, format!("bad chunk size: {line}"))
        })?;

        if self.remaining == 0 {
            // trailers end with an empty line
            while !self.next_line()?.is_empty() {}
            self.done = true;
        }
        Ok(())
    }
}

impl<R: BufRead> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }

        if self.remaining == 0 {
            self.start_chunk()?;
            if self.done {
                return Ok(0);
            }
        }

        let limit = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let read = self.inner.read(&mut buf[..limit])?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside chunk",
            ));
        }

        self.remaining -= read as u64;
        if self.remaining == 0 {
            self.next_line()?;
        }
        Ok(read)
    }
}
