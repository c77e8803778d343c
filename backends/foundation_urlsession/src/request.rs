use std::fmt;
use std::io::{self, Cursor, Read};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use url::Url;

use crate::config::SessionConfiguration;
use crate::errors::{SessionError, SessionResult};

/// Timeout reported by `Request::timeout_interval` when none was set.
pub const DEFAULT_TIMEOUT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(SessionError::UnsupportedMethod(s.to_string())),
        }
    }
}

/// Ordered header list with case-insensitive lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces any existing values of `name`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Appends without replacing; used when parsing wire headers.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let position = self
            .entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        let (_, value) = self.entries.remove(position);
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (key, value) in iter {
            headers.append(key, value);
        }
        headers
    }
}

/// A shareable, read-once request body source.
///
/// Clones share the same underlying reader, so a stream consumed by one
/// attempt is exhausted for every other holder.
#[derive(Clone)]
pub struct BodyStream {
    inner: Arc<Mutex<Box<dyn Read + Send>>>,
}

impl BodyStream {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(reader))),
        }
    }

    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Cursor::new(bytes.into()))
    }

    /// Whether both handles point at the same underlying reader.
    #[must_use]
    pub fn ptr_eq(&self, other: &BodyStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Reads the next slice of the stream into `buf`.
    pub fn read_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut reader = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        reader.read(buf)
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("shared", &Arc::strong_count(&self.inner))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Bytes(Vec<u8>),
    Stream(BodyStream),
}

impl RequestBody {
    /// Length known ahead of sending; `None` for streams.
    #[must_use]
    pub fn known_length(&self) -> Option<u64> {
        match self {
            RequestBody::Bytes(bytes) => Some(bytes.len() as u64),
            RequestBody::Stream(_) => None,
        }
    }
}

/// A request description handed to `Session` and to redirect decisions.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: Headers,
    pub body: Option<RequestBody>,
    /// `Some` only when the timeout was set explicitly.
    pub timeout: Option<Duration>,
}

impl Request {
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::Get,
            headers: Headers::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn parse(url: &str) -> SessionResult<Self> {
        Ok(Self::new(Url::parse(url)?))
    }

    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(RequestBody::Bytes(body.into()));
        self
    }

    #[must_use]
    pub fn with_body_stream(mut self, stream: BodyStream) -> Self {
        self.body = Some(RequestBody::Stream(stream));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn set_timeout_interval(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// The request's timeout, reporting the 60 second default when unset.
    #[must_use]
    pub fn timeout_interval(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT_INTERVAL)
    }

    #[must_use]
    pub fn has_explicit_timeout(&self) -> bool {
        self.timeout.is_some()
    }

    /// Only an explicitly set request timeout overrides the session's.
    #[must_use]
    pub fn effective_timeout(&self, config: &SessionConfiguration) -> Duration {
        self.timeout
            .unwrap_or(config.timeout_interval_for_request)
    }

    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            Some(RequestBody::Bytes(bytes)) => Some(bytes.as_slice()),
            _ => None,
        }
    }

    #[must_use]
    pub fn body_stream(&self) -> Option<&BodyStream> {
        match &self.body {
            Some(RequestBody::Stream(stream)) => Some(stream),
            _ => None,
        }
    }
}
