use std::io;

/// Errors a task can complete with.
///
/// These are delivered exactly once per task through the terminal completion
/// callback (`SessionDelegate::task_did_complete` or a completion handler).
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum SessionError {
    /// The task was cancelled, either explicitly or by a delegate decision.
    #[display("Task was cancelled")]
    Cancelled,

    /// No progress was made within the effective timeout.
    #[display("The request timed out")]
    TimedOut,

    /// TCP connection could not be established.
    #[display("Could not connect to server: {_0}")]
    CannotConnect(String),

    /// The server sent something that is not valid HTTP/1.1.
    #[display("Bad server response: {_0}")]
    BadServerResponse(String),

    /// The redirect chain exceeded the configured maximum.
    #[display("Too many HTTP redirects")]
    TooManyRedirects,

    /// The URL scheme is not handled by this transport.
    #[display("Unsupported URL: {_0}")]
    UnsupportedUrl(String),

    /// A streamed body had to be re-sent but the delegate supplied no new stream.
    #[display("Request body stream exhausted and no replacement was provided")]
    BodyStreamUnavailable,

    /// The session was invalidated before the operation could start.
    #[display("Session has been invalidated")]
    SessionInvalidated,

    /// The URL could not be parsed.
    #[display("Invalid URL: {_0}")]
    InvalidUrl(String),

    /// The request method is not one this client sends.
    #[display("Unsupported method: {_0}")]
    UnsupportedMethod(String),

    /// Writing a converted download to disk failed.
    #[display("Download failed: {_0}")]
    DownloadFailed(String),

    /// I/O error during communication.
    #[display("I/O error: {_0}")]
    Io(String),
}

impl std::error::Error for SessionError {}

impl SessionError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

// Manual From implementation for io::Error, timeouts surface as `TimedOut`.
impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::TimedOut,
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<url::ParseError> for SessionError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
