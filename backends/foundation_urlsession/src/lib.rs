//! Callback driven HTTP session for the ewe-platform project.
//!
//! WHY: Some consumers (most notably test harnesses) need to observe and steer
//! every step of a request's lifecycle rather than receive a finished response.
//!
//! WHAT: A `Session` creates `SessionTask`s from `Request`s and reports their
//! progress to a `SessionDelegate`: challenges, redirects, body stream requests,
//! upload progress, responses, data, cache proposals and completion. Decision
//! points hand the delegate a `Completion` continuation which resumes the task.
//!
//! HOW: Each task runs on its own worker thread, speaking HTTP/1.1 over a plain
//! `TcpStream` (or decoding a `data:` URL). Delegate callbacks are delivered on a
//! per-session serial queue thread, never on the thread that created the task.

pub mod auth;
pub mod cache;
pub mod config;
pub mod delegate;
pub mod errors;
pub mod request;
pub mod response;
pub mod session;
pub mod synca;
pub mod task;

mod transport;

pub use auth::*;
pub use cache::*;
pub use config::*;
pub use delegate::*;
pub use errors::*;
pub use request::*;
pub use response::*;
pub use session::*;
pub use synca::{Completion, CompletionLatch, Pending};
pub use task::*;

pub use url::Url;
