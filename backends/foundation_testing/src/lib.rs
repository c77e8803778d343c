//! Test harness for callback driven `foundation_urlsession` sessions.
//!
//! This crate provides:
//! - **Session observer**: records every delegate callback, keeps received
//!   bytes and exposes each decision point as an overridable hook
//! - **Blocking runner**: drives one task to completion with a deadline
//! - **JSON path lookups**: best-effort assertions on echoed JSON bodies
//! - **Test servers**: `TestHttpServer` and the httpbin-like `EchoServer`
//!
//! # Examples
//!
//! ```rust,no_run
//! use foundation_testing::http::EchoServer;
//! use foundation_testing::json_path;
//! use foundation_testing::session::SessionObserver;
//!
//! let server = EchoServer::start();
//! let observer = SessionObserver::with_default_configuration().unwrap();
//!
//! observer.run_url(&server.url("/get?greeting=hi")).unwrap();
//!
//! assert_eq!(
//!     observer.json_string(&json_path!["args", "greeting"]).as_deref(),
//!     Some("hi")
//! );
//! assert_eq!(
//!     observer.collapsed_event_sequence(),
//!     "dataTaskDidReceiveResponse,dataTaskDidReceiveData,dataTaskWillCacheResponse,taskDidComplete"
//! );
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod http;
pub mod session;

pub use session::{RunError, RunResult, SessionObserver};
