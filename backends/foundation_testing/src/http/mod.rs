//! HTTP test server utilities.
//!
//! WHY: Provides real HTTP test servers built on stdlib TCP.
//!
//! WHAT: `TestHttpServer` for integration testing HTTP clients and `EchoServer`,
//! an httpbin look-alike driving the session scenarios.
//!
//! HOW: Uses stdlib's `TcpListener` with manually crafted HTTP/1.1 responses.

mod echo;
mod server;

pub use echo::{
    route, title_case, EchoEndpoint, EchoServer, DIGEST_REALM, FAKE_REALM, HTTPBIN_ENDPOINT_ENV,
};
pub use server::{reason_phrase, HttpRequest, HttpResponse, TestHttpServer};
