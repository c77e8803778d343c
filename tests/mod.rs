//! Workspace integration tests.
//!
//! Scenarios run against a local `EchoServer` unless `HTTPBIN_ENDPOINT`
//! names an external httpbin.

#[cfg(test)]
mod backends;
