//! Timeout precedence between the session and an explicit request timeout.
//!
//! Durations are expressed in time units of the endpoint; the local echo
//! server shrinks a unit to 100ms so these stay quick.

use foundation_testing::RunError;
use foundation_urlsession::{Request, SessionConfiguration, SessionError};
use serial_test::serial;
use tracing_test::traced_test;

use super::support::{endpoint, timed_observer, units};

/// WHY: An explicit request timeout overrides a shorter session timeout
/// WHAT: S=5, R=15 against a 10 unit delay succeeds
#[test]
#[serial]
#[traced_test]
#[ntest::timeout(60000)]
fn test_request_timeout_extends_session_timeout() {
    let endpoint = endpoint();
    let observer = timed_observer(
        &endpoint,
        SessionConfiguration::new().timeout_for_request(units(&endpoint, 5)),
    );
    let request = Request::parse(&endpoint.url("/delay/10")).expect("request");

    observer
        .run_data_task_with_timeout(request, Some(units(&endpoint, 15)))
        .expect("delayed response arrives in time");

    assert_eq!(observer.response().and_then(|r| r.status_code()), Some(200));
}

/// WHY: An explicit request timeout also overrides a longer session timeout
/// WHAT: S=15, R=5 against a 10 unit delay times out
#[test]
#[serial]
#[traced_test]
#[ntest::timeout(60000)]
fn test_request_timeout_shortens_session_timeout() {
    let endpoint = endpoint();
    let observer = timed_observer(
        &endpoint,
        SessionConfiguration::new().timeout_for_request(units(&endpoint, 15)),
    );
    let request = Request::parse(&endpoint.url("/delay/10")).expect("request");

    let result = observer.run_data_task_with_timeout(request, Some(units(&endpoint, 5)));

    assert_eq!(result, Err(RunError::Transport(SessionError::TimedOut)));
    assert_eq!(observer.error(), Some(SessionError::TimedOut));
    assert_eq!(observer.event_sequence(), "taskDidComplete");
}

/// WHY: The request timeout bounds inactivity, not the whole transfer
/// WHAT: S=5 with no request timeout survives a 10 unit drip of one byte per unit
#[test]
#[serial]
#[traced_test]
#[ntest::timeout(60000)]
fn test_session_timeout_is_an_inactivity_timeout() {
    let endpoint = endpoint();
    let observer = timed_observer(
        &endpoint,
        SessionConfiguration::new().timeout_for_request(units(&endpoint, 5)),
    );
    let request = Request::parse(&endpoint.url("/drip?duration=10&numbytes=10&delay=0"))
        .expect("request");
    assert!(!request.has_explicit_timeout());

    observer
        .run_data_task(request)
        .expect("drip completes despite outlasting the timeout");

    assert_eq!(observer.received_data().map(|bytes| bytes.len()), Some(10));
}

/// WHY: Followed redirects keep the original request's timeout
/// WHAT: A short explicit timeout still fires after a redirect to a slow route
#[test]
#[serial]
#[traced_test]
#[ntest::timeout(60000)]
fn test_redirect_inherits_request_timeout() {
    let endpoint = endpoint();
    let observer = timed_observer(
        &endpoint,
        SessionConfiguration::new().timeout_for_request(units(&endpoint, 30)),
    );
    let request = Request::parse(&endpoint.url("/redirect-to?url=%2Fdelay%2F10"))
        .expect("request");

    let result = observer.run_data_task_with_timeout(request, Some(units(&endpoint, 5)));

    assert_eq!(result, Err(RunError::Transport(SessionError::TimedOut)));
    let log = observer.event_log();
    let redirect = log
        .named("taskWillPerformHTTPRedirection")
        .next()
        .and_then(|event| event.request())
        .expect("redirect proposal");
    assert_eq!(redirect.timeout, Some(units(&endpoint, 5)));
}
