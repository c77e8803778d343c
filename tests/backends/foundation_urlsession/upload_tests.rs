//! Request bodies: upload progress and body stream replacement.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use foundation_testing::http::EchoServer;
use foundation_testing::session::EventParameter;
use foundation_testing::{json_path, RunError};
use foundation_urlsession::{BodyStream, Completion, Method, Request, SessionError, SessionTask};
use tracing_test::traced_test;

use super::support::{observer, TIME_UNIT};

/// WHY: Upload progress is reported per written slice with running totals
/// WHAT: A 40000 byte body reports increasing totals ending at the body length
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_send_progress_reports_totals() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();
    let body = vec![b'a'; 40_000];

    observer
        .run_data_task(
            Request::parse(&server.url("/post"))
                .expect("request")
                .with_method(Method::Post)
                .with_header("Content-Type", "text/plain")
                .with_body(body.clone()),
        )
        .expect("upload settles");

    let log = observer.event_log();
    let progress: Vec<Vec<u64>> = log
        .named("taskDidSendBodyData")
        .map(|event| event.counts())
        .collect();

    assert!(progress.len() > 1);
    assert_eq!(progress.iter().map(|counts| counts[0]).sum::<u64>(), 40_000);
    assert_eq!(progress.last().map(|counts| counts[1]), Some(40_000));
    assert!(progress.windows(2).all(|pair| pair[0][1] < pair[1][1]));
    assert_eq!(
        observer.json_value(&json_path!["data"]).and_then(|data| data.as_str().map(str::len)),
        Some(body.len())
    );
    assert_eq!(
        observer.event_log().first().map(|event| event.name.clone()),
        Some("taskDidSendBodyData".to_string())
    );
}

/// WHY: A consumed stream body cannot be replayed on a 307
/// WHAT: The hook supplies a fresh stream whose content reaches the target
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_body_stream_replaced_on_temporary_redirect() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();
    let asked = Arc::new(AtomicUsize::new(0));

    let asked_clone = Arc::clone(&asked);
    observer.on_need_new_body_stream(
        move |_task: &SessionTask, completion: Completion<Option<BodyStream>>| {
            asked_clone.fetch_add(1, Ordering::SeqCst);
            completion.complete(Some(BodyStream::new(Cursor::new(b"second=stream".to_vec()))));
        },
    );

    let request = Request::parse(&server.url("/redirect-to?url=%2Fpost&status_code=307"))
        .expect("request")
        .with_method(Method::Post)
        .with_body_stream(BodyStream::from_bytes(b"first=stream".to_vec()));

    observer.run_data_task(request).expect("redirected upload settles");

    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert_eq!(
        observer.json_string(&json_path!["form", "second"]).as_deref(),
        Some("stream")
    );
    let log = observer.event_log();
    assert_eq!(log.count("taskWillPerformHTTPRedirection"), 1);
    assert_eq!(log.count("taskNeedNewBodyStream"), 1);
    assert!(log
        .named("taskDidSendBodyData")
        .all(|event| matches!(
            event.parameters.last(),
            Some(EventParameter::ExpectedCount(None))
        )));
}

/// WHY: Without a replacement stream the redirect cannot be followed
/// WHAT: The default hook answers `None` and the task fails
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_missing_body_stream_fails_task() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();

    let request = Request::parse(&server.url("/redirect-to?url=%2Fpost&status_code=307"))
        .expect("request")
        .with_method(Method::Post)
        .with_body_stream(BodyStream::from_bytes(b"only=once".to_vec()));

    let result = observer.run_data_task(request);

    assert_eq!(
        result,
        Err(RunError::Transport(SessionError::BodyStreamUnavailable))
    );
    assert_eq!(
        observer.collapsed_event_sequence(),
        "taskDidSendBodyData,taskWillPerformHTTPRedirection,taskNeedNewBodyStream,taskDidComplete"
    );
}
