//! Session invalidation ordering.

use std::sync::Arc;
use std::time::Duration;

use foundation_testing::http::EchoServer;
use foundation_testing::SessionObserver;
use foundation_urlsession::{CompletionLatch, SessionError, SessionId, TaskState};
use tracing_test::traced_test;

use super::support::{observer, TIME_UNIT};

fn latch_on_invalid(observer: &SessionObserver) -> Arc<CompletionLatch> {
    let latch = Arc::new(CompletionLatch::new());
    let signal = Arc::clone(&latch);
    observer.on_become_invalid(move |_session: SessionId, _error: Option<&SessionError>| {
        signal.signal();
    });
    latch
}

/// WHY: Invalidation is announced only after outstanding work finished
/// WHAT: finish-and-invalidate ends the log with `didBecomeInvalid`
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_finish_tasks_and_invalidate() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();
    let invalid = latch_on_invalid(&observer);

    observer.run_url(&server.url("/get")).expect("GET settles");
    observer.session().finish_tasks_and_invalidate();

    assert!(invalid.wait_timeout(Duration::from_secs(5)));
    let log = observer.event_log();
    assert_eq!(log.last().map(|event| event.name.as_str()), Some("didBecomeInvalid"));
    assert_eq!(log.count("didBecomeInvalid"), 1);
    assert!(log.last().and_then(|event| event.error()).is_none());
    assert_eq!(
        observer.session().data_task_with_url(&server.url("/get")).err(),
        Some(SessionError::SessionInvalidated)
    );
}

/// WHY: An in-flight task must finish before invalidation is reported
/// WHAT: finish-and-invalidate during a delayed request waits for its completion
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_finish_waits_for_running_task() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();
    let invalid = latch_on_invalid(&observer);

    let task = observer
        .session()
        .data_task_with_url(&server.url("/delay/3"))
        .expect("task");
    task.resume();
    observer.session().finish_tasks_and_invalidate();

    assert!(invalid.wait_timeout(Duration::from_secs(5)));
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(observer.error(), None);
    assert!(observer
        .collapsed_event_sequence()
        .ends_with("taskDidComplete,didBecomeInvalid"));
}

/// WHY: Cancelling invalidation still reports each task before the session
/// WHAT: invalidate-and-cancel yields a cancelled completion, then `didBecomeInvalid`
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_invalidate_and_cancel() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();
    let invalid = latch_on_invalid(&observer);

    let task = observer
        .session()
        .data_task_with_url(&server.url("/delay/20"))
        .expect("task");
    task.resume();
    observer.session().invalidate_and_cancel();

    assert!(invalid.wait_timeout(Duration::from_secs(5)));
    assert_eq!(
        observer.event_sequence(),
        "taskDidComplete,didBecomeInvalid"
    );
    assert_eq!(observer.error(), Some(SessionError::Cancelled));
    assert!(observer.session().all_tasks().is_empty());
}
