//! Response dispositions, cache proposals and the completion-handler path.

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use foundation_testing::http::EchoServer;
use foundation_testing::json_path;
use foundation_testing::session::response_disposition_hook;
use foundation_testing::{RunError, SessionObserver};
use foundation_urlsession::{
    CachedResponse, Completion, Request, ResponseDisposition, SessionConfiguration, SessionError,
    SessionTask,
};
use serde_json::Value;
use tracing_test::traced_test;

use super::support::{observer, observer_with, TIME_UNIT};

/// WHY: A data task can hand its body over to a download
/// WHAT: BecomeDownload writes the body to a file read back by the observer
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_become_download() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();
    observer.update_hooks(|hooks| {
        hooks.response = Some(response_disposition_hook(ResponseDisposition::BecomeDownload));
    });
    let handed_over = Arc::new(Mutex::new(None));
    let handed_over_clone = Arc::clone(&handed_over);
    observer.on_become_download_task(move |original: &SessionTask, download: &SessionTask| {
        *handed_over_clone.lock().expect("lock") =
            Some((original.task_identifier(), download.task_identifier()));
    });

    observer
        .run_url(&server.url("/get?kind=download"))
        .expect("download settles");

    assert_eq!(
        observer.collapsed_event_sequence(),
        "dataTaskDidReceiveResponse,dataTaskDidBecomeDownloadTask,downloadTaskDidWriteData,\
         downloadTaskDidFinishDownloading,taskDidComplete"
    );
    assert_eq!(observer.received_data(), None);

    let downloaded = observer.downloaded_data().expect("downloaded file");
    let document: Value = serde_json::from_slice(&downloaded).expect("json download");
    assert_eq!(document["args"]["kind"], "download");

    let log = observer.event_log();
    let written: u64 = log
        .named("downloadTaskDidWriteData")
        .filter_map(|event| event.counts().first().copied())
        .sum();
    assert_eq!(written, downloaded.len() as u64);

    let converted = log
        .named("dataTaskDidBecomeDownloadTask")
        .next()
        .expect("conversion event");
    let original = converted.task().expect("data task");
    let completed = log.last().and_then(|event| event.task()).expect("completed task");
    assert_ne!(original.task_identifier(), completed.task_identifier());
    assert_eq!(
        *handed_over.lock().expect("lock"),
        Some((original.task_identifier(), completed.task_identifier()))
    );
}

/// WHY: A data task can hand its connection over as a pair of streams
/// WHAT: BecomeStream yields streams whose input carries the unread body
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_become_stream() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();
    observer.update_hooks(|hooks| {
        hooks.response = Some(response_disposition_hook(ResponseDisposition::BecomeStream));
    });
    let converted = Arc::new(Mutex::new(0_usize));
    let converted_clone = Arc::clone(&converted);
    observer.on_become_stream_task(move |_original: &SessionTask, _stream: &SessionTask| {
        *converted_clone.lock().expect("lock") += 1;
    });

    observer
        .run_url(&server.url("/get?kind=stream"))
        .expect("stream conversion settles");

    assert_eq!(
        observer.event_sequence(),
        "dataTaskDidReceiveResponse,dataTaskDidBecomeStreamTask,streamTaskDidBecomeStreams,taskDidComplete"
    );

    let mut streams = observer.take_streams().expect("streams kept");
    let mut body = String::new();
    streams.input.read_to_string(&mut body).expect("read body");
    let document: Value = serde_json::from_str(&body).expect("json body");
    assert_eq!(document["args"]["kind"], "stream");
    assert!(observer.take_streams().is_none());
    assert_eq!(*converted.lock().expect("lock"), 1);
}

#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_response_cancel_fails_task() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();
    observer.update_hooks(|hooks| {
        hooks.response = Some(response_disposition_hook(ResponseDisposition::Cancel));
    });

    let result = observer.run_url(&server.url("/get"));

    assert_eq!(result, Err(RunError::Transport(SessionError::Cancelled)));
    assert_eq!(
        observer.event_sequence(),
        "dataTaskDidReceiveResponse,taskDidComplete"
    );
}

/// WHY: An accepted cache proposal lands in the session cache
/// WHAT: Default hook stores the proposal; its data equals the received body
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_cache_proposal_accepted() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();
    let url = server.url("/get?cache=yes");

    observer.run_url(&url).expect("GET settles");

    let key = Request::parse(&url).expect("request").url;
    let cached = observer
        .session()
        .url_cache()
        .cached_response(&key)
        .expect("cached response");
    assert_eq!(Some(cached.data), observer.received_data());
    assert_eq!(cached.response.status_code(), Some(200));
    assert_eq!(observer.event_log().count("dataTaskWillCacheResponse"), 1);
}

#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_cache_proposal_rejected() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();
    observer.on_will_cache_response(
        |_task: &SessionTask,
         _proposed: CachedResponse,
         completion: Completion<Option<CachedResponse>>| completion.complete(None),
    );

    observer.run_url(&server.url("/get")).expect("GET settles");

    assert!(observer.session().url_cache().is_empty());
    assert_eq!(observer.event_log().count("dataTaskWillCacheResponse"), 1);
}

#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_cache_disabled_skips_proposal() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer_with(SessionConfiguration::new().url_cache(false));

    observer.run_url(&server.url("/get")).expect("GET settles");

    assert_eq!(observer.event_log().count("dataTaskWillCacheResponse"), 0);
    assert!(observer.session().url_cache().is_empty());
}

/// WHY: Both call conventions must observe the same exchange
/// WHAT: Delegate and completion-handler runs agree on body and status
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_completion_handler_parity() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let url = server.url("/get?parity=1");

    let delegate_run = observer();
    delegate_run.run_url(&url).expect("delegate run settles");

    let handler_run = observer();
    handler_run
        .run_data_task_with_completion_handler(Request::parse(&url).expect("request"))
        .expect("handler run settles");

    assert_eq!(
        delegate_run.json_string(&json_path!["args", "parity"]),
        handler_run.json_string(&json_path!["args", "parity"])
    );
    assert_eq!(
        delegate_run.response().and_then(|r| r.status_code()),
        handler_run.response().and_then(|r| r.status_code())
    );
    assert_eq!(handler_run.event_sequence(), "");
}

#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_completion_handler_still_sees_redirects() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();

    observer
        .run_data_task_with_completion_handler(
            Request::parse(&server.url("/redirect/2")).expect("request"),
        )
        .expect("handler run settles");

    assert_eq!(
        observer.event_sequence(),
        "taskWillPerformHTTPRedirection,taskWillPerformHTTPRedirection"
    );
    assert_eq!(observer.json_string(&json_path!["url"]), Some(server.url("/get")));
}

/// WHY: A cleared decision hook must surface as a stall, not a hang
/// WHAT: With no response hook the runner reports Stalled and the task ends cancelled
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_cleared_hook_stalls_task() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = SessionObserver::new(
        SessionConfiguration::new().timeout_for_request(Duration::from_millis(500)),
    )
    .expect("observer")
    .with_grace_margin(Duration::from_millis(500));
    observer.update_hooks(|hooks| hooks.response = None);

    let result = observer.run_data_task_with_timeout(
        Request::parse(&server.url("/get")).expect("request"),
        Some(Duration::from_millis(500)),
    );

    assert_eq!(
        result,
        Err(RunError::Stalled {
            waited: Duration::from_secs(1)
        })
    );
    assert!(observer.received_data().is_none());
    assert_eq!(
        observer.event_log().first().map(|event| event.name.clone()),
        Some("dataTaskDidReceiveResponse".to_string())
    );
}
