//! Redirect interception scenarios.

use std::sync::{Arc, Mutex};

use foundation_testing::session::block_redirects_hook;
use foundation_testing::{json_path, RunError};
use foundation_urlsession::{
    Completion, Request, Response, SessionConfiguration, SessionError, SessionTask,
};
use tracing_test::traced_test;

use super::support::{endpoint, observer, observer_with};

/// WHY: Every hop of a chain must pass through the redirect hook
/// WHAT: `/redirect/4` logs four redirections and lands on `/get`
#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_redirect_chain_is_counted() {
    let endpoint = endpoint();
    let observer = observer();

    observer
        .run_url(&endpoint.url("/redirect/4"))
        .expect("redirect chain settles");

    let log = observer.event_log();
    assert_eq!(log.count("taskWillPerformHTTPRedirection"), 4);
    assert_eq!(
        observer.json_string(&json_path!["url"]),
        Some(endpoint.url("/get"))
    );
    assert!(log
        .named("taskWillPerformHTTPRedirection")
        .all(|event| event.response().and_then(|r| r.status_code()) == Some(302)));
}

/// WHY: A hook may substitute its own request for the proposed one
/// WHAT: Redirect rewritten to `/get?modified_url=yup` is the one followed
#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_redirect_can_be_modified() {
    let endpoint = endpoint();
    let observer = observer();
    let modified = endpoint.url("/get?modified_url=yup");

    let target = modified.clone();
    observer.on_redirect(
        move |_task: &SessionTask,
              _response: &Response,
              _proposed: Request,
              completion: Completion<Option<Request>>| {
            completion.complete(Request::parse(&target).ok());
        },
    );

    observer
        .run_url(&endpoint.url("/redirect/1"))
        .expect("redirect settles");

    assert_eq!(
        observer.json_string(&json_path!["args", "modified_url"]).as_deref(),
        Some("yup")
    );
    assert_eq!(observer.json_string(&json_path!["url"]), Some(modified));
}

/// WHY: Blocking a redirect delivers the 3xx itself, in a fixed order
/// WHAT: Sequence is redirect, response, completion with a 302 response
#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_blocked_redirect_delivers_redirect_response() {
    let endpoint = endpoint();
    let observer = observer();
    observer.update_hooks(|hooks| hooks.redirect = Some(block_redirects_hook()));

    observer
        .run_url(&endpoint.url("/status/302"))
        .expect("blocked redirect settles");

    assert_eq!(
        observer.event_sequence(),
        "taskWillPerformHTTPRedirection,dataTaskDidReceiveResponse,taskDidComplete"
    );
    assert_eq!(observer.response().and_then(|r| r.status_code()), Some(302));
    assert_eq!(observer.error(), None);
}

/// WHY: The proposed request is visible to the hook before it is followed
/// WHAT: Records proposed urls and the redirect response's Location
#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_redirect_hook_sees_proposal() {
    let endpoint = endpoint();
    let observer = observer();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = Arc::clone(&seen);
    observer.on_redirect(
        move |_task: &SessionTask,
              response: &Response,
              proposed: Request,
              completion: Completion<Option<Request>>| {
            seen_clone.lock().expect("lock").push((
                response.header("Location").map(str::to_string),
                proposed.url.path().to_string(),
            ));
            completion.complete(Some(proposed));
        },
    );

    observer
        .run_url(&endpoint.url("/redirect/2"))
        .expect("redirect settles");

    assert_eq!(
        *seen.lock().expect("lock"),
        vec![
            (Some("/redirect/1".to_string()), "/redirect/1".to_string()),
            (Some("/get".to_string()), "/get".to_string()),
        ]
    );
}

#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_too_many_redirects() {
    let endpoint = endpoint();
    let observer = observer_with(SessionConfiguration::new().maximum_redirects(2));

    let result = observer.run_url(&endpoint.url("/redirect/3"));

    assert_eq!(result, Err(RunError::Transport(SessionError::TooManyRedirects)));
    assert_eq!(observer.event_log().count("taskWillPerformHTTPRedirection"), 2);
}
