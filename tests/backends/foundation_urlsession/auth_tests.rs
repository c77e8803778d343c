//! Authentication challenge scenarios.

use std::sync::Arc;

use foundation_testing::http::{EchoServer, DIGEST_REALM, FAKE_REALM};
use foundation_testing::session::{credential_retry_hook, AuthRetry};
use foundation_testing::{json_path, RunError, SessionObserver};
use foundation_urlsession::{
    AuthChallenge, AuthenticationMethod, ChallengeDisposition, ChallengeResolution, Completion,
    Credential, SessionError, SessionTask,
};
use tracing_test::traced_test;

use super::support::{endpoint, observer, TIME_UNIT};

fn wrong() -> Credential {
    Credential::new("user", "wrong")
}

fn right() -> Credential {
    Credential::new("user", "passwd")
}

/// WHY: The retry law answers with wrong credentials `tries - 1` times
/// WHAT: With one try the right credential is used at once
#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_basic_auth_single_try() {
    let endpoint = endpoint();
    let observer = observer();
    let retry = AuthRetry::new(1);
    observer.update_hooks(|hooks| {
        hooks.task_challenge = Some(credential_retry_hook(retry.clone(), wrong(), right()));
    });

    observer
        .run_url(&endpoint.url("/basic-auth/user/passwd"))
        .expect("auth settles");

    assert_eq!(observer.json_bool(&json_path!["authenticated"]), Some(true));
    assert_eq!(retry.remaining(), 1);
    assert_eq!(retry.challenges(), 1);
    assert_eq!(observer.event_log().count("taskDidReceiveChallenge"), 1);
}

/// WHY: Failed attempts must be retried until the budget is spent
/// WHAT: Three tries mean three challenges, failure counts 0..2, then success
#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_basic_auth_retries_until_right() {
    let endpoint = endpoint();
    let observer = observer();
    let retry = AuthRetry::new(3);
    observer.update_hooks(|hooks| {
        hooks.task_challenge = Some(credential_retry_hook(retry.clone(), wrong(), right()));
    });

    observer
        .run_url(&endpoint.url("/basic-auth/user/passwd"))
        .expect("auth settles");

    assert_eq!(observer.json_bool(&json_path!["authenticated"]), Some(true));
    assert_eq!(retry.remaining(), 1);
    assert_eq!(retry.challenges(), 3);

    let log = observer.event_log();
    let failures: Vec<usize> = log
        .named("taskDidReceiveChallenge")
        .filter_map(|event| event.challenge())
        .map(|challenge| challenge.previous_failure_count)
        .collect();
    assert_eq!(failures, vec![0, 1, 2]);
}

/// Runs the retry law against the local digest route; `path` names qop, user and password.
fn run_digest_retry(tries: usize, path: &str) -> (SessionObserver, Arc<AuthRetry>) {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();
    let retry = AuthRetry::new(tries);
    observer.update_hooks(|hooks| {
        hooks.task_challenge = Some(credential_retry_hook(retry.clone(), wrong(), right()));
    });

    observer.run_url(&server.url(path)).expect("digest auth settles");
    (observer, retry)
}

/// WHY: Digest challenges follow the same retry law as Basic
/// WHAT: One try answers the first digest challenge with the right credential
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_digest_auth_single_try() {
    let (observer, retry) = run_digest_retry(1, "/digest-auth/auth/user/passwd");

    assert_eq!(observer.json_bool(&json_path!["authenticated"]), Some(true));
    assert_eq!(observer.json_string(&json_path!["user"]).as_deref(), Some("user"));
    assert_eq!(retry.remaining(), 1);
    assert_eq!(retry.challenges(), 1);

    let log = observer.event_log();
    let challenge = log
        .first()
        .and_then(|event| event.challenge())
        .expect("challenge event first");
    assert_eq!(
        challenge.protection_space.authentication_method,
        AuthenticationMethod::HttpDigest
    );
    assert_eq!(challenge.protection_space.realm.as_deref(), Some(DIGEST_REALM));
}

/// WHY: Each wrong digest answer is met with a fresh challenge
/// WHAT: Three tries mean three challenges with failure counts 0..2, then success
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_digest_auth_retries_until_right() {
    let (observer, retry) = run_digest_retry(3, "/digest-auth/auth/user/passwd");

    assert_eq!(observer.json_bool(&json_path!["authenticated"]), Some(true));
    assert_eq!(retry.remaining(), 1);
    assert_eq!(retry.challenges(), 3);
    let log = observer.event_log();
    let failures: Vec<usize> = log
        .named("taskDidReceiveChallenge")
        .filter_map(|event| event.challenge())
        .map(|challenge| challenge.previous_failure_count)
        .collect();
    assert_eq!(failures, vec![0, 1, 2]);
}

#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_digest_auth_sha256() {
    let (observer, retry) = run_digest_retry(2, "/digest-auth/auth/user/passwd/SHA-256");

    assert_eq!(observer.json_bool(&json_path!["authenticated"]), Some(true));
    assert_eq!(retry.challenges(), 2);
}

/// WHY: Default handling without credentials leaves the 401 to the caller
/// WHAT: The challenge names the realm and the 401 is delivered as a response
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_default_handling_delivers_unauthorized() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();

    observer
        .run_url(&server.url("/basic-auth/user/passwd"))
        .expect("auth settles");

    let log = observer.event_log();
    let challenge = log
        .first()
        .and_then(|event| event.challenge())
        .expect("challenge event first");
    assert_eq!(challenge.protection_space.realm.as_deref(), Some(FAKE_REALM));
    assert_eq!(
        challenge.protection_space.authentication_method,
        AuthenticationMethod::HttpBasic
    );
    assert_eq!(observer.response().and_then(|r| r.status_code()), Some(401));
    assert_eq!(observer.error(), None);
}

/// WHY: Credentials in the url are used by default handling
/// WHAT: `user:passwd@` authenticates without any hook
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_default_handling_uses_url_credentials() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();
    let url = server
        .url("/basic-auth/user/passwd")
        .replacen("http://", "http://user:passwd@", 1);

    observer.run_url(&url).expect("auth settles");

    assert_eq!(observer.json_bool(&json_path!["authenticated"]), Some(true));
    assert_eq!(observer.event_log().count("taskDidReceiveChallenge"), 1);
}

#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_cancelled_challenge_fails_task() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();
    observer.on_task_challenge(
        |_task: &SessionTask,
         _challenge: &AuthChallenge,
         completion: Completion<ChallengeResolution>| {
            completion.complete((ChallengeDisposition::CancelAuthenticationChallenge, None));
        },
    );

    let result = observer.run_url(&server.url("/basic-auth/user/passwd"));

    assert_eq!(result, Err(RunError::Transport(SessionError::Cancelled)));
    assert_eq!(
        observer.event_sequence(),
        "taskDidReceiveChallenge,taskDidComplete"
    );
}

/// WHY: Connection-level schemes are challenged on the session
/// WHAT: A Negotiate 401 goes to `didReceiveChallenge`, then the 401 is delivered
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_negotiate_is_a_session_challenge() {
    let server = EchoServer::with_time_unit(TIME_UNIT);
    let observer = observer();

    observer
        .run_url(&server.url("/negotiate"))
        .expect("negotiate settles");

    assert_eq!(
        observer.event_sequence(),
        "didReceiveChallenge,dataTaskDidReceiveResponse,taskDidComplete"
    );
    let log = observer.event_log();
    let challenge = log
        .first()
        .and_then(|event| event.challenge())
        .expect("challenge");
    assert_eq!(
        challenge.protection_space.authentication_method,
        AuthenticationMethod::Negotiate
    );
    assert_eq!(observer.response().and_then(|r| r.status_code()), Some(401));
}
