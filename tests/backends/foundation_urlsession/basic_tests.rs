//! Plain request scenarios: echoed urls, bodies, decoding and `data:` urls.

use foundation_testing::json_path;
use foundation_urlsession::{Method, Request};
use serde_json::json;
use tracing_test::traced_test;

use super::support::{endpoint, observer};

/// WHY: The echoed url proves the request reached the server unchanged
/// WHAT: GET with a query echoes the full url and the query args
#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_get_echoes_url() {
    let endpoint = endpoint();
    let observer = observer();
    let url = endpoint.url("/get?capital=Kathmandu&country=Nepal");

    observer.run_url(&url).expect("GET settles");

    assert_eq!(observer.json_string(&json_path!["url"]), Some(url));
    assert_eq!(
        observer.json_string(&json_path!["args", "capital"]).as_deref(),
        Some("Kathmandu")
    );
    assert_eq!(observer.error(), None);
    assert_eq!(observer.response().and_then(|r| r.status_code()), Some(200));
    assert_eq!(
        observer.collapsed_event_sequence(),
        "dataTaskDidReceiveResponse,dataTaskDidReceiveData,dataTaskWillCacheResponse,taskDidComplete"
    );
}

/// WHY: A body without a content type is sent as a form
/// WHAT: POST of `foo=bar` arrives as form data with the default content type
#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_post_defaults_to_form_content_type() {
    let endpoint = endpoint();
    let observer = observer();
    let request = Request::parse(&endpoint.url("/post"))
        .expect("request")
        .with_method(Method::Post)
        .with_body(b"foo=bar&baz=qux".to_vec());

    observer.run_data_task(request).expect("POST settles");

    assert_eq!(
        observer
            .json_string(&json_path!["headers", "Content-Type"])
            .as_deref(),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(
        observer.json_string(&json_path!["form", "foo"]).as_deref(),
        Some("bar")
    );
    assert_eq!(
        observer.json_string(&json_path!["data"]).as_deref(),
        Some("foo=bar&baz=qux")
    );
}

/// WHY: A single pair form body is readable through a nested path
/// WHAT: POST of `something=happening` echoes `form.something`
#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_post_single_form_field() {
    let endpoint = endpoint();
    let observer = observer();
    let request = Request::parse(&endpoint.url("/post"))
        .expect("request")
        .with_method(Method::Post)
        .with_body(b"something=happening".to_vec());

    observer.run_data_task(request).expect("POST settles");

    assert_eq!(
        observer
            .json_string(&json_path!["form", "something"])
            .as_deref(),
        Some("happening")
    );
    assert_eq!(observer.error(), None);
}

#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_post_keeps_explicit_content_type() {
    let endpoint = endpoint();
    let observer = observer();
    let request = Request::parse(&endpoint.url("/post"))
        .expect("request")
        .with_method(Method::Post)
        .with_header("Content-Type", "application/json")
        .with_body(br#"{"items": [1, 2, 3], "name": "session"}"#.to_vec());

    observer.run_data_task(request).expect("POST settles");

    assert_eq!(
        observer
            .json_string(&json_path!["headers", "Content-Type"])
            .as_deref(),
        Some("application/json")
    );
    assert_eq!(observer.json_value(&json_path!["json", "items", 2]), Some(json!(3)));
    assert_eq!(
        observer.json_string(&json_path!["json", "name"]).as_deref(),
        Some("session")
    );
}

/// WHY: Compressed bodies reach the observer already decoded
/// WHAT: `/gzip` and `/deflate` decode into JSON documents
#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_compressed_bodies_are_decoded() {
    let endpoint = endpoint();

    let gzip = observer();
    gzip.run_url(&endpoint.url("/gzip")).expect("gzip settles");
    assert_eq!(gzip.json_bool(&json_path!["gzipped"]), Some(true));

    let deflate = observer();
    deflate.run_url(&endpoint.url("/deflate")).expect("deflate settles");
    assert_eq!(deflate.json_bool(&json_path!["deflated"]), Some(true));
}

#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_data_urls() {
    let plain = observer();
    plain.run_url("data:,Hello%2C%20World!").expect("data url settles");
    assert_eq!(plain.received_string().as_deref(), Some("Hello, World!"));
    let response = plain.response().expect("response");
    assert_eq!(response.mime_type.as_deref(), Some("text/plain"));
    assert_eq!(response.status_code(), None);

    let encoded = observer();
    encoded
        .run_url("data:application/json;base64,eyJuYW1lIjoiZGF0YSJ9")
        .expect("data url settles");
    assert_eq!(encoded.json_string(&json_path!["name"]).as_deref(), Some("data"));
    assert_eq!(
        encoded.event_sequence(),
        "dataTaskDidReceiveResponse,dataTaskDidReceiveData,taskDidComplete"
    );
}

/// WHY: HTTP error statuses are responses, not transport errors
/// WHAT: A missing route yields a 404 as the first event and no error
#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_not_found_is_first_event() {
    let endpoint = endpoint();
    let observer = observer();

    observer
        .run_url(&endpoint.url("/this-route-does-not-exist"))
        .expect("404 settles");

    let log = observer.event_log();
    let first = log.first().expect("first event");
    assert_eq!(first.name, "dataTaskDidReceiveResponse");
    assert_eq!(first.response().and_then(|r| r.status_code()), Some(404));
    assert_eq!(log.last().map(|event| event.name.as_str()), Some("taskDidComplete"));
    assert_eq!(observer.error(), None);
    assert_eq!(log.count("dataTaskWillCacheResponse"), 0);
}

/// WHY: Lookups on text bodies must degrade to absent, never fail
/// WHAT: JSON accessors on a non-JSON body return `None` repeatedly
#[test]
#[traced_test]
#[ntest::timeout(10000)]
fn test_json_absence_on_text_body() {
    let observer = observer();
    observer.run_url("data:,plain%20text").expect("data url settles");

    assert_eq!(observer.received_string().as_deref(), Some("plain text"));
    assert_eq!(observer.received_json(), None);
    assert_eq!(observer.json_string(&json_path!["url"]), None);
    assert_eq!(observer.json_bool(&json_path!["url"]), None);
    assert_eq!(observer.json_string(&json_path!["url"]), None);
}

/// WHY: Received bytes are the concatenation of every data chunk
/// WHAT: Compares accumulated bytes with the logged chunks of a large body
#[test]
#[traced_test]
#[ntest::timeout(20000)]
fn test_received_data_matches_logged_chunks() {
    let endpoint = endpoint();
    let observer = observer();
    observer
        .run_url(&endpoint.url("/bytes/65536"))
        .expect("bytes settle");

    let log = observer.event_log();
    let logged: Vec<u8> = log
        .named("dataTaskDidReceiveData")
        .filter_map(|event| event.data())
        .flatten()
        .copied()
        .collect();

    let received = observer.received_data().expect("bytes received");
    assert_eq!(received.len(), 65536);
    assert_eq!(received, logged);
    assert_eq!(observer.received_data(), Some(received));
}
