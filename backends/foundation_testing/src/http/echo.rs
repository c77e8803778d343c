//! httpbin-style echo routes on top of `TestHttpServer`.
//!
//! WHY: Session scenarios assert on what the server saw (url, headers, form,
//! json) and need redirects, auth challenges, delays and drips on demand.
//!
//! WHAT: `EchoServer` answering the subset of httpbin routes the scenarios use,
//! and `EchoEndpoint` which points scenarios at either a local `EchoServer` or
//! an external httpbin named by the `HTTPBIN_ENDPOINT` environment variable.
//!
//! HOW: A pure `route` function maps an `HttpRequest` to an `HttpResponse`;
//! time based routes multiply their arguments by a configurable time unit.

use std::io::Write;
use std::time::Duration;

use base64::Engine;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use foundation_urlsession::{auth_params, DigestAlgorithm};
use serde_json::{json, Map, Value};

use super::server::{reason_phrase, HttpRequest, HttpResponse, TestHttpServer};

/// Environment variable naming an external httpbin base URL.
pub const HTTPBIN_ENDPOINT_ENV: &str = "HTTPBIN_ENDPOINT";

/// Realm announced by `/basic-auth` challenges.
pub const FAKE_REALM: &str = "Fake Realm";

/// Realm announced by `/digest-auth` challenges, as httpbin does.
pub const DIGEST_REALM: &str = "me@kennethreitz.com";

/// Upper bound for `/drip` and `/delay` arguments, in time units.
const MAX_TIME_UNITS: f64 = 60.0;

/// Local httpbin look-alike.
#[derive(Debug)]
pub struct EchoServer {
    server: TestHttpServer,
    time_unit: Duration,
}

impl EchoServer {
    /// Starts an echo server where one time unit is one second, as with httpbin.
    #[must_use]
    pub fn start() -> Self {
        Self::with_time_unit(Duration::from_secs(1))
    }

    /// Starts an echo server scaling `/delay` and `/drip` by `time_unit`.
    #[must_use]
    pub fn with_time_unit(time_unit: Duration) -> Self {
        let server = TestHttpServer::with_response(move |request| route(request, time_unit));
        Self { server, time_unit }
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        self.server.url(path)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.server.base_url()
    }

    #[must_use]
    pub fn time_unit(&self) -> Duration {
        self.time_unit
    }
}

/// Where scenarios send their requests.
#[derive(Debug)]
pub enum EchoEndpoint {
    Local(EchoServer),
    Remote(String),
}

impl EchoEndpoint {
    /// Uses `HTTPBIN_ENDPOINT` when set, otherwise starts a local server with `time_unit`.
    ///
    /// A remote httpbin always works in seconds.
    #[must_use]
    pub fn from_env(time_unit: Duration) -> Self {
        match std::env::var(HTTPBIN_ENDPOINT_ENV) {
            Ok(endpoint) if !endpoint.trim().is_empty() => {
                tracing::info!("Using external httpbin at {}", endpoint);
                Self::Remote(endpoint.trim().trim_end_matches('/').to_string())
            }
            _ => Self::Local(EchoServer::with_time_unit(time_unit)),
        }
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        match self {
            Self::Local(server) => server.url(path),
            Self::Remote(base) => format!("{base}{path}"),
        }
    }

    #[must_use]
    pub fn time_unit(&self) -> Duration {
        match self {
            Self::Local(server) => server.time_unit(),
            Self::Remote(_) => Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// Maps a request onto its echo response.
#[must_use]
pub fn route(request: &HttpRequest, time_unit: Duration) -> HttpResponse {
    let segments: Vec<&str> = request
        .path
        .trim_start_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    match segments.as_slice() {
        ["get"] => method_guard(request, &["GET", "HEAD"], || {
            HttpResponse::json(&echo_document(request, false))
        }),
        ["post"] => method_guard(request, &["POST"], || {
            HttpResponse::json(&echo_document(request, true))
        }),
        ["put"] => method_guard(request, &["PUT"], || {
            HttpResponse::json(&echo_document(request, true))
        }),
        ["patch"] => method_guard(request, &["PATCH"], || {
            HttpResponse::json(&echo_document(request, true))
        }),
        ["delete"] => method_guard(request, &["DELETE"], || {
            HttpResponse::json(&echo_document(request, true))
        }),
        ["anything", ..] => {
            let mut document = echo_document(request, true);
            document["method"] = Value::String(request.method.clone());
            HttpResponse::json(&document)
        }
        ["status", code] => status_route(code),
        ["redirect", hops] => match hops.parse::<u32>() {
            Ok(hops) if hops > 1 => HttpResponse::redirect(&format!("/redirect/{}", hops - 1)),
            Ok(_) => HttpResponse::redirect("/get"),
            Err(_) => not_found(),
        },
        ["redirect-to"] => redirect_to(request),
        ["basic-auth", user, password] => basic_auth(request, user, password),
        ["digest-auth", qop, user, password] => {
            digest_auth(request, qop, user, password, DigestAlgorithm::Md5)
        }
        ["digest-auth", qop, user, password, algorithm] => {
            match DigestAlgorithm::from_token(algorithm) {
                Some(algorithm) => digest_auth(request, qop, user, password, algorithm),
                None => not_found(),
            }
        }
        ["negotiate"] => HttpResponse::status(401, reason_phrase(401))
            .with_header("WWW-Authenticate", "Negotiate"),
        ["delay", units] => match parse_units(units) {
            Some(units) => HttpResponse::json(&echo_document(request, false))
                .with_delay(time_unit.mul_f64(units)),
            None => not_found(),
        },
        ["drip"] => drip(request, time_unit),
        ["gzip"] => compressed(request, "gzip"),
        ["deflate"] => compressed(request, "deflate"),
        ["bytes", count] => match count.parse::<usize>() {
            Ok(count) => {
                let mut bytes = vec![0u8; count.min(100 * 1024)];
                fastrand::fill(&mut bytes);
                HttpResponse::status(200, "OK")
                    .with_header("Content-Type", "application/octet-stream")
                    .with_body(bytes)
            }
            Err(_) => not_found(),
        },
        _ => not_found(),
    }
}

fn not_found() -> HttpResponse {
    HttpResponse::status(404, reason_phrase(404))
        .with_header("Content-Type", "text/html")
        .with_body(b"<h1>Not Found</h1>".to_vec())
}

fn method_guard(
    request: &HttpRequest,
    allowed: &[&str],
    respond: impl FnOnce() -> HttpResponse,
) -> HttpResponse {
    if allowed
        .iter()
        .any(|method| method.eq_ignore_ascii_case(&request.method))
    {
        respond()
    } else {
        HttpResponse::status(405, reason_phrase(405)).with_header("Allow", &allowed.join(", "))
    }
}

fn parse_units(raw: &str) -> Option<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|units| units.is_finite() && *units >= 0.0)
        .map(|units| units.min(MAX_TIME_UNITS))
}

/// `content-type` becomes `Content-Type`.
#[must_use]
pub fn title_case(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn multi_map(pairs: impl IntoIterator<Item = (String, String)>) -> Value {
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                map.insert(key, Value::String(value));
            }
        }
    }
    Value::Object(map)
}

fn headers_document(request: &HttpRequest) -> Value {
    let mut map = Map::new();
    for (name, value) in &request.headers {
        map.insert(title_case(name), Value::String(value.clone()));
    }
    Value::Object(map)
}

fn full_url(request: &HttpRequest) -> String {
    let host = request.header("Host").unwrap_or("127.0.0.1");
    format!("http://{host}{}", request.target)
}

fn echo_document(request: &HttpRequest, with_body: bool) -> Value {
    let mut document = json!({
        "args": multi_map(request.query.iter().cloned()),
        "headers": headers_document(request),
        "origin": "127.0.0.1",
        "url": full_url(request),
    });

    if with_body {
        let content_type = request
            .header("Content-Type")
            .unwrap_or_default()
            .to_ascii_lowercase();

        let form = if content_type.starts_with("application/x-www-form-urlencoded") {
            multi_map(url::form_urlencoded::parse(&request.body).into_owned())
        } else {
            json!({})
        };

        let parsed_json = if content_type.starts_with("application/json") {
            serde_json::from_slice::<Value>(&request.body).unwrap_or(Value::Null)
        } else {
            Value::Null
        };

        document["data"] = Value::String(String::from_utf8_lossy(&request.body).into_owned());
        document["files"] = json!({});
        document["form"] = form;
        document["json"] = parsed_json;
    }

    document
}

fn status_route(code: &str) -> HttpResponse {
    let Ok(code) = code.parse::<u16>() else {
        return HttpResponse::status(400, reason_phrase(400));
    };
    if !(100..600).contains(&code) {
        return HttpResponse::status(400, reason_phrase(400));
    }

    let response = HttpResponse::status(code, reason_phrase(code));
    match code {
        301 | 302 | 303 | 305 | 307 => response.with_header("Location", "/redirect/1"),
        401 => response.with_header(
            "WWW-Authenticate",
            &format!("Basic realm=\"{FAKE_REALM}\""),
        ),
        418 => response.with_body(b"I'm a teapot".to_vec()),
        _ => response,
    }
}

fn redirect_to(request: &HttpRequest) -> HttpResponse {
    let Some(target) = request.query_param("url") else {
        return HttpResponse::status(400, reason_phrase(400));
    };

    let status = request
        .query_param("status_code")
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (300..400).contains(code))
        .unwrap_or(302);

    HttpResponse::status(status, reason_phrase(status)).with_header("Location", target)
}

fn basic_auth(request: &HttpRequest, user: &str, password: &str) -> HttpResponse {
    let supplied = request
        .header("Authorization")
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(|encoded| {
            base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .ok()
        })
        .and_then(|decoded| String::from_utf8(decoded).ok());

    if supplied.as_deref() == Some(format!("{user}:{password}").as_str()) {
        HttpResponse::json(&json!({ "authenticated": true, "user": user }))
    } else {
        HttpResponse::status(401, reason_phrase(401))
            .with_header("WWW-Authenticate", &format!("Basic realm=\"{FAKE_REALM}\""))
    }
}

fn digest_auth(
    request: &HttpRequest,
    qop: &str,
    user: &str,
    password: &str,
    algorithm: DigestAlgorithm,
) -> HttpResponse {
    let offered_qop = qop.eq_ignore_ascii_case("auth");
    let params = request
        .header("Authorization")
        .and_then(|value| value.trim().strip_prefix("Digest "))
        .map(auth_params)
        .unwrap_or_default();

    let expected = expected_digest(request, &params, user, password, algorithm, offered_qop);
    let supplied = params
        .iter()
        .find_map(|(key, value)| (key == "response").then_some(value.as_str()));
    if expected.is_some() && expected.as_deref() == supplied {
        return HttpResponse::json(&json!({ "authenticated": true, "user": user }));
    }

    let mut challenge = format!(
        "Digest realm=\"{DIGEST_REALM}\", nonce=\"{:032x}\", opaque=\"{:032x}\", algorithm={}, stale=FALSE",
        fastrand::u128(..),
        fastrand::u128(..),
        algorithm.token()
    );
    if offered_qop {
        challenge.push_str(", qop=\"auth\"");
    }
    HttpResponse::status(401, reason_phrase(401)).with_header("WWW-Authenticate", &challenge)
}

/// Recomputes the digest response from the echoed parameters.
///
/// Nonces are not tracked; any nonce the client echoes is accepted.
fn expected_digest(
    request: &HttpRequest,
    params: &[(String, String)],
    user: &str,
    password: &str,
    algorithm: DigestAlgorithm,
    offered_qop: bool,
) -> Option<String> {
    let param = |name: &str| {
        params
            .iter()
            .find_map(|(key, value)| (key == name).then_some(value.as_str()))
    };

    if param("username")? != user {
        return None;
    }
    let ha1 = algorithm.hash_hex(&format!("{user}:{}:{password}", param("realm")?));
    let ha2 = algorithm.hash_hex(&format!("{}:{}", request.method, param("uri")?));
    let nonce = param("nonce")?;

    match param("qop") {
        Some("auth") if offered_qop => Some(algorithm.hash_hex(&format!(
            "{ha1}:{nonce}:{}:{}:auth:{ha2}",
            param("nc")?,
            param("cnonce")?
        ))),
        Some(_) => None,
        None => Some(algorithm.hash_hex(&format!("{ha1}:{nonce}:{ha2}"))),
    }
}

fn drip(request: &HttpRequest, time_unit: Duration) -> HttpResponse {
    let units = |name: &str, default: f64| {
        request
            .query_param(name)
            .map_or(Some(default), parse_units)
            .unwrap_or(default)
    };

    let duration = units("duration", 2.0);
    let delay = units("delay", 2.0);
    let bytes = request
        .query_param("numbytes")
        .and_then(|count| count.parse::<usize>().ok())
        .unwrap_or(10)
        .clamp(1, 10 * 1024);
    let status = request
        .query_param("code")
        .and_then(|code| code.parse::<u16>().ok())
        .unwrap_or(200);

    #[allow(clippy::cast_precision_loss)]
    let pause = time_unit.mul_f64(duration / bytes as f64);

    let mut response = HttpResponse::status(status, reason_phrase(status))
        .with_header("Content-Type", "application/octet-stream")
        .with_delay(time_unit.mul_f64(delay));
    for _ in 0..bytes {
        response = response.with_drip(pause, b"*".to_vec());
    }
    response
}

fn compressed(request: &HttpRequest, encoding: &str) -> HttpResponse {
    let flag = if encoding == "gzip" { "gzipped" } else { "deflated" };
    let document = json!({
        flag: true,
        "headers": headers_document(request),
        "method": request.method,
        "origin": "127.0.0.1",
    });
    let plain = document.to_string().into_bytes();

    let encoded = if encoding == "gzip" {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).and_then(|()| encoder.finish())
    } else {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).and_then(|()| encoder.finish())
    };

    match encoded {
        Ok(body) => HttpResponse::status(200, "OK")
            .with_header("Content-Type", "application/json")
            .with_header("Content-Encoding", encoding)
            .with_body(body),
        Err(err) => {
            tracing::error!("Failed to encode {} body: {}", encoding, err);
            HttpResponse::status(500, reason_phrase(500))
        }
    }
}
