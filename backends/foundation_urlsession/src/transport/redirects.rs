use url::Url;

use crate::errors::{SessionError, SessionResult};
use crate::request::{Headers, Method, Request};

#[must_use]
pub(crate) fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Resolve a `Location` header value against the URL that produced it.
///
/// Supports:
/// - Absolute URI (contains "://") -> parsed directly
/// - Absolute-path reference (starts with '/') -> resolved against base scheme/authority
/// - Query reference (starts with '?') -> replaces the base query
/// - Relative-path reference -> resolved relative to the base's path directory
pub(crate) fn resolve_location(base: &Url, location: &str) -> SessionResult<Url> {
    let location = location.trim();

    if location.contains("://") {
        return Url::parse(location).map_err(|e| {
            SessionError::BadServerResponse(format!("failed to parse absolute location: {e}"))
        });
    }

    base.join(location).map_err(|e| {
        SessionError::BadServerResponse(format!("failed to resolve location {location}: {e}"))
    })
}

/// Build the request proposed to the delegate for a redirect target.
///
/// 301/302/303 turn non-GET/HEAD requests into a body-less GET, 307/308 keep
/// method and body. The original timeout (and whether it was explicit) carries over.
#[must_use]
pub(crate) fn build_follow_up(original: &Request, target: Url, status: u16) -> Request {
    let mut headers = original.headers.clone();

    let rewrites_to_get = match status {
        303 => original.method != Method::Head,
        301 | 302 => !matches!(original.method, Method::Get | Method::Head),
        _ => false,
    };

    let (method, body) = if rewrites_to_get {
        headers.remove("Content-Length");
        headers.remove("Content-Type");
        headers.remove("Transfer-Encoding");
        (Method::Get, None)
    } else {
        (original.method, original.body.clone())
    };

    let original_host = original.url.host_str().unwrap_or_default();
    let new_host = target.host_str().unwrap_or_default();
    strip_sensitive_headers_for_redirect(&mut headers, original_host, new_host);

    Request {
        url: target,
        method,
        headers,
        body,
        timeout: original.timeout,
    }
}

/// Strip sensitive headers when following redirects across hosts.
pub(crate) fn strip_sensitive_headers_for_redirect(
    headers: &mut Headers,
    original_host: &str,
    new_host: &str,
) {
    if !original_host.eq_ignore_ascii_case(new_host) {
        headers.remove("Authorization");
        headers.remove("Cookie");
    }
}
