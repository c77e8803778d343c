use std::time::SystemTime;

use url::Url;

use crate::request::Headers;

/// Status line and headers of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpParts {
    pub status_code: u16,
    pub headers: Headers,
}

/// Metadata describing a response; the body is delivered separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub url: Url,
    pub mime_type: Option<String>,
    pub expected_content_length: Option<u64>,
    pub text_encoding_name: Option<String>,
    /// Present for HTTP responses, absent for `data:` URLs.
    pub http: Option<HttpParts>,
}

impl Response {
    /// Builds an HTTP response, deriving mime type, charset and length from headers.
    #[must_use]
    pub fn new_http(url: Url, status_code: u16, headers: Headers) -> Self {
        let (mime_type, text_encoding_name) = headers
            .get("Content-Type")
            .map(parse_content_type)
            .unwrap_or_default();

        let expected_content_length = headers
            .get("Content-Length")
            .and_then(|value| value.trim().parse::<u64>().ok());

        Self {
            url,
            mime_type,
            expected_content_length,
            text_encoding_name,
            http: Some(HttpParts {
                status_code,
                headers,
            }),
        }
    }

    #[must_use]
    pub fn new_data(url: Url, mime_type: String, charset: Option<String>, length: u64) -> Self {
        Self {
            url,
            mime_type: Some(mime_type),
            expected_content_length: Some(length),
            text_encoding_name: charset,
            http: None,
        }
    }

    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.http.as_ref().map(|parts| parts.status_code)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.http.as_ref().and_then(|parts| parts.headers.get(name))
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code()
            .is_some_and(|code| (200..300).contains(&code))
    }
}

/// Splits `type/subtype; charset=x` into its mime type and charset.
pub(crate) fn parse_content_type(value: &str) -> (Option<String>, Option<String>) {
    let mut parts = value.split(';');
    let mime = parts
        .next()
        .map(|mime| mime.trim().to_ascii_lowercase())
        .filter(|mime| !mime.is_empty());

    let charset = parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    });

    (mime, charset)
}

/// Decision returned for a received response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDisposition {
    Allow,
    Cancel,
    BecomeDownload,
    BecomeStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStoragePolicy {
    Allowed,
    AllowedInMemoryOnly,
    NotAllowed,
}

/// A response together with its body, as proposed for and held in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub response: Response,
    pub data: Vec<u8>,
    pub storage_policy: CacheStoragePolicy,
    pub stored_at: SystemTime,
}

impl CachedResponse {
    #[must_use]
    pub fn new(response: Response, data: Vec<u8>) -> Self {
        Self {
            response,
            data,
            storage_policy: CacheStoragePolicy::AllowedInMemoryOnly,
            stored_at: SystemTime::now(),
        }
    }
}
