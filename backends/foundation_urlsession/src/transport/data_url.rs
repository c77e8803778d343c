use base64::Engine;
use percent_encoding::percent_decode_str;
use url::{Position, Url};

use crate::errors::{SessionError, SessionResult};
use crate::response::parse_content_type;

const DEFAULT_MIME_TYPE: &str = "text/plain";
const DEFAULT_CHARSET: &str = "US-ASCII";

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct DataUrl {
    pub mime_type: String,
    pub charset: Option<String>,
    pub body: Vec<u8>,
}

/// Decodes `data:[<mediatype>][;base64],<data>`.
pub(crate) fn decode(url: &Url) -> SessionResult<DataUrl> {
    let raw = &url[..Position::AfterQuery];
    let content = raw
        .strip_prefix("data:")
        .ok_or_else(|| SessionError::InvalidUrl(raw.to_string()))?;

    let (meta, payload) = content
        .split_once(',')
        .ok_or_else(|| SessionError::InvalidUrl(format!("data url without payload: {raw}")))?;

    let (meta, is_base64) = match meta.rsplit_once(';') {
        Some((rest, flag)) if flag.eq_ignore_ascii_case("base64") => (rest, true),
        _ => (meta, false),
    };

    let (mime_type, charset) = parse_content_type(&percent_decode_str(meta).decode_utf8_lossy());
    let mime_type = mime_type.unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
    let charset = charset.or_else(|| {
        (mime_type == DEFAULT_MIME_TYPE && meta.is_empty()).then(|| DEFAULT_CHARSET.to_string())
    });

    let decoded: Vec<u8> = percent_decode_str(payload).collect();
    let body = if is_base64 {
        let compact: Vec<u8> = decoded
            .into_iter()
            .filter(|byte| !byte.is_ascii_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| SessionError::InvalidUrl(format!("invalid base64 data url: {e}")))?
    } else {
        decoded
    };

    Ok(DataUrl {
        mime_type,
        charset,
        body,
    })
}
