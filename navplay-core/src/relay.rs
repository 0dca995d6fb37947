//! Pass-through of upstream media responses.
//!
//! The relay never looks at range boundaries itself: whatever `Range` the
//! browser sent goes upstream verbatim, and whatever status, range headers
//! and bytes come back are handed to the browser as they arrive.

use std::fmt;

use axum::body::Body;
use axum::http::header::{
    HeaderName, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE, ETAG, LAST_MODIFIED,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::subsonic_client::{ResponseEnvelope, SubsonicClientError};

/// Subsonic error code for "requested data was not found".
const SUBSONIC_NOT_FOUND: u32 = 70;

/// Largest error envelope worth reading off a media endpoint.
const MAX_ENVELOPE_BYTES: u64 = 64 * 1024;

const COVER_HEADERS: &[HeaderName] = &[
    CONTENT_TYPE,
    CONTENT_LENGTH,
    CACHE_CONTROL,
    ETAG,
    LAST_MODIFIED,
    ACCEPT_RANGES,
];

const AUDIO_HEADERS: &[HeaderName] = &[
    CONTENT_TYPE,
    CONTENT_LENGTH,
    ACCEPT_RANGES,
    CONTENT_RANGE,
    CACHE_CONTROL,
    ETAG,
    LAST_MODIFIED,
    CONTENT_DISPOSITION,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Cover,
}

impl MediaKind {
    fn passthrough_headers(self) -> &'static [HeaderName] {
        match self {
            Self::Audio => AUDIO_HEADERS,
            Self::Cover => COVER_HEADERS,
        }
    }

    fn default_content_type(self) -> &'static str {
        match self {
            Self::Audio => "audio/mpeg",
            Self::Cover => "image/jpeg",
        }
    }
}

/// A single `Range: bytes=...` specification, kept for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    /// `None` for a suffix range (`bytes=-500`).
    pub start: Option<u64>,
    /// `None` for an open-ended range (`bytes=500-`).
    pub end: Option<u64>,
}

impl ByteRange {
    /// Parse a single byte range. Multi-range and non-byte units give `None`.
    pub fn parse(header: &str) -> Option<Self> {
        let range_spec = header.trim().strip_prefix("bytes=")?;
        if range_spec.contains(',') {
            return None;
        }
        let (start_str, end_str) = range_spec.split_once('-')?;
        let (start_str, end_str) = (start_str.trim(), end_str.trim());

        let start = match start_str {
            "" => None,
            s => Some(s.parse::<u64>().ok()?),
        };
        let end = match end_str {
            "" => None,
            s => Some(s.parse::<u64>().ok()?),
        };

        match (start, end) {
            (None, None) => None,
            (Some(s), Some(e)) if s > e => None,
            _ => Some(Self { start, end }),
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("bytes=")?;
        if let Some(start) = self.start {
            write!(f, "{start}")?;
        }
        f.write_str("-")?;
        if let Some(end) = self.end {
            write!(f, "{end}")?;
        }
        Ok(())
    }
}

/// Turn an upstream media response into the response for the browser.
///
/// 5xx becomes 502. Every other status, including 206, 404 and 416, is
/// passed through along with the range and caching headers. The body is
/// streamed chunk by chunk; dropping the returned response (client gone)
/// drops the upstream connection with it.
pub async fn relay(upstream: reqwest::Response, kind: MediaKind) -> Response {
    let status = upstream.status();

    if status.is_server_error() {
        warn!("upstream answered {status} for {kind:?} request");
        return bad_gateway();
    }

    if status.is_success() && is_subsonic_envelope(upstream.headers()) {
        return envelope_error(upstream).await;
    }

    let mut headers = HeaderMap::new();
    for name in kind.passthrough_headers() {
        if let Some(value) = upstream.headers().get(name) {
            headers.insert(name.clone(), value.clone());
        }
    }

    if status.is_success() && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(kind.default_content_type()),
        );
    }
    if kind == MediaKind::Audio && !headers.contains_key(ACCEPT_RANGES) {
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Response for a request that never got an upstream answer.
pub fn upstream_failure(err: &SubsonicClientError) -> Response {
    warn!("upstream request failed: {err}");
    bad_gateway()
}

fn bad_gateway() -> Response {
    (StatusCode::BAD_GATEWAY, "Upstream error").into_response()
}

/// Media endpoints answer errors with a 200 JSON/XML envelope instead of bytes.
fn is_subsonic_envelope(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("application/json")
                || ct.starts_with("application/xml")
                || ct.starts_with("text/xml")
        })
        .unwrap_or(false)
}

async fn envelope_error(upstream: reqwest::Response) -> Response {
    if upstream
        .content_length()
        .is_some_and(|len| len > MAX_ENVELOPE_BYTES)
    {
        warn!("oversized error envelope from upstream media endpoint");
        return bad_gateway();
    }

    let body = match upstream.bytes().await {
        Ok(body) => body,
        Err(e) => return upstream_failure(&SubsonicClientError::from(e)),
    };

    let outcome = serde_json::from_slice::<ResponseEnvelope>(&body)
        .map_err(|_| SubsonicClientError::Parse)
        .and_then(ResponseEnvelope::into_data);

    match outcome {
        Err(SubsonicClientError::Server { code, .. }) if code == SUBSONIC_NOT_FOUND => {
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => upstream_failure(&e),
        Ok(_) => {
            warn!("upstream media endpoint answered with an ok envelope instead of data");
            bad_gateway()
        }
    }
}
