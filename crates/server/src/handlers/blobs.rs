//! Blob read path.
//!
//! `GET /item/{id}/@blob/{n}` serves one immutable blob, via the cache
//! when possible. A cache miss parks the request on the shared populate
//! for up to a minute; the `X-Cached` header reports how the content
//! was sourced (`1` hit, `2` too-large bypass, `0` miss).

use crate::content::Content;
use crate::error::{ApiError, ApiResult};
use crate::ranged::{RangedReader, Whence};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, ETAG, RANGE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use stacks_core::BlobRef;
use std::time::Duration;

/// How long one request attempt waits for a populate to finish.
const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// GET/HEAD /item/{id}/@blob/{n} - serve one blob.
pub async fn get_blob(
    State(state): State<AppState>,
    method: Method,
    Path((id, blob_no)): Path<(String, u32)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let blob = BlobRef::new(id, blob_no).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    // GET requests always cache content. HEAD requests cache content
    // only when the Request-Cache header is passed (with any value).
    let do_load = method == Method::GET || headers.contains_key("request-cache");

    let mut first_time = true;
    loop {
        let content = state.finder.find_content(&blob, do_load).await?;
        match content {
            Content::Cached(reader) => {
                let x_cached = if first_time {
                    tracing::info!(blob = %blob, "cache hit");
                    "1"
                } else {
                    "0"
                };
                return serve_reader(reader, &headers, &method, &blob, x_cached);
            }
            Content::Large(reader) => {
                tracing::info!(blob = %blob, "cache miss (too large)");
                return serve_reader(reader, &headers, &method, &blob, "2");
            }
            Content::Waiting { size, done } => {
                if !first_time {
                    // why are we waiting for content a second time?
                    tracing::error!(blob = %blob, "unexpectedly waiting for content a second time");
                    return Err(ApiError::Internal(
                        "the file cannot be accessed at this time".to_string(),
                    ));
                }
                tracing::info!(blob = %blob, "cache miss");

                // content is not returned for non-GET requests, so
                // don't wait for it to be cached
                if method != Method::GET {
                    return Ok(head_response(size, &blob));
                }
                let Some(mut done) = done else {
                    return Err(ApiError::Internal("no load in progress".to_string()));
                };
                match tokio::time::timeout(WAIT_TIMEOUT, done.recv()).await {
                    Ok(_) => {
                        tracing::info!(blob = %blob, "populate done, retrying");
                        first_time = false;
                    }
                    Err(_) => {
                        tracing::warn!(blob = %blob, "timed out waiting for populate");
                        return Err(ApiError::Timeout);
                    }
                }
            }
        }
    }
}

fn etag_for(blob: &BlobRef) -> String {
    format!("\"{}\"", blob.blob)
}

/// Response for a HEAD request whose content is not cached.
fn head_response(size: u64, blob: &BlobRef) -> Response {
    (
        StatusCode::OK,
        [
            (ETAG, etag_for(blob)),
            (CONTENT_LENGTH, size.to_string()),
            (ACCEPT_RANGES, "bytes".to_string()),
            (X_CACHED, "0".to_string()),
        ],
        Body::empty(),
    )
        .into_response()
}

const X_CACHED: axum::http::HeaderName = axum::http::HeaderName::from_static("x-cached");

/// Serve a seekable reader, honoring a single `Range: bytes=` request.
fn serve_reader(
    mut reader: RangedReader,
    headers: &HeaderMap,
    method: &Method,
    blob: &BlobRef,
    x_cached: &str,
) -> ApiResult<Response> {
    let total = reader.size();
    let is_get = *method == Method::GET;
    let base = [
        (ETAG, etag_for(blob)),
        (ACCEPT_RANGES, "bytes".to_string()),
        (X_CACHED, x_cached.to_string()),
    ];

    let range = headers.get(RANGE).and_then(|v| v.to_str().ok());
    match parse_range(range, total) {
        RangeOutcome::Whole => {
            let body = if is_get {
                Body::from_stream(reader.into_stream(None))
            } else {
                Body::empty()
            };
            Ok((
                StatusCode::OK,
                base,
                [(CONTENT_LENGTH, total.to_string())],
                body,
            )
                .into_response())
        }
        RangeOutcome::Partial { start, end } => {
            reader
                .seek(start as i64, Whence::Start)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            let len = end - start + 1;
            let body = if is_get {
                Body::from_stream(reader.into_stream(Some(len)))
            } else {
                Body::empty()
            };
            Ok((
                StatusCode::PARTIAL_CONTENT,
                base,
                [
                    (CONTENT_RANGE, format!("bytes {start}-{end}/{total}")),
                    (CONTENT_LENGTH, len.to_string()),
                ],
                body,
            )
                .into_response())
        }
        RangeOutcome::Unsatisfiable => Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            base,
            [(CONTENT_RANGE, format!("bytes */{total}"))],
            Body::empty(),
        )
            .into_response()),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RangeOutcome {
    /// No (usable) range header; serve the whole stream.
    Whole,
    /// One satisfiable range, inclusive bounds.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Parse a single-range `bytes=` header against a stream of `total`
/// bytes. Multi-range and malformed headers are ignored rather than
/// rejected.
fn parse_range(header: Option<&str>, total: u64) -> RangeOutcome {
    let Some(spec) = header.and_then(|h| h.strip_prefix("bytes=")) else {
        return RangeOutcome::Whole;
    };
    if spec.contains(',') {
        return RangeOutcome::Whole;
    }
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return RangeOutcome::Whole;
    };

    if start_str.is_empty() {
        // suffix form: last N bytes
        let Ok(suffix) = end_str.parse::<u64>() else {
            return RangeOutcome::Whole;
        };
        if suffix == 0 || total == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        return RangeOutcome::Partial {
            start: total.saturating_sub(suffix),
            end: total - 1,
        };
    }

    let Ok(start) = start_str.parse::<u64>() else {
        return RangeOutcome::Whole;
    };
    if start >= total {
        return RangeOutcome::Unsatisfiable;
    }
    let end = if end_str.is_empty() {
        total - 1
    } else {
        match end_str.parse::<u64>() {
            Ok(end) if end >= start => end.min(total - 1),
            _ => return RangeOutcome::Whole,
        }
    };
    RangeOutcome::Partial { start, end }
}
