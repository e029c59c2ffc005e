//! Edge policy: origin control, body-size ceilings and cookie parsing. All of
//! it runs before identity extraction and admission, and none of it keeps
//! state between requests.

use std::convert::Infallible;

use bytes::{Buf, BufMut, BytesMut};
use futures::{future, Stream, StreamExt, TryStreamExt};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE, RETRY_AFTER};
use hyper::{
    header::{HeaderName, HeaderValue},
    Body, HeaderMap,
};
use thiserror::Error;
use tracing::warn;
use warp::filters::cors::Cors;
use warp::{Filter, Rejection};

use crate::config::{ALLOWED_HEADERS, ALLOWED_METHODS};
use crate::errors::GatewayError;
use crate::models::{CookieJar, RateLimitStatus};


/// Cross-origin policy: only allow-listed origins, `Content-Type` and
/// `Authorization` request headers, credentials enabled.
pub fn cors(allowed_origins: &[String]) -> Cors {
    warp::cors()
        .allow_origins(allowed_origins.iter().map(String::as_str))
        .allow_headers(ALLOWED_HEADERS)
        .allow_methods(ALLOWED_METHODS)
        .allow_credentials(true)
        .build()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyLimits {
    pub json: usize,
    pub form: usize,
    pub other: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
    Other,
}

pub fn body_kind(headers: &HeaderMap) -> BodyKind {
    let essence = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if essence == "application/json" || essence.ends_with("+json") {
        BodyKind::Json
    } else if essence == "application/x-www-form-urlencoded" {
        BodyKind::Form
    } else {
        BodyKind::Other
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Turns the inbound body into the body that will be forwarded.
///
/// Every kind has a ceiling, and an oversized `Content-Length` is refused
/// before anything is read. JSON and form bodies are read into memory once.
/// Every other body is passed through as a stream whose bytes are counted;
/// crossing the ceiling ends it with [`GatewayError::PayloadTooLarge`] as the
/// stream error.
pub async fn read_body<S, B, E>(limits: BodyLimits, headers: &HeaderMap, stream: S) -> Result<Body, GatewayError>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: Buf + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let kind = body_kind(headers);
    let limit = match kind {
        BodyKind::Json => limits.json,
        BodyKind::Form => limits.form,
        BodyKind::Other => limits.other,
    };

    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    if declared.map_or(false, |len| len > limit as u64) {
        return Err(GatewayError::PayloadTooLarge { limit });
    }

    if kind == BodyKind::Other {
        let mut seen = 0usize;
        let chunks = stream
            .map_err(|e| Box::new(e) as BoxError)
            .and_then(move |mut chunk| {
                seen = seen.saturating_add(chunk.remaining());
                let next = if seen > limit {
                    Err(Box::new(GatewayError::PayloadTooLarge { limit }) as BoxError)
                } else {
                    Ok(chunk.copy_to_bytes(chunk.remaining()))
                };
                future::ready(next)
            });
        return Ok(Body::wrap_stream(chunks));
    }

    let mut buffer = BytesMut::new();
    let mut stream = Box::pin(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| GatewayError::BodyRead(e.to_string()))?;
        if buffer.len() + chunk.remaining() > limit {
            return Err(GatewayError::PayloadTooLarge { limit });
        }
        buffer.put(chunk);
    }

    Ok(Body::from(buffer.freeze()))
}

/// Extracts the request body after applying the size ceilings.
pub fn body_limits(limits: BodyLimits) -> impl Filter<Extract = (Body,), Error = Rejection> + Clone {
    warp::header::headers_cloned()
        .and(warp::body::stream())
        .and_then(move |headers: HeaderMap, stream| async move {
            read_body(limits, &headers, stream)
                .await
                .map_err(warp::reject::custom)
        })
}

#[derive(Debug, Error)]
#[error("Cookie header is not valid text")]
pub struct MalformedCookie;

pub fn parse_cookies(headers: &HeaderMap) -> Result<CookieJar, MalformedCookie> {
    let mut jar = CookieJar::default();

    for value in headers.get_all(COOKIE) {
        let raw = value.to_str().map_err(|_| MalformedCookie)?;
        for pair in raw.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            jar.insert(name.to_string(), value.to_string());
        }
    }

    Ok(jar)
}

/// Parsed cookies. A malformed header yields an empty jar instead of a
/// rejection, which leaves the request in the anonymous tier.
pub fn cookies() -> impl Filter<Extract = (CookieJar,), Error = Infallible> + Clone {
    warp::header::headers_cloned().map(|headers: HeaderMap| match parse_cookies(&headers) {
        Ok(jar) => jar,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed cookie header");
            CookieJar::default()
        }
    })
}

/// Standard (draft IETF) rate-limit headers. No legacy `X-RateLimit-*`.
pub fn add_rate_limit_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    headers.insert(
        HeaderName::from_static("ratelimit-policy"),
        header_value(format!("{};w={}", status.limit, status.window.as_secs())),
    );
    headers.insert(
        HeaderName::from_static("ratelimit-limit"),
        HeaderValue::from(status.limit),
    );
    headers.insert(
        HeaderName::from_static("ratelimit-remaining"),
        HeaderValue::from(status.remaining),
    );
    headers.insert(
        HeaderName::from_static("ratelimit-reset"),
        HeaderValue::from(reset_secs(status)),
    );
}

/// Like [`add_rate_limit_headers`], but leaves a response alone when the
/// upstream already set any `RateLimit-*` header of its own.
pub fn add_rate_limit_headers_unless_present(headers: &mut HeaderMap, status: &RateLimitStatus) {
    let upstream_owned = headers
        .keys()
        .any(|name| name.as_str().starts_with("ratelimit-"));
    if !upstream_owned {
        add_rate_limit_headers(headers, status);
    }
}

pub fn add_retry_after(headers: &mut HeaderMap, status: &RateLimitStatus) {
    headers.insert(RETRY_AFTER, HeaderValue::from(reset_secs(status)));
}

// Whole seconds, rounded up so clients never retry early.
fn reset_secs(status: &RateLimitStatus) -> u64 {
    status
        .reset
        .as_secs()
        .saturating_add(u64::from(status.reset.subsec_nanos() > 0))
}

fn header_value(value: String) -> HeaderValue {
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(""))
}
