//! Request identity and forwarding headers.
//!
//! # Responsibilities
//! - Name the request and correlation id headers
//! - Derive the correlation id that follows a request downstream
//! - Strip hop-by-hop headers before forwarding
//!
//! # Design Decisions
//! - `x-request-id` is assigned by the outer tower-http layer, so it is
//!   always present by the time a handler runs
//! - A caller-supplied `x-correlation-id` is propagated unchanged; without
//!   one the request id doubles as the correlation id

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_CORRELATION_ID: &str = "x-correlation-id";

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

pub fn request_id(headers: &HeaderMap) -> String {
    header_str(headers, X_REQUEST_ID)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn correlation_id(headers: &HeaderMap) -> String {
    header_str(headers, X_CORRELATION_ID)
        .or_else(|| header_str(headers, X_REQUEST_ID))
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Copy of `headers` fit for the downstream hop.
pub fn forward_headers(headers: &HeaderMap, request_id: &str, correlation_id: &str) -> HeaderMap {
    let mut forwarded = strip_hop_by_hop(headers);
    forwarded.remove(axum::http::header::HOST);
    if let Ok(value) = HeaderValue::from_str(request_id) {
        forwarded.insert(HeaderName::from_static(X_REQUEST_ID), value);
    }
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        forwarded.insert(HeaderName::from_static(X_CORRELATION_ID), value);
    }
    forwarded
}

pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut stripped = headers.clone();
    for name in HOP_BY_HOP {
        stripped.remove(name);
    }
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_prefers_explicit_header() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("req-1"));
        assert_eq!(correlation_id(&headers), "req-1");

        headers.insert(X_CORRELATION_ID, HeaderValue::from_static("corr-1"));
        assert_eq!(correlation_id(&headers), "corr-1");
        assert_eq!(request_id(&headers), "req-1");
    }

    #[test]
    fn test_forward_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("gateway.local"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));

        let forwarded = forward_headers(&headers, "req-9", "corr-9");
        assert!(forwarded.get("host").is_none());
        assert!(forwarded.get("connection").is_none());
        assert_eq!(forwarded.get("authorization").unwrap(), "Bearer t");
        assert_eq!(forwarded.get(X_REQUEST_ID).unwrap(), "req-9");
        assert_eq!(forwarded.get(X_CORRELATION_ID).unwrap(), "corr-9");
    }
}
