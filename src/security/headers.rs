//! Header manipulation for forwarded requests and relayed responses.
//!
//! # Responsibilities
//! - Strip route-configured headers (credentials, cookies) before forwarding
//! - Strip hop-by-hop headers in both directions
//! - Set X-Forwarded-For and X-Request-ID from gateway-owned values
//!
//! # Design Decisions
//! - Client-supplied X-Forwarded-For is never trusted; it is replaced
//! - Header names compare case-insensitively (`HeaderName` is lowercase)

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REQUIRE_MFA: &str = "x-require-mfa";

/// Hop-by-hop headers (RFC 7230 §6.1) plus the legacy `proxy-connection`.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Build the header map sent downstream.
///
/// `strip` entries must already be lowercase.
pub fn sanitize_request_headers(
    incoming: &HeaderMap,
    strip: &[String],
    request_id: &str,
    client_ip: Option<&str>,
) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(incoming.len() + 2);

    for (name, value) in incoming {
        let n = name.as_str();
        if strip.iter().any(|s| s == n)
            || is_hop_by_hop(name)
            || *name == header::HOST
            || *name == header::CONTENT_LENGTH
            || n == X_FORWARDED_FOR
            || n == X_REQUEST_ID
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    if let Ok(v) = HeaderValue::from_str(request_id) {
        out.insert(HeaderName::from_static(X_REQUEST_ID), v);
    }
    if let Some(ip) = client_ip {
        if let Ok(v) = HeaderValue::from_str(ip) {
            out.insert(HeaderName::from_static(X_FORWARDED_FOR), v);
        }
    }

    out
}

/// Filter downstream response headers before relaying them to the client.
/// The body is re-framed by the server, so length and transfer coding go.
pub fn client_response_headers(downstream: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(downstream.len());
    for (name, value) in downstream {
        if is_hop_by_hop(name) || *name == header::CONTENT_LENGTH || *name == header::HOST {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}
