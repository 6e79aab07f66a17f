//! Turning pipeline outcomes into client responses.
//!
//! # Design Decisions
//! - Downstream responses are relayed verbatim minus hop-by-hop headers
//! - Gateway errors use the structured `{error: {...}}` body
//! - Rate-limit headers go on every response whose request was rate-limited

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};

use crate::pipeline::PipelineOutcome;
use crate::security::headers::client_response_headers;
use crate::security::RateLimitOutcome;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

impl IntoResponse for PipelineOutcome {
    fn into_response(self) -> Response {
        let mut response = match self.result {
            Ok(forwarded) => {
                let mut response = Response::new(Body::from(forwarded.body));
                *response.status_mut() = forwarded.status;
                *response.headers_mut() = client_response_headers(&forwarded.headers);
                response
            }
            Err(e) => e.to_response(&self.request_id),
        };

        if let Some(outcome) = &self.rate_limit {
            apply_rate_limit_headers(&mut response, outcome);
        }
        response
    }
}

fn apply_rate_limit_headers(response: &mut Response, outcome: &RateLimitOutcome) {
    let headers = response.headers_mut();
    let values = [
        (X_RATELIMIT_LIMIT, outcome.limit.to_string()),
        (X_RATELIMIT_REMAINING, outcome.remaining.to_string()),
        (X_RATELIMIT_RESET, outcome.reset_time_iso()),
    ];
    for (name, value) in values {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}
