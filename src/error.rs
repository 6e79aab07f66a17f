//! Request-level error taxonomy.
//!
//! Every variant maps to exactly one HTTP status and error code. None of them
//! are retried inside the gateway.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::http::forwarder::ProxyError;
use crate::routing::NoRouteError;
use crate::security::rate_limit::RateLimitOutcome;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Authorization token required")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error(transparent)]
    NoRoute(#[from] NoRouteError),

    #[error("{reason}")]
    AccessDenied {
        reason: String,
        policy_id: Option<String>,
    },

    #[error("Rate limit exceeded for key {}", .0.key)]
    RateLimited(RateLimitOutcome),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Request not completed within {}s", .0.as_secs())]
    Timeout(std::time::Duration),

    #[error("Upstream request failed: {0}")]
    Proxy(#[source] ProxyError),

    #[error("Internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingToken => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidToken(_) => StatusCode::FORBIDDEN,
            GatewayError::NoRoute(_) => StatusCode::NOT_FOUND,
            GatewayError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Proxy(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn client_code(&self) -> &'static str {
        match self {
            GatewayError::MissingToken => "MISSING_TOKEN",
            GatewayError::InvalidToken(_) => "INVALID_TOKEN",
            GatewayError::NoRoute(_) => "NO_ROUTE",
            GatewayError::AccessDenied { .. } => "ACCESS_DENIED",
            GatewayError::RateLimited(_) => "RATE_LIMITED",
            GatewayError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            GatewayError::Timeout(_) => "GATEWAY_TIMEOUT",
            GatewayError::Proxy(_) => "PROXY_ERROR",
            GatewayError::Internal(_) => "INTERNAL_GATEWAY_ERROR",
        }
    }

    /// Message shown to the caller. Downstream and internal causes stay in
    /// the audit trail.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Proxy(_) => "Upstream request failed".to_string(),
            GatewayError::Internal(_) => "Internal gateway error".to_string(),
            GatewayError::RateLimited(_) => "Rate limit exceeded".to_string(),
            GatewayError::Timeout(_) => "Request timed out".to_string(),
            other => other.to_string(),
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            GatewayError::RateLimited(outcome) => Some(json!({
                "resetTime": outcome.reset_time_iso(),
                "remaining": outcome.remaining,
                "limit": outcome.limit,
                "windowSeconds": outcome.window_seconds,
                "key": outcome.key,
            })),
            GatewayError::AccessDenied {
                policy_id: Some(id),
                ..
            } => Some(json!({ "policyId": id })),
            _ => None,
        }
    }

    /// Render the structured error body, tagged with the request id.
    pub fn to_response(&self, request_id: &str) -> Response {
        let mut error = json!({
            "code": self.client_code(),
            "message": self.client_message(),
            "requestId": request_id,
        });
        if let (Some(details), Some(obj)) = (self.details(), error.as_object_mut()) {
            obj.insert("details".to_string(), details);
        }
        (self.status(), Json(json!({ "error": error }))).into_response()
    }
}

/// Failures while assembling the gateway. Fatal at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid route target url: {0}")]
    RouteTarget(#[from] url::ParseError),

    #[error("failed to build downstream client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProxyError> for GatewayError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::InvalidRequest(msg) => GatewayError::Internal(msg),
            other => GatewayError::Proxy(other),
        }
    }
}
