//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, prefix shape)
//! - Check route descriptors are usable (target URL parses, pattern present)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("auth.jwt_secret must not be empty")]
    EmptySecret,

    #[error("listener.api_prefix must start with '/' (got {0:?})")]
    BadPrefix(String),

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("route #{index} has an empty {field}")]
    EmptyRouteField { index: usize, field: &'static str },

    #[error("route #{index} target_url {url:?} is invalid: {reason}")]
    BadTargetUrl {
        index: usize,
        url: String,
        reason: String,
    },
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.auth.jwt_secret.is_empty() {
        errors.push(ValidationError::EmptySecret);
    }

    if !config.listener.api_prefix.starts_with('/') {
        errors.push(ValidationError::BadPrefix(config.listener.api_prefix.clone()));
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_secs"));
    }
    if config.timeouts.upstream_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("upstream_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("request_secs"));
    }

    for (index, route) in config.routes.iter().enumerate() {
        if route.service.is_empty() {
            errors.push(ValidationError::EmptyRouteField { index, field: "service" });
        }
        if route.path_pattern.is_empty() {
            errors.push(ValidationError::EmptyRouteField { index, field: "path_pattern" });
        }
        if route.methods.is_empty() {
            errors.push(ValidationError::EmptyRouteField { index, field: "methods" });
        }
        match Url::parse(&route.target_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError::BadTargetUrl {
                index,
                url: route.target_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            }),
            Err(e) => errors.push(ValidationError::BadTargetUrl {
                index,
                url: route.target_url.clone(),
                reason: e.to_string(),
            }),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
