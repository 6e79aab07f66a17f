//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, intercepted prefix).
    pub listener: ListenerConfig,

    /// Identity verification settings.
    pub auth: AuthConfig,

    /// Route descriptors, scanned in declaration order.
    pub routes: Vec<RouteConfig>,

    /// Rule set source.
    pub policy: PolicyConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Default configuration plus the stock echo-service route.
    pub fn with_default_routes() -> Self {
        Self {
            routes: vec![RouteConfig::echo_service()],
            ..Self::default()
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3001").
    pub bind_address: String,

    /// Path prefix intercepted by the enforcement pipeline.
    pub api_prefix: String,

    /// Maximum inbound request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3001".to_string(),
            api_prefix: "/api".to_string(),
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Identity verification configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HS256 secret.
    pub jwt_secret: String,

    /// Expected `iss` claim, if any.
    pub issuer: Option<String>,

    /// Authorization scheme expected in front of the token.
    pub scheme: String,
}

/// Placeholder secret. Startup warns when it is still in use.
pub const DEFAULT_JWT_SECRET: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            issuer: None,
            scheme: "Bearer".to_string(),
        }
    }
}

/// Route descriptor mapping a path pattern to a downstream service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Service name presented to the policy engine.
    pub service: String,

    /// Glob pattern over the path (after the api prefix), `*` matches any run.
    pub path_pattern: String,

    /// Downstream base URL.
    pub target_url: String,

    /// Allowed methods, `*` for any.
    #[serde(default = "default_route_methods")]
    pub methods: Vec<String>,

    /// Header names removed before forwarding (case-insensitive).
    #[serde(default)]
    pub strip_headers: Vec<String>,
}

impl RouteConfig {
    pub fn echo_service() -> Self {
        Self {
            service: "echo-service".to_string(),
            path_pattern: "/echo/*".to_string(),
            target_url: "http://127.0.0.1:7070".to_string(),
            methods: default_route_methods(),
            strip_headers: vec!["authorization".to_string(), "cookie".to_string()],
        }
    }
}

fn default_route_methods() -> Vec<String> {
    vec!["*".to_string()]
}

/// Rule set source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Rules file (JSON, or TOML by extension). No file means an empty set.
    pub rules_path: Option<String>,

    /// Reload the rules file when it changes.
    pub watch: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            watch: true,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Key template used when an obligation carries no key.
    pub default_key_template: String,

    /// Interval between sweeps of expired counters.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_key_template: "rate_limit:{subject.role}:{subject.tenant}".to_string(),
            sweep_interval_secs: 30,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Downstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Downstream request timeout in seconds.
    pub upstream_secs: u64,

    /// Total inbound request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            upstream_secs: 25,
            request_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}
