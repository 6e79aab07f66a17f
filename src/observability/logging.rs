//! Structured logging.
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, human-readable format for development
//! - `RUST_LOG` overrides the configured level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. A second call is a no-op.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Directive for the configured level, keeping tower_http request spans at
/// the same verbosity.
fn default_directive(level: &str) -> String {
    format!("zt_gateway={level},tower_http={level},audit=info,{level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_parses() {
        let directive = default_directive("debug");
        assert!(directive.starts_with("zt_gateway=debug"));
        assert!(EnvFilter::try_new(directive).is_ok());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = ObservabilityConfig::default();
        init_tracing(&config);
        init_tracing(&config);
    }
}
