//! Route lookup.
//!
//! # Responsibilities
//! - Store route descriptors in declaration order
//! - Look up the first descriptor matching path and method
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan (acceptable for typical route counts)
//! - Explicit NoRouteError rather than silent default

use thiserror::Error;
use url::Url;

use crate::config::RouteConfig;
use crate::routing::matcher::{MethodSet, PathPattern};

/// Resolved downstream target for a request.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDescriptor {
    pub service: String,
    pub path_pattern: PathPattern,
    pub target_url: Url,
    pub methods: MethodSet,
    /// Lowercased header names removed before forwarding.
    pub strip_headers: Vec<String>,
}

impl RouteDescriptor {
    pub fn from_config(config: &RouteConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            service: config.service.clone(),
            path_pattern: PathPattern::new(config.path_pattern.clone()),
            target_url: Url::parse(&config.target_url)?,
            methods: MethodSet::new(&config.methods),
            strip_headers: config
                .strip_headers
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        })
    }

    pub fn matches(&self, path: &str, method: &str) -> bool {
        self.path_pattern.matches(path) && self.methods.contains(method)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No route configured for {method} {path}")]
pub struct NoRouteError {
    pub method: String,
    pub path: String,
}

/// Ordered, immutable route table.
#[derive(Debug, Clone, Default)]
pub struct RouteResolver {
    routes: Vec<RouteDescriptor>,
}

impl RouteResolver {
    pub fn new(routes: Vec<RouteDescriptor>) -> Self {
        Self { routes }
    }

    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, url::ParseError> {
        let routes = routes
            .iter()
            .map(RouteDescriptor::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { routes })
    }

    /// First route, in declaration order, whose pattern and method set accept
    /// the request.
    pub fn resolve(&self, path: &str, method: &str) -> Result<&RouteDescriptor, NoRouteError> {
        self.routes
            .iter()
            .find(|r| r.matches(path, method))
            .ok_or_else(|| NoRouteError {
                method: method.to_string(),
                path: path.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
