//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → consumed once at construction time by each component
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the rule set hot-reloads
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, GatewayConfig, ListenerConfig, ObservabilityConfig, PolicyConfig,
    RateLimitConfig, RouteConfig, TimeoutConfig,
};
