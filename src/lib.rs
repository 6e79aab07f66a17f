//! Zero-Trust Edge Gateway
//!
//! Every request under the API prefix must carry a verifiable identity, is
//! matched against a versioned rule set, is optionally throttled, and is
//! forwarded downstream only when a rule explicitly allows it.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────────┐
//!                    │                      EDGE GATEWAY                        │
//!                    │                                                          │
//!  Client Request    │  ┌────────┐   ┌──────────────────────────────────────┐   │
//!  ──────────────────┼─▶│  http  │──▶│          pipeline (per request)      │   │
//!                    │  │ server │   │                                      │   │
//!                    │  └────────┘   │  auth ─▶ routing ─▶ policy engine    │   │
//!                    │               │                        │             │   │
//!                    │               │            security::rate_limit      │   │
//!                    │               │                        │             │   │
//!  Client Response   │  ┌────────┐   │               http::forwarder ───────┼───┼──▶ Backend
//!  ◀─────────────────┼──│response│◀──│                                      │   │
//!                    │  └────────┘   └──────────────────┬───────────────────┘   │
//!                    │                                  │ exactly once          │
//!                    │                                  ▼                       │
//!                    │                           audit dispatcher ──▶ AuditSink │
//!                    │                                                          │
//!                    │  Cross-cutting: config · observability · lifecycle       │
//!                    │  Collaborators: RuleRepository · CounterStore · Clock    │
//!                    └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Policy evaluation fails CLOSED (any error is a DENY). Rate limiting fails
//! OPEN (a store outage allows the request).

// Core subsystems
pub mod auth;
pub mod config;
pub mod http;
pub mod pipeline;
pub mod policy;
pub mod routing;

// Enforcement support
pub mod audit;
pub mod clock;
pub mod security;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use config::schema::GatewayConfig;
pub use error::{GatewayError, StartupError};
pub use http::{GatewayComponents, GatewayServer};
pub use lifecycle::Shutdown;
pub use pipeline::EnforcementPipeline;
