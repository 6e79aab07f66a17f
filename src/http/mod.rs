//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, per-request pipeline task)
//!     → [pipeline decides: authenticate, route, policy, rate limit]
//!     → forwarder.rs (downstream request via reqwest)
//!     → response.rs (relay downstream response or structured error)
//!     → Send to client
//! ```

pub mod forwarder;
pub mod response;
pub mod server;

pub use forwarder::{ForwardRequest, ForwardResponse, Forwarder, ProxyError};
pub use server::{GatewayComponents, GatewayServer};
