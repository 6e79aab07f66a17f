//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → stop accepting → drain → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task subscribes
//! - Ordered shutdown: stop accept, drain in-flight requests, stop sweeper

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
