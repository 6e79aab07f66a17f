//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, request ID on every pipeline exit)
//!     → metrics.rs (counters, histograms)
//!
//! Audit records are separate: see crate::audit.
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all subsystems
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use logging::init_tracing;
