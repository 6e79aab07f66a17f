//! Audit subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline terminal step (exactly once per request):
//!     → record.rs (AuditRecord built from whatever stages completed)
//!     → sink.rs AuditDispatcher (spawned, response never waits)
//!     → AuditSink (tracing target "audit", memory, or external)
//! ```
//!
//! # Design Decisions
//! - Fire-and-forget: a failed write is logged and counted, never surfaced
//! - Subject defaults to an anonymous placeholder before authentication

pub mod record;
pub mod sink;

pub use record::{AuditContext, AuditRecord, RateLimitSnapshot, SubjectSummary};
pub use sink::{AuditDispatcher, AuditError, AuditSink, MemoryAuditSink, TracingAuditSink};
