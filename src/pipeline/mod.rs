//! Request enforcement pipeline.
//!
//! # Data Flow
//! ```text
//! START
//!     → AUTHENTICATE    (401 MISSING_TOKEN, 403 INVALID_TOKEN)
//!     → RESOLVE_ROUTE   (404 NO_ROUTE)
//!     → EVALUATE_POLICY (403 ACCESS_DENIED)
//!     → RATE_LIMIT      (429 RATE_LIMITED; only with a rateLimit obligation)
//!     → FORWARD         (500 PROXY_ERROR / INTERNAL_GATEWAY_ERROR)
//!     → RESPOND
//!
//! Every exit → AUDIT (exactly once) → completion log → metrics
//! ```
//!
//! # Design Decisions
//! - State lives in a request-scoped `RequestContext`, never in shared maps
//! - One clock read per request feeds expiry, rate-limit window and audit
//! - Panics inside any stage become INTERNAL_GATEWAY_ERROR and are audited

pub mod context;
pub mod enforcer;
pub mod stage;

pub use context::RequestContext;
pub use enforcer::{EnforcementPipeline, InboundRequest, PipelineOutcome};
pub use stage::Stage;
