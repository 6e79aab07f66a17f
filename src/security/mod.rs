//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Allowed request with a rateLimit obligation:
//!     → rate_limit.rs (resolve key template, fixed-window check)
//!     → counter_store.rs (atomic increment per key and window)
//!
//! Forwarded request / relayed response:
//!     → headers.rs (strip credentials + hop-by-hop, set X-Forwarded-For)
//! ```
//!
//! # Design Decisions
//! - Rate limiting fails OPEN on store errors (availability over enforcement)
//! - Stripped headers are per route, never global
//! - No trust in client-supplied forwarding headers

pub mod counter_store;
pub mod headers;
pub mod rate_limit;

pub use counter_store::{CounterStore, CounterStoreError, InMemoryCounterStore};
pub use headers::{client_response_headers, sanitize_request_headers};
pub use rate_limit::{
    resolve_key_template, RateLimitOutcome, RateLimiter, DEFAULT_KEY_TEMPLATE, MAX_WINDOW_SECONDS,
};
