//! Identity verification subsystem.
//!
//! # Data Flow
//! ```text
//! Authorization header
//!     → verifier.rs (extract bearer token, check signature + claims)
//!     → verifier.rs (expiry against the request's clock reading)
//!     → IdentityClaims (immutable for the rest of the request)
//! ```
//!
//! # Design Decisions
//! - HS256 shared secret only
//! - Expiry is checked by the gateway itself, never delegated to the JWT library
//! - Missing/malformed header is "absent", not an error

pub mod claims;
pub mod verifier;

pub use claims::IdentityClaims;
pub use verifier::{extract_bearer_token, AuthError, IdentityVerifier};
