//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (path after api prefix, method)
//!     → router.rs (ordered scan)
//!     → matcher.rs (glob path + method set)
//!     → Return: RouteDescriptor or NoRouteError
//!
//! Route compilation (at startup):
//!     RouteConfig[]
//!     → parse target URLs, normalise methods/strip lists
//!     → freeze as immutable RouteResolver
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Declaration order is the only precedence
//! - Deterministic: same input always matches same route
//! - The glob matcher is shared with the policy engine's path filter

pub mod matcher;
pub mod router;

pub use matcher::{glob_match, method_allowed, MethodSet, PathPattern};
pub use router::{NoRouteError, RouteDescriptor, RouteResolver};
