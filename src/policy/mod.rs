//! Policy subsystem.
//!
//! # Data Flow
//! ```text
//! DecisionRequest (subject + resource + context)
//!     → repository.rs (candidate rules: enabled, service, tenant)
//!     → engine.rs (method/path filter, precedence, deny-before-allow)
//!     → condition.rs (dotted-path conditions, AND within a list)
//!     → DecisionResponse (ALLOW|DENY, reason, policy id, obligations)
//!
//! Rule set source (startup + hot reload):
//!     rules file → repository.rs load_rules → InMemoryRuleRepository
//!     watcher.rs → reload on change, keep old set on parse failure
//! ```
//!
//! # Design Decisions
//! - Zero-trust default: no rule, no decision, or any error → DENY
//! - First decisive rule wins; lower priorities are never consulted after it
//! - Rules are immutable snapshots during an evaluation

pub mod condition;
pub mod engine;
pub mod repository;
pub mod types;
pub mod watcher;

pub use engine::{PolicyEngine, NO_EXPLICIT_DECISION, NO_MATCHING_POLICY};
pub use repository::{InMemoryRuleRepository, RepositoryError, RuleRepository, RuleSet};
pub use types::{
    Condition, Decision, DecisionContext, DecisionRequest, DecisionResponse, LogLevel,
    MatchConditions, Obligations, Operator, RateLimitObligation, ResourceDescriptor, Rule,
};
pub use watcher::RuleWatcher;
