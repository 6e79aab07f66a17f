//! Policy decision engine.
//!
//! # Evaluation
//! ```text
//! candidates (repository: enabled + service + tenant)
//!     → method/path filter (re-applied here, repository filtering is coarse)
//!     → precedence order: priority desc, newest first
//!     → per rule: denyIf all-match → DENY
//!                 allowIf all-match → ALLOW + obligations
//!                 otherwise SKIP
//!     → first non-SKIP wins; nothing else is consulted
//! ```
//!
//! The engine is fail-closed: repository errors, serialization failures and
//! panics while evaluating all resolve to DENY.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;

use crate::observability::metrics;
use crate::policy::condition::all_conditions_match;
use crate::policy::repository::{sort_by_precedence, RuleRepository};
use crate::policy::types::{DecisionRequest, DecisionResponse, Rule};
use crate::routing::{glob_match, method_allowed};

pub const NO_MATCHING_POLICY: &str = "No matching policy found";
pub const NO_EXPLICIT_DECISION: &str = "No policy rule produced an explicit decision";

/// Result of evaluating a single rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Allow,
    Deny,
    Skip,
}

/// Evaluates decision requests against the rule repository.
#[derive(Clone)]
pub struct PolicyEngine {
    repository: Arc<dyn RuleRepository>,
}

impl PolicyEngine {
    pub fn new(repository: Arc<dyn RuleRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn RuleRepository> {
        &self.repository
    }

    /// Decide ALLOW or DENY. Never fails.
    pub async fn evaluate(&self, request: &DecisionRequest) -> DecisionResponse {
        let lookup = self
            .repository
            .find_candidate_rules(&request.resource.service, request.context.tenant.as_deref());
        let candidates = match AssertUnwindSafe(lookup).catch_unwind().await {
            Ok(Ok(rules)) => rules,
            Ok(Err(e)) => {
                tracing::error!(
                    request_id = %request.context.request_id,
                    error = %e,
                    "Rule repository failed; denying"
                );
                metrics::record_decision("DENY", "repository_error");
                return DecisionResponse::deny(format!("Policy evaluation error: {e}"));
            }
            Err(_) => {
                tracing::error!(
                    request_id = %request.context.request_id,
                    "Rule repository panicked; denying"
                );
                metrics::record_decision("DENY", "repository_error");
                return DecisionResponse::deny("Policy evaluation error: rule lookup aborted");
            }
        };

        let response = match catch_unwind(AssertUnwindSafe(|| evaluate_rules(request, &candidates))) {
            Ok(response) => response,
            Err(_) => {
                tracing::error!(
                    request_id = %request.context.request_id,
                    "Rule evaluation panicked; denying"
                );
                DecisionResponse::deny("Policy evaluation error: rule evaluation aborted")
            }
        };

        tracing::debug!(
            request_id = %request.context.request_id,
            decision = %response.decision,
            policy_id = ?response.policy_id,
            reason = %response.reason,
            "Policy decision"
        );
        metrics::record_decision(
            &response.decision.to_string(),
            if response.policy_id.is_some() { "rule" } else { "default" },
        );
        response
    }
}

/// True when the rule's method list and path pattern accept the resource.
pub fn rule_applies(rule: &Rule, path: &str, method: &str) -> bool {
    let mc = &rule.match_conditions;
    method_allowed(&mc.methods, method) && glob_match(&mc.path_pattern, path)
}

/// Evaluate one rule against the request document.
pub fn evaluate_rule(rule: &Rule, document: &Value) -> RuleOutcome {
    if !rule.deny_if.is_empty() && all_conditions_match(document, &rule.deny_if) {
        return RuleOutcome::Deny;
    }
    if !rule.allow_if.is_empty() && all_conditions_match(document, &rule.allow_if) {
        return RuleOutcome::Allow;
    }
    RuleOutcome::Skip
}

/// Pure evaluation over an already-fetched candidate list.
pub fn evaluate_rules(request: &DecisionRequest, candidates: &[Rule]) -> DecisionResponse {
    let method = request.resource.method.to_ascii_uppercase();
    let mut applicable: Vec<Rule> = candidates
        .iter()
        .filter(|r| r.enabled && rule_applies(r, &request.resource.path, &method))
        .cloned()
        .collect();

    if applicable.is_empty() {
        return DecisionResponse::deny(NO_MATCHING_POLICY);
    }
    sort_by_precedence(&mut applicable);

    let document = match serde_json::to_value(request) {
        Ok(doc) => doc,
        Err(e) => return DecisionResponse::deny(format!("Policy evaluation error: {e}")),
    };

    for rule in &applicable {
        match evaluate_rule(rule, &document) {
            RuleOutcome::Deny => return DecisionResponse::deny_by(rule),
            RuleOutcome::Allow => return DecisionResponse::allow(rule),
            RuleOutcome::Skip => {
                tracing::trace!(rule_id = %rule.id, "Rule inconclusive");
            }
        }
    }

    DecisionResponse::deny(NO_EXPLICIT_DECISION)
}
