//! Rule set and decision data model.
//!
//! Wire shapes are camelCase to match rule documents authored for the
//! administrative tooling (`matchConditions.pathPattern`, `denyIf`, ...).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::IdentityClaims;

/// A named, prioritized unit of access policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher is evaluated first.
    #[serde(default = "default_priority")]
    pub priority: i64,
    pub match_conditions: MatchConditions,
    /// Conjunctive list; a full match denies.
    #[serde(default)]
    pub deny_if: Vec<Condition>,
    /// Conjunctive list; a full match allows.
    #[serde(default)]
    pub allow_if: Vec<Condition>,
    #[serde(default)]
    pub obligations: Obligations,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Tie-breaker among equal priorities: newest first.
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i64 {
    100
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchConditions {
    /// Exact service name or `*`.
    pub service: String,
    /// Glob over the resource path.
    pub path_pattern: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    /// Restricts the rule to one tenant; absent means any tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// `field operator value` over a dotted path into the decision request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// Comparison operators. Names outside the known set deserialize to
/// `Unknown` and evaluate false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Eq,
    Neq,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    Gt,
    Lt,
    Gte,
    Lte,
    Unknown(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Gte => "gte",
            Operator::Lte => "lte",
            Operator::Unknown(name) => name,
        }
    }
}

impl From<String> for Operator {
    fn from(value: String) -> Self {
        match value.as_str() {
            "eq" => Operator::Eq,
            "neq" => Operator::Neq,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            "contains" => Operator::Contains,
            "starts_with" => Operator::StartsWith,
            "ends_with" => Operator::EndsWith,
            "gt" => Operator::Gt,
            "lt" => Operator::Lt,
            "gte" => Operator::Gte,
            "lte" => Operator::Lte,
            _ => Operator::Unknown(value),
        }
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side-effect requirements attached to an ALLOW.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obligations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitObligation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_mfa: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
}

impl Obligations {
    pub fn requires_mfa(&self) -> bool {
        self.require_mfa.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitObligation {
    /// Key template; the limiter's default template applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub limit: u64,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// What is being accessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub service: String,
    pub path: String,
    pub method: String,
}

/// Request metadata addressable as `context.*` in conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionContext {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

/// Input of the decision engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub subject: IdentityClaims,
    pub resource: ResourceDescriptor,
    pub context: DecisionContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Allow,
    Deny,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => f.write_str("ALLOW"),
            Decision::Deny => f.write_str("DENY"),
        }
    }
}

/// Output of the decision engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    pub decision: Decision,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(default)]
    pub obligations: Obligations,
}

impl DecisionResponse {
    pub fn allow(rule: &Rule) -> Self {
        Self {
            decision: Decision::Allow,
            reason: format!("Policy \"{}\" allowed the request", rule.name),
            policy_id: Some(rule.id.clone()),
            obligations: rule.obligations.clone(),
        }
    }

    pub fn deny_by(rule: &Rule) -> Self {
        Self {
            decision: Decision::Deny,
            reason: format!("Policy \"{}\" denied the request", rule.name),
            policy_id: Some(rule.id.clone()),
            obligations: Obligations::default(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: reason.into(),
            policy_id: None,
            obligations: Obligations::default(),
        }
    }

    pub fn is_allow(&self) -> bool {
        self.decision == Decision::Allow
    }
}
