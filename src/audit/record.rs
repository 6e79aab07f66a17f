//! The per-request audit record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::IdentityClaims;
use crate::policy::{Decision, ResourceDescriptor};
use crate::security::RateLimitOutcome;

pub const ANONYMOUS_SUBJECT: &str = "anonymous";
pub const UNAUTHENTICATED_ROLE: &str = "unauthenticated";

/// Who made the request, as far as the pipeline got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub id: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

impl SubjectSummary {
    pub fn anonymous() -> Self {
        Self {
            id: ANONYMOUS_SUBJECT.to_string(),
            role: UNAUTHENTICATED_ROLE.to_string(),
            tenant: None,
        }
    }
}

impl From<&IdentityClaims> for SubjectSummary {
    fn from(claims: &IdentityClaims) -> Self {
        Self {
            id: claims.sub.clone(),
            role: claims.role.clone(),
            tenant: claims.tenant.clone(),
        }
    }
}

impl Default for SubjectSummary {
    fn default() -> Self {
        Self::anonymous()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSnapshot {
    pub key: String,
    pub limit: u64,
    pub window_seconds: u64,
    pub remaining: u64,
    pub reset_time: String,
    pub fail_open: bool,
}

impl From<&RateLimitOutcome> for RateLimitSnapshot {
    fn from(outcome: &RateLimitOutcome) -> Self {
        Self {
            key: outcome.key.clone(),
            limit: outcome.limit,
            window_seconds: outcome.window_seconds,
            remaining: outcome.remaining,
            reset_time: outcome.reset_time_iso(),
            fail_open: outcome.fail_open,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Immutable once built; ownership moves to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Uuid,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub subject: SubjectSummary,
    pub resource: ResourceDescriptor,
    /// Absent when the pipeline stopped before policy evaluation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    pub latency_ms: u64,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSnapshot>,
    pub context: AuditContext,
    pub require_mfa: bool,
    /// Pipeline stage the request exited from.
    pub stage: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_default() {
        let s = SubjectSummary::default();
        assert_eq!(s.id, "anonymous");
        assert_eq!(s.role, "unauthenticated");
        assert!(s.tenant.is_none());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = AuditRecord {
            id: Uuid::nil(),
            request_id: "req-1".into(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            subject: SubjectSummary::anonymous(),
            resource: ResourceDescriptor {
                service: "unknown".into(),
                path: "/echo".into(),
                method: "GET".into(),
            },
            decision: Some(Decision::Deny),
            reason: "Missing token".into(),
            policy_id: None,
            latency_ms: 3,
            status_code: 401,
            rate_limit: None,
            context: AuditContext::default(),
            require_mfa: false,
            stage: "AUTHENTICATE",
            error: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["requestId"], "req-1");
        assert_eq!(json["statusCode"], 401);
        assert_eq!(json["decision"], "DENY");
        assert_eq!(json["subject"]["role"], "unauthenticated");
        assert!(json.get("policyId").is_none());
    }
}
