//! Request-scoped state threaded through the pipeline stages.

use std::time::Instant;

use axum::http::Method;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::{AuditContext, AuditRecord, RateLimitSnapshot, SubjectSummary};
use crate::auth::IdentityClaims;
use crate::pipeline::stage::Stage;
use crate::policy::{
    DecisionContext, DecisionRequest, DecisionResponse, LogLevel, ResourceDescriptor,
};
use crate::routing::RouteDescriptor;
use crate::security::RateLimitOutcome;

/// Service name recorded before a route has been resolved.
pub const UNRESOLVED_SERVICE: &str = "unknown";

/// Everything the pipeline has established about one request so far.
///
/// Owned by the request's task; dropped when the request completes.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    /// The single clock reading for this request.
    pub now: DateTime<Utc>,
    pub started: Instant,
    pub stage: Stage,
    pub method: Method,
    pub path: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub claims: Option<IdentityClaims>,
    pub route: Option<RouteDescriptor>,
    pub decision: Option<DecisionResponse>,
    pub rate_limit: Option<RateLimitOutcome>,
}

impl RequestContext {
    pub fn new(
        request_id: String,
        now: DateTime<Utc>,
        method: Method,
        path: String,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            request_id,
            now,
            started: Instant::now(),
            stage: Stage::Start,
            method,
            path,
            client_ip,
            user_agent,
            claims: None,
            route: None,
            decision: None,
            rate_limit: None,
        }
    }

    pub fn enter(&mut self, stage: Stage) {
        tracing::trace!(request_id = %self.request_id, stage = %stage, "Entering stage");
        self.stage = stage;
    }

    pub fn service(&self) -> &str {
        self.route
            .as_ref()
            .map(|r| r.service.as_str())
            .unwrap_or(UNRESOLVED_SERVICE)
    }

    pub fn resource(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            service: self.service().to_string(),
            path: self.path.clone(),
            method: self.method.as_str().to_uppercase(),
        }
    }

    /// Build the engine input. Only valid once authentication succeeded.
    pub fn decision_request(&self, subject: IdentityClaims) -> DecisionRequest {
        let tenant = subject.tenant.clone();
        DecisionRequest {
            subject,
            resource: self.resource(),
            context: DecisionContext {
                ip: self.client_ip.clone().unwrap_or_else(|| "unknown".to_string()),
                user_agent: self.user_agent.clone(),
                timestamp: self.now,
                request_id: self.request_id.clone(),
                tenant,
            },
        }
    }

    pub fn requires_mfa(&self) -> bool {
        self.decision
            .as_ref()
            .map(|d| d.is_allow() && d.obligations.requires_mfa())
            .unwrap_or(false)
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        self.decision.as_ref().and_then(|d| d.obligations.log_level)
    }

    pub fn latency_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Snapshot the context into the request's single audit record.
    pub fn audit_record(&self, status_code: u16, reason: String, error: Option<String>) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            request_id: self.request_id.clone(),
            timestamp: self.now,
            subject: self
                .claims
                .as_ref()
                .map(SubjectSummary::from)
                .unwrap_or_default(),
            resource: self.resource(),
            decision: self.decision.as_ref().map(|d| d.decision),
            reason,
            policy_id: self.decision.as_ref().and_then(|d| d.policy_id.clone()),
            latency_ms: self.latency_ms(),
            status_code,
            rate_limit: self.rate_limit.as_ref().map(RateLimitSnapshot::from),
            context: AuditContext {
                ip: self.client_ip.clone(),
                user_agent: self.user_agent.clone(),
            },
            require_mfa: self.requires_mfa(),
            stage: self.stage.as_str(),
            error,
        }
    }
}
