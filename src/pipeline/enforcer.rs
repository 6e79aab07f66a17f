//! The enforcement pipeline.
//!
//! Each request runs the stages in order and short-circuits to the terminal
//! step on the first failure. The terminal step always dispatches exactly one
//! audit record, emits the completion log event and records metrics.
//!
//! The request deadline and the body size limit are enforced here rather than
//! by tower layers, so both end in an audited terminal error.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method};
use futures_util::FutureExt;

use crate::audit::AuditDispatcher;
use crate::auth::{extract_bearer_token, IdentityVerifier};
use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, StartupError};
use crate::http::forwarder::{carries_body, ForwardRequest, ForwardResponse, Forwarder};
use crate::http::server::GatewayComponents;
use crate::observability::metrics;
use crate::pipeline::context::RequestContext;
use crate::pipeline::stage::Stage;
use crate::policy::{LogLevel, PolicyEngine};
use crate::routing::RouteResolver;
use crate::security::{RateLimitOutcome, RateLimiter};

/// One inbound request, already stripped of the API prefix.
#[derive(Debug)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Body,
    pub client_ip: Option<String>,
    pub request_id: String,
}

/// What the pipeline hands back to the HTTP layer.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub request_id: String,
    pub result: Result<ForwardResponse, GatewayError>,
    /// Present whenever the RATE_LIMIT stage ran, allowed or not.
    pub rate_limit: Option<RateLimitOutcome>,
}

pub struct EnforcementPipeline {
    verifier: IdentityVerifier,
    auth_scheme: String,
    routes: Arc<RouteResolver>,
    engine: PolicyEngine,
    limiter: RateLimiter,
    forwarder: Forwarder,
    audit: AuditDispatcher,
    clock: Arc<dyn Clock>,
    max_body_bytes: usize,
    request_timeout: Duration,
}

impl EnforcementPipeline {
    pub fn new(config: &GatewayConfig, components: &GatewayComponents) -> Result<Self, StartupError> {
        Ok(Self {
            verifier: IdentityVerifier::new(&config.auth),
            auth_scheme: config.auth.scheme.clone(),
            routes: Arc::new(RouteResolver::from_config(&config.routes)?),
            engine: PolicyEngine::new(components.repository.clone()),
            limiter: RateLimiter::new(
                components.counter_store.clone(),
                config.rate_limit.default_key_template.clone(),
            ),
            forwarder: Forwarder::new(&config.timeouts)?,
            audit: AuditDispatcher::new(components.audit_sink.clone()),
            clock: components.clock.clone(),
            max_body_bytes: config.listener.max_body_bytes,
            request_timeout: Duration::from_secs(config.timeouts.request_secs.max(1)),
        })
    }

    pub fn routes(&self) -> &RouteResolver {
        &self.routes
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    /// Run one request through every stage. Never panics and never returns
    /// without having dispatched its audit record.
    pub async fn handle(&self, req: InboundRequest) -> PipelineOutcome {
        let user_agent = req
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let mut ctx = RequestContext::new(
            req.request_id.clone(),
            self.clock.now(),
            req.method.clone(),
            req.path.clone(),
            req.client_ip.clone(),
            user_agent,
        );

        let guarded = AssertUnwindSafe(self.run(&mut ctx, req)).catch_unwind();
        let caught = tokio::time::timeout(self.request_timeout, guarded).await;
        let result = match caught {
            Ok(Ok(result)) => result,
            Err(_) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    stage = %ctx.stage,
                    timeout_secs = self.request_timeout.as_secs(),
                    "Request deadline exceeded"
                );
                Err(GatewayError::Timeout(self.request_timeout))
            }
            Ok(Err(payload)) => {
                let message = panic_message(payload);
                tracing::error!(
                    request_id = %ctx.request_id,
                    stage = %ctx.stage,
                    panic = %message,
                    "Pipeline stage panicked"
                );
                Err(GatewayError::Internal(message))
            }
        };

        self.finish(&ctx, &result);

        PipelineOutcome {
            request_id: ctx.request_id,
            result,
            rate_limit: ctx.rate_limit,
        }
    }

    async fn run(
        &self,
        ctx: &mut RequestContext,
        req: InboundRequest,
    ) -> Result<ForwardResponse, GatewayError> {
        ctx.enter(Stage::Authenticate);
        let authorization = req
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let token = extract_bearer_token(authorization, &self.auth_scheme)
            .ok_or(GatewayError::MissingToken)?;
        let claims = self
            .verifier
            .verify(token, ctx.now)
            .map_err(|e| GatewayError::InvalidToken(e.to_string()))?;
        ctx.claims = Some(claims.clone());

        ctx.enter(Stage::ResolveRoute);
        let route = self
            .routes
            .resolve(&ctx.path, ctx.method.as_str())?
            .clone();
        ctx.route = Some(route.clone());

        ctx.enter(Stage::EvaluatePolicy);
        let decision_request = ctx.decision_request(claims.clone());
        let decision = self.engine.evaluate(&decision_request).await;
        ctx.decision = Some(decision.clone());
        if !decision.is_allow() {
            return Err(GatewayError::AccessDenied {
                reason: decision.reason,
                policy_id: decision.policy_id,
            });
        }

        if let Some(obligation) = &decision.obligations.rate_limit {
            ctx.enter(Stage::RateLimit);
            // Fails open on store errors; the engine above fails closed.
            let outcome = self
                .limiter
                .check(
                    &claims,
                    obligation.limit,
                    obligation.window_seconds,
                    obligation.key.as_deref(),
                    ctx.now,
                )
                .await;
            ctx.rate_limit = Some(outcome.clone());
            if !outcome.allowed {
                return Err(GatewayError::RateLimited(outcome));
            }
        }

        ctx.enter(Stage::Forward);
        let body = if carries_body(&req.method) {
            Some(self.read_body(&req.headers, req.body).await?)
        } else {
            None
        };

        let response = self
            .forwarder
            .forward(ForwardRequest {
                target_url: route.target_url.clone(),
                method: req.method,
                path: req.path,
                query: req.query,
                headers: req.headers,
                body,
                strip_headers: route.strip_headers.clone(),
                request_id: ctx.request_id.clone(),
                client_ip: ctx.client_ip.clone(),
                require_mfa: ctx.requires_mfa(),
            })
            .await?;

        ctx.enter(Stage::Respond);
        Ok(response)
    }

    /// Buffer the request body up to the configured limit. A declared
    /// `content-length` over the limit is rejected before reading.
    async fn read_body(&self, headers: &HeaderMap, body: Body) -> Result<Bytes, GatewayError> {
        let limit = self.max_body_bytes;
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > limit as u64) {
            return Err(GatewayError::PayloadTooLarge { limit });
        }

        axum::body::to_bytes(body, limit).await.map_err(|e| {
            if exceeded_length_limit(&e) {
                GatewayError::PayloadTooLarge { limit }
            } else {
                GatewayError::Internal(format!("failed to read request body: {e}"))
            }
        })
    }

    /// Terminal step: audit, completion log, metrics.
    fn finish(&self, ctx: &RequestContext, result: &Result<ForwardResponse, GatewayError>) {
        let (status, reason, error) = match result {
            Ok(response) => (
                response.status.as_u16(),
                ctx.decision
                    .as_ref()
                    .map(|d| d.reason.clone())
                    .unwrap_or_default(),
                None,
            ),
            Err(e) => {
                let reason = match (&ctx.decision, e) {
                    (Some(d), GatewayError::AccessDenied { .. }) => d.reason.clone(),
                    _ => e.client_message(),
                };
                (e.status().as_u16(), reason, Some(e.to_string()))
            }
        };

        self.audit
            .dispatch(ctx.audit_record(status, reason, error.clone()));

        let level = match result {
            Ok(_) => ctx.log_level().unwrap_or(LogLevel::Info),
            Err(e) if e.status().is_server_error() => LogLevel::Error,
            Err(_) => LogLevel::Info,
        };
        log_completion(ctx, level, status, error.as_deref());

        metrics::record_request(ctx.method.as_str(), status, ctx.stage.as_str(), ctx.started);
    }
}

fn log_completion(ctx: &RequestContext, level: LogLevel, status: u16, error: Option<&str>) {
    macro_rules! emit {
        ($lvl:ident) => {
            tracing::$lvl!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                path = %ctx.path,
                service = %ctx.service(),
                stage = %ctx.stage,
                status,
                latency_ms = ctx.latency_ms(),
                error = error.unwrap_or(""),
                "Request completed"
            )
        };
    }
    match level {
        LogLevel::Debug => emit!(debug),
        LogLevel::Info => emit!(info),
        LogLevel::Warn => emit!(warn),
        LogLevel::Error => emit!(error),
    }
}

/// `to_bytes` reports an exceeded limit as a boxed `LengthLimitError`.
fn exceeded_length_limit(err: &axum::Error) -> bool {
    let root: &(dyn std::error::Error + 'static) = err;
    let mut source = Some(root);
    while let Some(e) = source {
        if e.to_string() == "length limit exceeded" {
            return true;
        }
        source = e.source();
    }
    false
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    use crate::audit::MemoryAuditSink;
    use crate::auth::IdentityClaims;
    use crate::clock::FixedClock;
    use crate::config::RouteConfig;
    use crate::policy::{InMemoryRuleRepository, RepositoryError, Rule, RuleRepository};
    use crate::security::{CounterStore, CounterStoreError, InMemoryCounterStore};

    const SECRET: &str = "pipeline-test-secret";

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_040, 0).unwrap()
    }

    /// A port nothing listens on, so FORWARD fails fast.
    fn dead_target() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.jwt_secret = SECRET.into();
        config.routes = vec![RouteConfig {
            service: "echo-service".into(),
            path_pattern: "/echo/*".into(),
            target_url: dead_target(),
            methods: vec!["*".into()],
            strip_headers: vec!["cookie".into()],
        }];
        config
    }

    fn rule(value: serde_json::Value) -> Rule {
        serde_json::from_value(value).unwrap()
    }

    fn allow_role(role: &str, obligations: serde_json::Value) -> Rule {
        rule(json!({
            "id": format!("allow-{role}"),
            "name": format!("allow {role}"),
            "matchConditions": { "service": "echo-service", "pathPattern": "*", "methods": ["*"] },
            "allowIf": [{ "field": "subject.role", "operator": "eq", "value": role }],
            "obligations": obligations,
        }))
    }

    struct Harness {
        pipeline: EnforcementPipeline,
        sink: Arc<MemoryAuditSink>,
        clock: Arc<FixedClock>,
    }

    fn harness_full(
        repository: Arc<dyn RuleRepository>,
        counter_store: Arc<dyn CounterStore>,
        config: GatewayConfig,
    ) -> Harness {
        let sink = Arc::new(MemoryAuditSink::new());
        let clock = Arc::new(FixedClock::new(now()));
        let components = GatewayComponents {
            repository,
            audit_sink: sink.clone(),
            counter_store,
            clock: clock.clone(),
        };
        Harness {
            pipeline: EnforcementPipeline::new(&config, &components).unwrap(),
            sink,
            clock,
        }
    }

    fn harness_with(repository: Arc<dyn RuleRepository>) -> Harness {
        harness_full(repository, Arc::new(InMemoryCounterStore::new()), config())
    }

    fn harness(rules: Vec<Rule>) -> Harness {
        harness_with(Arc::new(InMemoryRuleRepository::from_rules(rules)))
    }

    fn token(role: &str, exp_offset: i64) -> String {
        IdentityVerifier::from_secret(SECRET)
            .issue(&IdentityClaims {
                sub: "user-1".into(),
                email: "user-1@example.com".into(),
                role: role.into(),
                tenant: Some("acme".into()),
                scopes: None,
                iat: now().timestamp(),
                exp: now().timestamp() + exp_offset,
                iss: None,
            })
            .unwrap()
    }

    fn request(path: &str, auth: Option<String>) -> InboundRequest {
        let mut headers = HeaderMap::new();
        if let Some(t) = auth {
            headers.insert(header::AUTHORIZATION, format!("Bearer {t}").parse().unwrap());
        }
        InboundRequest {
            method: Method::GET,
            path: path.into(),
            query: None,
            headers,
            body: Body::empty(),
            client_ip: Some("10.1.2.3".into()),
            request_id: "req-test".into(),
        }
    }

    async fn single_audit(h: &Harness) -> crate::audit::AuditRecord {
        assert!(h.sink.wait_for(1, Duration::from_secs(1)).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let records = h.sink.records();
        assert_eq!(records.len(), 1);
        records.into_iter().next().unwrap()
    }

    fn code(outcome: &PipelineOutcome) -> &'static str {
        outcome.result.as_ref().unwrap_err().client_code()
    }

    #[tokio::test]
    async fn test_missing_token() {
        let h = harness(vec![]);
        let out = h.pipeline.handle(request("/echo/hi", None)).await;
        assert_eq!(code(&out), "MISSING_TOKEN");

        let record = single_audit(&h).await;
        assert_eq!(record.status_code, 401);
        assert_eq!(record.subject.id, "anonymous");
        assert_eq!(record.stage, "AUTHENTICATE");
    }

    #[tokio::test]
    async fn test_invalid_and_expired_token() {
        let h = harness(vec![]);
        let out = h.pipeline.handle(request("/echo/hi", Some("garbage".into()))).await;
        assert_eq!(code(&out), "INVALID_TOKEN");

        let expired = token("admin", 60);
        h.clock.advance(chrono::Duration::seconds(60));
        let out = h.pipeline.handle(request("/echo/hi", Some(expired))).await;
        assert_eq!(code(&out), "INVALID_TOKEN");
        assert!(h.sink.wait_for(2, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_no_route() {
        let h = harness(vec![]);
        let out = h.pipeline.handle(request("/other/x", Some(token("admin", 300)))).await;
        assert_eq!(code(&out), "NO_ROUTE");

        let record = single_audit(&h).await;
        assert_eq!(record.status_code, 404);
        assert_eq!(record.subject.id, "user-1");
        assert_eq!(record.resource.service, "unknown");
    }

    #[tokio::test]
    async fn test_default_deny() {
        let h = harness(vec![]);
        let out = h.pipeline.handle(request("/echo/hi", Some(token("admin", 300)))).await;
        match &out.result {
            Err(GatewayError::AccessDenied { reason, policy_id }) => {
                assert_eq!(reason, "No matching policy found");
                assert!(policy_id.is_none());
            }
            other => panic!("expected denial, got {other:?}"),
        }

        let record = single_audit(&h).await;
        assert_eq!(record.status_code, 403);
        assert_eq!(record.reason, "No matching policy found");
        assert_eq!(record.stage, "EVALUATE_POLICY");
    }

    #[tokio::test]
    async fn test_allowed_request_reaches_forward() {
        let h = harness(vec![allow_role("admin", json!({ "requireMfa": true }))]);
        let out = h.pipeline.handle(request("/echo/hi", Some(token("admin", 300)))).await;
        assert_eq!(code(&out), "PROXY_ERROR");

        let record = single_audit(&h).await;
        assert_eq!(record.status_code, 500);
        assert_eq!(record.stage, "FORWARD");
        assert_eq!(record.policy_id.as_deref(), Some("allow-admin"));
        assert!(record.require_mfa);
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn test_rate_limited_after_quota() {
        let obligations = json!({ "rateLimit": { "limit": 1, "windowSeconds": 60 } });
        let h = harness(vec![allow_role("user", obligations)]);

        let first = h.pipeline.handle(request("/echo/a", Some(token("user", 300)))).await;
        assert_eq!(code(&first), "PROXY_ERROR");
        assert_eq!(first.rate_limit.as_ref().unwrap().remaining, 0);

        let second = h.pipeline.handle(request("/echo/a", Some(token("user", 300)))).await;
        assert_eq!(code(&second), "RATE_LIMITED");
        let rl = second.rate_limit.unwrap();
        assert!(!rl.allowed);
        assert_eq!(rl.key, "rate_limit:user:acme");

        assert!(h.sink.wait_for(2, Duration::from_secs(1)).await);
        let records = h.sink.records();
        let limited = records.iter().find(|r| r.status_code == 429).unwrap();
        assert_eq!(limited.rate_limit.as_ref().unwrap().remaining, 0);
    }

    struct PanickingRepository;

    #[async_trait]
    impl RuleRepository for PanickingRepository {
        async fn find_candidate_rules(
            &self,
            _service: &str,
            _tenant: Option<&str>,
        ) -> Result<Vec<Rule>, RepositoryError> {
            panic!("repository exploded")
        }

        async fn rule_count(&self) -> Result<usize, RepositoryError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_repository_panic_is_denied_and_audited() {
        let h = harness_with(Arc::new(PanickingRepository));
        let out = h.pipeline.handle(request("/echo/hi", Some(token("admin", 300)))).await;
        assert_eq!(code(&out), "ACCESS_DENIED");

        let record = single_audit(&h).await;
        assert_eq!(record.status_code, 403);
        assert_eq!(record.stage, "EVALUATE_POLICY");
        assert!(record.reason.starts_with("Policy evaluation error"));
    }

    /// Stores whose increment never completes normally.
    enum BrokenStore {
        Panics,
        Hangs,
    }

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn increment(&self, _: &str, _: i64, _: i64) -> Result<u64, CounterStoreError> {
            match self {
                BrokenStore::Panics => panic!("counter store exploded"),
                BrokenStore::Hangs => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(1)
                }
            }
        }
    }

    fn limited_repository() -> Arc<dyn RuleRepository> {
        let obligations = json!({ "rateLimit": { "limit": 5, "windowSeconds": 60 } });
        Arc::new(InMemoryRuleRepository::from_rules(vec![allow_role("admin", obligations)]))
    }

    #[tokio::test]
    async fn test_stage_panic_becomes_internal_error_and_is_audited() {
        let h = harness_full(limited_repository(), Arc::new(BrokenStore::Panics), config());
        let out = h.pipeline.handle(request("/echo/hi", Some(token("admin", 300)))).await;
        assert_eq!(code(&out), "INTERNAL_GATEWAY_ERROR");

        let record = single_audit(&h).await;
        assert_eq!(record.status_code, 500);
        assert_eq!(record.stage, "RATE_LIMIT");
        assert!(record.error.unwrap().contains("counter store exploded"));
    }

    #[tokio::test]
    async fn test_request_deadline_is_audited() {
        let mut cfg = config();
        cfg.timeouts.request_secs = 1;
        let h = harness_full(limited_repository(), Arc::new(BrokenStore::Hangs), cfg);

        let out = h.pipeline.handle(request("/echo/hi", Some(token("admin", 300)))).await;
        assert_eq!(code(&out), "GATEWAY_TIMEOUT");

        let record = single_audit(&h).await;
        assert_eq!(record.status_code, 504);
        assert_eq!(record.stage, "RATE_LIMIT");
        assert_eq!(record.subject.id, "user-1");
    }

    fn post(path: &str, body: Body, content_length: Option<usize>) -> InboundRequest {
        let mut req = request(path, Some(token("admin", 300)));
        req.method = Method::POST;
        req.body = body;
        if let Some(len) = content_length {
            req.headers.insert(header::CONTENT_LENGTH, len.into());
        }
        req
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_and_audited() {
        let mut cfg = config();
        cfg.listener.max_body_bytes = 16;
        let repo = Arc::new(InMemoryRuleRepository::from_rules(vec![allow_role("admin", json!({}))]));
        let h = harness_full(repo, Arc::new(InMemoryCounterStore::new()), cfg);

        // Declared length over the limit.
        let declared = h
            .pipeline
            .handle(post("/echo/up", Body::from("x".repeat(64)), Some(64)))
            .await;
        assert_eq!(code(&declared), "PAYLOAD_TOO_LARGE");

        // No declared length; the limit trips while buffering.
        let streamed = h
            .pipeline
            .handle(post("/echo/up", Body::from("x".repeat(64)), None))
            .await;
        assert_eq!(code(&streamed), "PAYLOAD_TOO_LARGE");

        assert!(h.sink.wait_for(2, Duration::from_secs(1)).await);
        let records = h.sink.records();
        assert!(records.iter().all(|r| r.status_code == 413 && r.stage == "FORWARD"));
    }
}