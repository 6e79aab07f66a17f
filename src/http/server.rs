//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the health and gateway handlers
//! - Wire up middleware (tracing, request ID)
//! - Hand every request under the API prefix to the enforcement pipeline on
//!   its own task, so a dropped connection cannot cancel it before the audit
//!   record is written
//! - Run the counter-store sweeper alongside the listener
//! - Serve until the shutdown signal fires

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, StartupError};
use crate::pipeline::{EnforcementPipeline, InboundRequest};
use crate::policy::RuleRepository;
use crate::security::headers::X_REQUEST_ID;
use crate::security::{CounterStore, InMemoryCounterStore};

pub const SERVICE_NAME: &str = "zt-gateway";

/// The gateway's injectable collaborators.
#[derive(Clone)]
pub struct GatewayComponents {
    pub repository: Arc<dyn RuleRepository>,
    pub audit_sink: Arc<dyn AuditSink>,
    pub counter_store: Arc<dyn CounterStore>,
    pub clock: Arc<dyn Clock>,
}

impl GatewayComponents {
    /// Process-local defaults around the given repository: tracing audit
    /// sink, in-memory counters, system clock.
    pub fn in_memory(repository: Arc<dyn RuleRepository>) -> Self {
        Self {
            repository,
            audit_sink: Arc::new(TracingAuditSink),
            counter_store: Arc::new(InMemoryCounterStore::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<EnforcementPipeline>,
    pub repository: Arc<dyn RuleRepository>,
    pub clock: Arc<dyn Clock>,
    pub api_prefix: Arc<str>,
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    components: GatewayComponents,
}

impl GatewayServer {
    /// Create a new server. Fails on unparsable route targets or a client
    /// that cannot be built.
    pub fn new(config: GatewayConfig, components: GatewayComponents) -> Result<Self, StartupError> {
        let pipeline = Arc::new(EnforcementPipeline::new(&config, &components)?);

        let state = AppState {
            pipeline,
            repository: components.repository.clone(),
            clock: components.clock.clone(),
            api_prefix: Arc::from(normalize_prefix(&config.listener.api_prefix)),
        };

        let router = Self::build_router(state);
        Ok(Self {
            router,
            config,
            components,
        })
    }

    /// Build the Axum router with all middleware layers. The request deadline
    /// and body limit live in the pipeline.
    fn build_router(state: AppState) -> Router {
        let prefix = state.api_prefix.to_string();
        let (root, wildcard) = if prefix.is_empty() {
            ("/".to_string(), "/{*path}".to_string())
        } else {
            (prefix.clone(), format!("{prefix}/{{*path}}"))
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/ready", get(ready_handler))
            .route(&root, any(gateway_handler))
            .route(&wildcard, any(gateway_handler))
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// The router, for serving it some other way.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            api_prefix = %self.config.listener.api_prefix,
            routes = self.config.routes.len(),
            "Gateway starting"
        );

        let sweeper = spawn_counter_sweeper(
            self.components.counter_store.clone(),
            self.components.clock.clone(),
            Duration::from_secs(self.config.rate_limit.sweep_interval_secs.max(1)),
            shutdown.resubscribe(),
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        sweeper.abort();
        tracing::info!("Gateway stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// `"/api/"` → `"/api"`, `"/"` → `""`.
fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_end_matches('/').to_string()
}

/// Path relative to the API prefix, always starting with `/`.
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    match path.strip_prefix(prefix) {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

fn spawn_counter_sweeper(
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = store.evict_expired(clock.now().timestamp_millis());
                    if evicted > 0 {
                        tracing::debug!(evicted, "Expired rate-limit counters evicted");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}

/// Every request under the API prefix.
async fn gateway_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();

    // Absent when the router is driven without a socket (tests).
    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let path = strip_prefix(parts.uri.path(), &state.api_prefix).to_string();

    let inbound = InboundRequest {
        method: parts.method,
        path,
        query: parts.uri.query().map(String::from),
        headers: parts.headers,
        body,
        client_ip,
        request_id,
    };

    let pipeline = state.pipeline.clone();
    let request_id = inbound.request_id.clone();
    match tokio::spawn(async move { pipeline.handle(inbound).await }).await {
        Ok(outcome) => outcome.into_response(),
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Pipeline task failed");
            GatewayError::Internal(e.to_string()).to_response(&request_id)
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": state.clock.now().to_rfc3339(),
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ready_handler(State(state): State<AppState>) -> Response {
    match state.repository.rule_count().await {
        Ok(rules) => Json(json!({
            "status": "ready",
            "timestamp": state.clock.now().to_rfc3339(),
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "rules": rules,
            "routes": state.pipeline.routes().len(),
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "service": SERVICE_NAME,
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::policy::InMemoryRuleRepository;
    use tower::ServiceExt;

    #[test]
    fn test_prefix_handling() {
        assert_eq!(normalize_prefix("/api/"), "/api");
        assert_eq!(normalize_prefix("/"), "");

        assert_eq!(strip_prefix("/api/echo/hi", "/api"), "/echo/hi");
        assert_eq!(strip_prefix("/api", "/api"), "/");
        assert_eq!(strip_prefix("/apix/echo", "/api"), "/apix/echo");
        assert_eq!(strip_prefix("/echo", ""), "/echo");
    }

    fn test_server(audit: Arc<MemoryAuditSink>) -> GatewayServer {
        let mut config = GatewayConfig::with_default_routes();
        config.auth.jwt_secret = "router-test-secret".into();
        let components = GatewayComponents {
            repository: Arc::new(InMemoryRuleRepository::from_rules(Vec::new())),
            audit_sink: audit,
            counter_store: Arc::new(InMemoryCounterStore::new()),
            clock: Arc::new(SystemClock),
        };
        GatewayServer::new(config, components).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_route() {
        let audit = Arc::new(MemoryAuditSink::new());
        let router = test_server(audit.clone()).router();

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], SERVICE_NAME);
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn test_ready_route_reports_counts() {
        let router = test_server(Arc::new(MemoryAuditSink::new())).router();

        let response = router
            .oneshot(Request::get("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["rules"], 0);
        assert_eq!(body["routes"], 1);
    }

    #[tokio::test]
    async fn test_prefixed_request_enters_pipeline() {
        let audit = Arc::new(MemoryAuditSink::new());
        let router = test_server(audit.clone()).router();

        let response = router
            .oneshot(Request::get("/api/echo/hi").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let request_id = response.headers()[X_REQUEST_ID].to_str().unwrap().to_string();
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "MISSING_TOKEN");
        assert_eq!(body["error"]["requestId"], request_id.as_str());

        assert!(audit.wait_for(1, Duration::from_secs(1)).await);
        assert_eq!(audit.records()[0].request_id, request_id);
    }

    #[tokio::test]
    async fn test_path_outside_prefix_is_not_handled() {
        let audit = Arc::new(MemoryAuditSink::new());
        let router = test_server(audit.clone()).router();

        let response = router
            .oneshot(Request::get("/echo/hi").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(audit.is_empty());
    }
}
