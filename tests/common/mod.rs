//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
    routing::any,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use zt_gateway::audit::MemoryAuditSink;
use zt_gateway::auth::{IdentityClaims, IdentityVerifier};
use zt_gateway::clock::SystemClock;
use zt_gateway::config::{GatewayConfig, RouteConfig};
use zt_gateway::policy::{InMemoryRuleRepository, Rule};
use zt_gateway::security::{CounterStore, InMemoryCounterStore};
use zt_gateway::{GatewayComponents, GatewayServer, Shutdown};

pub const SECRET: &str = "integration-test-secret";

/// Echo handler: reports what the backend actually received.
async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let headers: BTreeMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Start an echo backend on an ephemeral port.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/", any(echo))
        .route("/{*path}", any(echo));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn slow_echo(
    State(delay): State<Duration>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    tokio::time::sleep(delay).await;
    echo(method, uri, headers, body).await
}

/// Start an echo backend that waits `delay` before answering.
pub async fn start_slow_backend(delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/", any(slow_echo))
        .route("/{*path}", any(slow_echo))
        .with_state(delay);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// A port with nothing listening.
pub fn dead_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn echo_route(backend: SocketAddr) -> RouteConfig {
    RouteConfig {
        service: "echo-service".into(),
        path_pattern: "/echo/*".into(),
        target_url: format!("http://{backend}"),
        methods: vec!["*".into()],
        strip_headers: vec!["authorization".into(), "cookie".into()],
    }
}

pub fn rule(value: Value) -> Rule {
    serde_json::from_value(value).unwrap()
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub audit: Arc<MemoryAuditSink>,
    pub shutdown: Shutdown,
    pub client: reqwest::Client,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(routes: Vec<RouteConfig>, rules: Vec<Rule>) -> TestGateway {
    start_gateway_with_store(routes, rules, Arc::new(InMemoryCounterStore::new())).await
}

pub async fn start_gateway_with_store(
    routes: Vec<RouteConfig>,
    rules: Vec<Rule>,
    counter_store: Arc<dyn CounterStore>,
) -> TestGateway {
    start_gateway_configured(routes, rules, counter_store, |_| {}).await
}

/// Start a gateway after letting `tweak` adjust the config.
pub async fn start_gateway_configured(
    routes: Vec<RouteConfig>,
    rules: Vec<Rule>,
    counter_store: Arc<dyn CounterStore>,
    tweak: impl FnOnce(&mut GatewayConfig),
) -> TestGateway {
    let mut config = GatewayConfig::default();
    config.auth.jwt_secret = SECRET.into();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.routes = routes;
    tweak(&mut config);

    let audit = Arc::new(MemoryAuditSink::new());
    let components = GatewayComponents {
        repository: Arc::new(InMemoryRuleRepository::from_rules(rules)),
        audit_sink: audit.clone(),
        counter_store,
        clock: Arc::new(SystemClock),
    };

    let server = GatewayServer::new(config, components).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    TestGateway {
        addr,
        audit,
        shutdown,
        client,
    }
}

pub fn token_for(role: &str, tenant: Option<&str>, ttl_secs: i64) -> String {
    let iat = Utc::now().timestamp();
    IdentityVerifier::from_secret(SECRET)
        .issue(&IdentityClaims {
            sub: format!("{role}-user"),
            email: format!("{role}@example.com"),
            role: role.into(),
            tenant: tenant.map(String::from),
            scopes: None,
            iat,
            exp: iat + ttl_secs,
            iss: None,
        })
        .unwrap()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}
