//! Downstream request forwarding.
//!
//! # Responsibilities
//! - Build the downstream URL from the route target and the stripped path
//! - Sanitize headers (see security::headers)
//! - Send the body only for POST/PUT/PATCH
//! - Return status, headers and body verbatim
//!
//! # Design Decisions
//! - Never retries; a transport failure is returned as `ProxyError`
//! - Downstream status codes (including 5xx) are relayed, not reinterpreted

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::config::TimeoutConfig;
use crate::security::headers::{sanitize_request_headers, X_REQUIRE_MFA};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("downstream request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("failed to read downstream body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("invalid downstream request: {0}")]
    InvalidRequest(String),
}

/// Everything needed to send one request downstream.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub target_url: Url,
    pub method: Method,
    /// Path relative to the route target, starting with `/`.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub strip_headers: Vec<String>,
    pub request_id: String,
    pub client_ip: Option<String>,
    pub require_mfa: bool,
}

#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub fn carries_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// Join the target base URL and the request path.
pub fn downstream_url(target: &Url, path: &str, query: Option<&str>) -> Result<Url, ProxyError> {
    let base = target.as_str().trim_end_matches('/');
    let path = if path.starts_with('/') || path.is_empty() {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let mut url = Url::parse(&format!("{base}{path}"))
        .map_err(|e| ProxyError::InvalidRequest(format!("bad downstream url: {e}")))?;

    if let Some(q) = query.filter(|q| !q.is_empty()) {
        let merged = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{q}"),
            _ => q.to_string(),
        };
        url.set_query(Some(&merged));
    }
    Ok(url)
}

#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .timeout(Duration::from_secs(timeouts.upstream_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    pub async fn forward(&self, req: ForwardRequest) -> Result<ForwardResponse, ProxyError> {
        let url = downstream_url(&req.target_url, &req.path, req.query.as_deref())?;

        let mut headers = sanitize_request_headers(
            &req.headers,
            &req.strip_headers,
            &req.request_id,
            req.client_ip.as_deref(),
        );
        // Only the gateway decides whether step-up is required.
        headers.remove(X_REQUIRE_MFA);
        if req.require_mfa {
            headers.insert(
                HeaderName::from_static(X_REQUIRE_MFA),
                HeaderValue::from_static("true"),
            );
        }

        tracing::debug!(
            request_id = %req.request_id,
            method = %req.method,
            url = %url,
            "Forwarding request"
        );

        let mut builder = self.client.request(req.method.clone(), url).headers(headers);
        if carries_body(&req.method) {
            if let Some(body) = req.body {
                builder = builder.body(body);
            }
        }

        let response = builder.send().await.map_err(ProxyError::Transport)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(ProxyError::Body)?;

        Ok(ForwardResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_downstream_url_join() {
        let url = downstream_url(&target("http://127.0.0.1:7070/"), "/echo/hi", None).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:7070/echo/hi");

        let url = downstream_url(&target("http://svc:80/base"), "/x", Some("a=1&b=2")).unwrap();
        assert_eq!(url.as_str(), "http://svc/base/x?a=1&b=2");

        let url = downstream_url(&target("http://svc/?k=v"), "/x", Some("a=1")).unwrap();
        assert_eq!(url.query(), Some("k=v&a=1"));
    }

    #[test]
    fn test_body_methods() {
        assert!(carries_body(&Method::POST));
        assert!(carries_body(&Method::PUT));
        assert!(carries_body(&Method::PATCH));
        assert!(!carries_body(&Method::GET));
        assert!(!carries_body(&Method::DELETE));
    }

    #[tokio::test]
    async fn test_connection_refused_is_proxy_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = Forwarder::new(&TimeoutConfig::default()).unwrap();
        let result = forwarder
            .forward(ForwardRequest {
                target_url: target(&format!("http://{addr}")),
                method: Method::GET,
                path: "/x".into(),
                query: None,
                headers: HeaderMap::new(),
                body: None,
                strip_headers: vec![],
                request_id: "req-1".into(),
                client_ip: None,
                require_mfa: false,
            })
            .await;

        assert!(matches!(result, Err(ProxyError::Transport(_))));
    }
}
