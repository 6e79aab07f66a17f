//! Fixed-window rate limiting keyed by identity.
//!
//! Windows are aligned to wall-clock multiples of `window_seconds`. The
//! increment-and-check happens in the counter store as one atomic step.
//!
//! Store failures FAIL OPEN: the request is allowed with the full limit as
//! remaining. This is the deliberate opposite of the policy engine, which
//! fails closed.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use serde::Serialize;

use crate::auth::IdentityClaims;
use crate::observability::metrics;
use crate::security::counter_store::CounterStore;

pub const DEFAULT_KEY_TEMPLATE: &str = "rate_limit:{subject.role}:{subject.tenant}";

/// Longest accepted window (one leap year). Rule loading rejects longer
/// windows and the limiter clamps to it.
pub const MAX_WINDOW_SECONDS: u64 = 366 * 24 * 60 * 60;

/// Result of one rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_time: DateTime<Utc>,
    pub limit: u64,
    pub window_seconds: u64,
    pub key: String,
    /// True when the store could not be reached and the check was skipped.
    pub fail_open: bool,
}

impl RateLimitOutcome {
    pub fn reset_time_iso(&self) -> String {
        self.reset_time.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    default_key_template: String,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, default_key_template: impl Into<String>) -> Self {
        Self {
            store,
            default_key_template: default_key_template.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Count one request for `subject` against `limit` per `window_seconds`.
    pub async fn check(
        &self,
        subject: &IdentityClaims,
        limit: u64,
        window_seconds: u64,
        key_template: Option<&str>,
        now: DateTime<Utc>,
    ) -> RateLimitOutcome {
        let template = key_template.unwrap_or(&self.default_key_template);
        let key = resolve_key_template(template, subject);

        let window_seconds = window_seconds.clamp(1, MAX_WINDOW_SECONDS);
        let window_ms = window_millis(window_seconds);
        let now_ms = now.timestamp_millis();
        let window_start_ms = now_ms - now_ms.rem_euclid(window_ms);
        let reset_time = Utc
            .timestamp_millis_opt(window_start_ms + window_ms)
            .single()
            .unwrap_or(now);

        match self.store.increment(&key, window_start_ms, window_ms).await {
            Ok(count) => {
                let allowed = count <= limit;
                if !allowed {
                    metrics::record_rate_limited(&key);
                }
                RateLimitOutcome {
                    allowed,
                    remaining: limit.saturating_sub(count),
                    reset_time,
                    limit,
                    window_seconds,
                    key,
                    fail_open: false,
                }
            }
            Err(e) => {
                // Availability over strict enforcement.
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Rate limit store unavailable; failing open"
                );
                metrics::record_rate_limit_fail_open();
                RateLimitOutcome {
                    allowed: true,
                    remaining: limit,
                    reset_time: now
                        .checked_add_signed(Duration::milliseconds(window_ms))
                        .unwrap_or(now),
                    limit,
                    window_seconds,
                    key,
                    fail_open: true,
                }
            }
        }
    }
}

/// Window length in milliseconds for an already clamped window.
fn window_millis(window_seconds: u64) -> i64 {
    i64::try_from(window_seconds)
        .ok()
        .and_then(|s| s.checked_mul(1000))
        .unwrap_or(MAX_WINDOW_SECONDS as i64 * 1000)
}

/// Substitute `{subject.<claim>}` placeholders. Unknown placeholders stay
/// verbatim.
pub fn resolve_key_template(template: &str, subject: &IdentityClaims) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let Some(close) = after.find('}') else {
            out.push_str(after);
            return out;
        };
        let placeholder = &after[1..close];
        match placeholder_value(placeholder, subject) {
            Some(value) => out.push_str(value),
            None => out.push_str(&after[..=close]),
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

fn placeholder_value<'a>(placeholder: &str, subject: &'a IdentityClaims) -> Option<&'a str> {
    match placeholder.strip_prefix("subject.")? {
        "sub" | "id" => Some(&subject.sub),
        "email" => Some(&subject.email),
        "role" => Some(&subject.role),
        "tenant" => Some(subject.tenant_or_default()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::counter_store::{CounterStoreError, InMemoryCounterStore};
    use async_trait::async_trait;

    fn subject(tenant: Option<&str>) -> IdentityClaims {
        IdentityClaims {
            sub: "user-42".into(),
            email: "u@example.com".into(),
            role: "user".into(),
            tenant: tenant.map(String::from),
            scopes: None,
            iat: 0,
            exp: 0,
            iss: None,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_key_template_resolution() {
        let s = subject(Some("acme"));
        assert_eq!(resolve_key_template(DEFAULT_KEY_TEMPLATE, &s), "rate_limit:user:acme");
        assert_eq!(resolve_key_template("rl:{subject.sub}", &s), "rl:user-42");
        assert_eq!(resolve_key_template("rl:{subject.id}:{subject.email}", &s), "rl:user-42:u@example.com");
        assert_eq!(
            resolve_key_template(DEFAULT_KEY_TEMPLATE, &subject(None)),
            "rate_limit:user:default"
        );
    }

    #[test]
    fn test_unresolvable_placeholders_kept() {
        let s = subject(None);
        assert_eq!(resolve_key_template("rl:{subject.nope}:{ip}", &s), "rl:{subject.nope}:{ip}");
        assert_eq!(resolve_key_template("rl:{subject.role", &s), "rl:{subject.role");
        assert_eq!(resolve_key_template("plain", &s), "plain");
    }

    #[tokio::test]
    async fn test_fixed_window_sequence() {
        let limiter = RateLimiter::new(Arc::new(InMemoryCounterStore::new()), DEFAULT_KEY_TEMPLATE);
        let s = subject(Some("acme"));
        // 1_700_000_040 is 60s-aligned.
        let window_start = 1_700_000_040;
        let now = at(window_start + 5);

        let mut last_remaining = u64::MAX;
        for _ in 0..10 {
            let out = limiter.check(&s, 10, 60, None, now).await;
            assert!(out.allowed);
            assert!(out.remaining < last_remaining);
            last_remaining = out.remaining;
            assert_eq!(out.reset_time, at(window_start + 60));
        }
        assert_eq!(last_remaining, 0);

        let eleventh = limiter.check(&s, 10, 60, None, at(window_start + 59)).await;
        assert!(!eleventh.allowed);
        assert_eq!(eleventh.remaining, 0);
        assert_eq!(eleventh.key, "rate_limit:user:acme");

        let next_window = limiter.check(&s, 10, 60, None, at(window_start + 60)).await;
        assert!(next_window.allowed);
        assert_eq!(next_window.remaining, 9);
        assert_eq!(next_window.reset_time, at(window_start + 120));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(Arc::new(InMemoryCounterStore::new()), DEFAULT_KEY_TEMPLATE);
        let now = at(1_700_000_040);
        let out = limiter.check(&subject(Some("a")), 1, 60, None, now).await;
        assert!(out.allowed);
        let out = limiter.check(&subject(Some("b")), 1, 60, None, now).await;
        assert!(out.allowed);
        let out = limiter.check(&subject(Some("a")), 1, 60, None, now).await;
        assert!(!out.allowed);
    }

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment(&self, _: &str, _: i64, _: i64) -> Result<u64, CounterStoreError> {
            Err(CounterStoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(DownStore), DEFAULT_KEY_TEMPLATE);
        let now = at(1_700_000_040);
        let out = limiter.check(&subject(None), 5, 30, Some("k:{subject.sub}"), now).await;

        assert!(out.allowed);
        assert!(out.fail_open);
        assert_eq!(out.remaining, 5);
        assert_eq!(out.key, "k:user-42");
        assert_eq!(out.reset_time, at(1_700_000_070));
    }

    #[tokio::test]
    async fn test_oversized_window_is_clamped() {
        let now = at(1_700_000_040);
        let max = chrono::Duration::seconds(MAX_WINDOW_SECONDS as i64);

        let limiter = RateLimiter::new(Arc::new(InMemoryCounterStore::new()), DEFAULT_KEY_TEMPLATE);
        let out = limiter
            .check(&subject(None), 5, 100_000_000_000_000_000, None, now)
            .await;
        assert!(out.allowed);
        assert_eq!(out.window_seconds, MAX_WINDOW_SECONDS);
        assert!(out.reset_time > now && out.reset_time <= now + max);

        let limiter = RateLimiter::new(Arc::new(DownStore), DEFAULT_KEY_TEMPLATE);
        let out = limiter.check(&subject(None), 5, u64::MAX, None, now).await;
        assert!(out.fail_open);
        assert_eq!(out.reset_time, now + max);
    }

    #[test]
    fn test_reset_time_iso() {
        let out = RateLimitOutcome {
            allowed: true,
            remaining: 1,
            reset_time: at(1_700_000_100),
            limit: 2,
            window_seconds: 60,
            key: "k".into(),
            fail_open: false,
        };
        assert_eq!(out.reset_time_iso(), "2023-11-14T22:15:00.000Z");
    }
}
