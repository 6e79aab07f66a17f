//! Rule repository interface and the in-process rule set.
//!
//! # Durability and consistency
//! - The gateway only reads rules; authoring happens elsewhere.
//! - `InMemoryRuleRepository` holds one immutable, versioned snapshot behind
//!   an `ArcSwap`. A reload swaps the whole set, so an evaluation never sees
//!   half of an old set and half of a new one.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::types::Rule;
use crate::security::rate_limit::MAX_WINDOW_SECONDS;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("rule store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read rules file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rules file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid rule {rule_id} in {path}: {message}")]
    Invalid {
        path: String,
        rule_id: String,
        message: String,
    },
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Source of candidate rules for the decision engine.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Enabled rules whose service is `service` or `*` and whose tenant filter
    /// is absent or equal to `tenant`, ordered by priority desc then newest
    /// first.
    async fn find_candidate_rules(
        &self,
        service: &str,
        tenant: Option<&str>,
    ) -> RepositoryResult<Vec<Rule>>;

    /// Number of rules currently known; used by readiness checks.
    async fn rule_count(&self) -> RepositoryResult<usize>;
}

/// A versioned rule document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(version: u64, rules: Vec<Rule>) -> Self {
        Self { version, rules }
    }
}

/// Repository-level (coarse) filter.
pub fn is_candidate(rule: &Rule, service: &str, tenant: Option<&str>) -> bool {
    let mc = &rule.match_conditions;
    rule.enabled
        && (mc.service == "*" || mc.service == service)
        && match mc.tenant.as_deref() {
            None => true,
            Some(required) => Some(required) == tenant,
        }
}

/// Priority desc, then most recently created first.
pub fn sort_by_precedence(rules: &mut [Rule]) {
    rules.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

/// Rule set held in process memory.
pub struct InMemoryRuleRepository {
    current: ArcSwap<RuleSet>,
}

impl InMemoryRuleRepository {
    pub fn new(rule_set: RuleSet) -> Self {
        Self {
            current: ArcSwap::from_pointee(rule_set),
        }
    }

    pub fn empty() -> Self {
        Self::new(RuleSet::default())
    }

    pub fn from_rules(rules: Vec<Rule>) -> Self {
        Self::new(RuleSet::new(1, rules))
    }

    /// Atomically replace the whole rule set.
    pub fn replace(&self, rule_set: RuleSet) {
        tracing::info!(
            version = rule_set.version,
            rules = rule_set.rules.len(),
            "Rule set replaced"
        );
        self.current.store(Arc::new(rule_set));
    }

    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.current.load_full()
    }
}

impl Default for InMemoryRuleRepository {
    fn default() -> Self {
        Self::empty()
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn find_candidate_rules(
        &self,
        service: &str,
        tenant: Option<&str>,
    ) -> RepositoryResult<Vec<Rule>> {
        let snapshot = self.current.load();
        let mut rules: Vec<Rule> = snapshot
            .rules
            .iter()
            .filter(|r| is_candidate(r, service, tenant))
            .cloned()
            .collect();
        sort_by_precedence(&mut rules);
        Ok(rules)
    }

    async fn rule_count(&self) -> RepositoryResult<usize> {
        Ok(self.current.load().rules.len())
    }
}

/// Load a rule document from disk. `.toml` files are parsed as TOML,
/// everything else as JSON.
pub fn load_rules(path: &Path) -> RepositoryResult<RuleSet> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| RepositoryError::Io {
        path: display.clone(),
        source,
    })?;

    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

    let parsed = if is_toml {
        toml::from_str::<RuleSet>(&content).map_err(|e| e.to_string())
    } else {
        serde_json::from_str::<RuleSet>(&content).map_err(|e| e.to_string())
    };

    let rule_set = parsed.map_err(|message| RepositoryError::Parse {
        path: display.clone(),
        message,
    })?;

    for rule in &rule_set.rules {
        check_rule(rule).map_err(|message| RepositoryError::Invalid {
            path: display.clone(),
            rule_id: rule.id.clone(),
            message,
        })?;
    }
    Ok(rule_set)
}

/// Semantic checks serde cannot express.
fn check_rule(rule: &Rule) -> Result<(), String> {
    if let Some(rl) = &rule.obligations.rate_limit {
        if rl.window_seconds > MAX_WINDOW_SECONDS {
            return Err(format!(
                "rateLimit.windowSeconds {} exceeds the maximum of {MAX_WINDOW_SECONDS}",
                rl.window_seconds
            ));
        }
    }
    Ok(())
}
