//! Rules file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::policy::repository::{load_rules, InMemoryRuleRepository};

/// Reloads the rule set into a repository whenever the rules file changes.
pub struct RuleWatcher {
    path: PathBuf,
    repository: Arc<InMemoryRuleRepository>,
}

impl RuleWatcher {
    pub fn new(path: &Path, repository: Arc<InMemoryRuleRepository>) -> Self {
        Self {
            path: path.to_path_buf(),
            repository,
        }
    }

    /// Reload once. A broken file leaves the current rule set in place.
    pub fn reload(&self) -> bool {
        match load_rules(&self.path) {
            Ok(rule_set) => {
                self.repository.replace(rule_set);
                true
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Failed to reload rules. Keeping current rule set."
                );
                false
            }
        }
    }

    /// Start watching in a background thread. The returned watcher must be
    /// kept alive for as long as reloads are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let this = Arc::new(self);
        let handler = this.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Rules file change detected, reloading...");
                        handler.reload();
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?this.path, "Rules watcher started");
        Ok(watcher)
    }
}
