//! Audit sinks and the fire-and-forget dispatcher.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::audit::record::AuditRecord;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode audit record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// Writes each record as one structured event on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        let payload = serde_json::to_string(&record)?;
        tracing::info!(
            target: "audit",
            request_id = %record.request_id,
            status = record.status_code,
            stage = record.stage,
            record = %payload,
            "audit"
        );
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Poll until at least `n` records arrived or `timeout` passed.
    /// Returns whether the count was reached.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.len() >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        self.records
            .lock()
            .map_err(|_| AuditError::Unavailable("memory sink poisoned".into()))?
            .push(record);
        Ok(())
    }
}

/// Hands records to a sink without making the caller wait.
#[derive(Clone)]
pub struct AuditDispatcher {
    sink: Arc<dyn AuditSink>,
}

impl AuditDispatcher {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Spawn the write. A failed write is logged and counted, nothing else.
    pub fn dispatch(&self, record: AuditRecord) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let request_id = record.request_id.clone();
            if let Err(e) = sink.record(record).await {
                metrics::record_audit_failure();
                tracing::error!(
                    request_id = %request_id,
                    error = %e,
                    "Failed to write audit record"
                );
            }
        });
    }
}
