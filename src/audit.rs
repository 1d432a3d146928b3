use crate::constants::HIDDEN_ACTIVITY_ACTIONS;
use crate::models::{AuditAction, AuditRecord, NewAuditRecord, Notice};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),
    #[error("SSL error: {0}")]
    Tls(#[from] openssl::error::ErrorStack),
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),
    #[error("Audit writer is no longer running")]
    WriterClosed,
}

/// Append-only storage for audit records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: &NewAuditRecord) -> Result<(), AuditError>;

    /// Most recent records first, skipping the `excluded` actions before the
    /// limit applies.
    async fn recent(
        &self,
        limit: i64,
        excluded: &[&str],
    ) -> Result<Vec<AuditRecord>, AuditError>;
}

/// In-process audit store, used when no database is configured.
#[derive(Default)]
pub struct MemoryAuditStore {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: &NewAuditRecord) -> Result<(), AuditError> {
        let stored = AuditRecord {
            user_id: record.user_id.clone(),
            email: record.email.clone(),
            action: record.action.as_str().to_string(),
            details: Value::Object(record.details.clone()),
            created_at: Utc::now(),
        };
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(stored);
        Ok(())
    }

    async fn recent(
        &self,
        limit: i64,
        excluded: &[&str],
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let mut records: Vec<AuditRecord> = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|r| !excluded.contains(&r.action.as_str()))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps; reverse
        // afterwards so later inserts win ties.
        records.sort_by_key(|r| r.created_at);
        records.reverse();
        records.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(records)
    }
}

enum AuditCommand {
    Append(NewAuditRecord),
    Flush(oneshot::Sender<()>),
}

/// Fire-and-forget audit trail.
///
/// `record` only enqueues. A background writer performs the append and
/// reports failures as notices; a failed write never affects the action
/// that produced it.
pub struct AuditLogger {
    tx: mpsc::UnboundedSender<AuditCommand>,
    store: Arc<dyn AuditStore>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl AuditLogger {
    /// Starts the writer task. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn AuditStore>, notices: mpsc::UnboundedSender<Notice>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditCommand>();

        let writer_store = Arc::clone(&store);
        let writer_notices = notices.clone();
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    AuditCommand::Append(record) => {
                        match writer_store.append(&record).await {
                            Ok(()) => debug!(action = %record.action, "audit record stored"),
                            Err(e) => {
                                warn!(action = %record.action, error = %e, "failed to log action");
                                let _ = writer_notices
                                    .send(Notice::Warning(format!("Failed to log action: {e}")));
                            }
                        }
                    }
                    AuditCommand::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { tx, store, notices }
    }

    pub fn record(
        &self,
        actor_id: &str,
        action: AuditAction,
        details: Map<String, Value>,
        email: Option<String>,
    ) {
        let record = NewAuditRecord {
            user_id: actor_id.to_string(),
            email,
            action,
            details,
        };

        if self.tx.send(AuditCommand::Append(record)).is_err() {
            warn!(%action, "audit writer stopped; action not logged");
            let _ = self.notices.send(Notice::Warning(format!(
                "Failed to log action: {}",
                AuditError::WriterClosed
            )));
        }
    }

    /// Waits until every record enqueued so far has been handled.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(AuditCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Recent activity, newest first, without login/logout noise.
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<AuditRecord>, AuditError> {
        self.store.recent(limit, &HIDDEN_ACTIVITY_ACTIONS).await
    }
}
