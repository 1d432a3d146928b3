use crate::audit::{AuditError, AuditStore};
use crate::constants::{AUDIT_TABLE, DATABASE_CONNECT_TIMEOUT_SECS};
use crate::models::{AuditRecord, NewAuditRecord};
use async_trait::async_trait;
use openssl::ssl::{SslConnector, SslMethod};
use postgres_openssl::MakeTlsConnector;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::{Client, Config};
use tracing::{error, info};

/// PostgreSQL-backed audit store.
pub struct Database {
    client: Client,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, AuditError> {
        let builder = SslConnector::builder(SslMethod::tls())?;
        let connector = MakeTlsConnector::new(builder.build());

        let mut config = Config::from_str(database_url)
            .map_err(|e| AuditError::InvalidConnectionString(e.to_string()))?;

        let (client, connection) = config
            .connect_timeout(Duration::from_secs(DATABASE_CONNECT_TIMEOUT_SECS))
            .connect(connector)
            .await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "audit database connection error");
            }
        });

        info!("connected to audit database");
        Ok(Self { client })
    }

    pub async fn ensure_schema(&self) -> Result<(), AuditError> {
        self.client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {AUDIT_TABLE} (
                    id BIGSERIAL PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    email TEXT,
                    action TEXT NOT NULL,
                    details JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                 );
                 CREATE INDEX IF NOT EXISTS {AUDIT_TABLE}_created_at_idx
                    ON {AUDIT_TABLE} (created_at DESC);"
            ))
            .await?;

        Ok(())
    }
}

#[async_trait]
impl AuditStore for Database {
    async fn append(&self, record: &NewAuditRecord) -> Result<(), AuditError> {
        let details = Value::Object(record.details.clone());

        self.client
            .execute(
                &format!(
                    "INSERT INTO {AUDIT_TABLE} (user_id, email, action, details)
                     VALUES ($1, $2, $3, $4)"
                ),
                &[
                    &record.user_id,
                    &record.email,
                    &record.action.as_str(),
                    &details,
                ],
            )
            .await?;

        Ok(())
    }

    async fn recent(
        &self,
        limit: i64,
        excluded: &[&str],
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT user_id, email, action, details, created_at
                     FROM {AUDIT_TABLE}
                     WHERE action <> ALL($2)
                     ORDER BY created_at DESC
                     LIMIT $1"
                ),
                &[&limit, &excluded],
            )
            .await?;

        let records = rows
            .iter()
            .map(|row| AuditRecord {
                user_id: row.get(0),
                email: row.get(1),
                action: row.get(2),
                details: row.get(3),
                created_at: row.get(4),
            })
            .collect();

        Ok(records)
    }
}
