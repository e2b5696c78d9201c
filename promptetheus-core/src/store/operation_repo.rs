use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Sqlite, SqlitePool};

use super::StoreError;
use crate::models::{
    HttpMethod, MalformedOperation, NewOperation, OperationKind, PendingOperation, QueueEntry,
};

/// The durable queue of mutations waiting to be replayed.
#[derive(Debug, Clone)]
pub struct OperationStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: i64,
    kind: String,
    endpoint: String,
    method: String,
    payload: Option<String>,
    draft_id: Option<String>,
    created_at: i64,
}

impl OperationRow {
    fn into_entry(self) -> QueueEntry {
        let created_at = DateTime::from_timestamp_millis(self.created_at).unwrap_or_else(Utc::now);

        let parsed = self
            .kind
            .parse::<OperationKind>()
            .and_then(|kind| self.method.parse::<HttpMethod>().map(|m| (kind, m)))
            .and_then(|(kind, method)| {
                parse_payload(self.payload.as_deref()).map(|payload| (kind, method, payload))
            });

        match parsed {
            Ok((kind, method, payload)) => QueueEntry::Ready(PendingOperation {
                id: self.id,
                kind,
                endpoint: self.endpoint,
                method,
                payload,
                draft_id: self.draft_id,
                created_at,
            }),
            Err(reason) => QueueEntry::Malformed(MalformedOperation {
                id: self.id,
                kind: self.kind,
                endpoint: self.endpoint,
                method: self.method,
                created_at,
                reason,
            }),
        }
    }
}

fn parse_payload(raw: Option<&str>) -> Result<Option<Value>, String> {
    raw.map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|e| format!("Unreadable payload: {}", e))
}

/// Inserts an operation using any executor, so it can join a transaction.
pub(crate) async fn insert_operation<'e, E>(executor: E, op: &NewOperation) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let payload = op.payload.as_ref().map(serde_json::to_string).transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO pending_operations (kind, endpoint, method, payload, draft_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(op.kind.to_string())
    .bind(&op.endpoint)
    .bind(op.method.to_string())
    .bind(payload)
    .bind(&op.draft_id)
    .bind(op.created_at.timestamp_millis())
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

impl OperationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends an operation to the queue and returns its assigned id.
    pub async fn enqueue(&self, op: &NewOperation) -> Result<i64, StoreError> {
        let id = insert_operation(&self.pool, op).await?;
        tracing::debug!(
            id,
            kind = %op.kind,
            method = %op.method,
            endpoint = %op.endpoint,
            "Queued operation"
        );
        Ok(id)
    }

    /// Returns every queued record, oldest first.
    pub async fn list_ordered_by_creation(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let rows: Vec<OperationRow> =
            sqlx::query_as("SELECT * FROM pending_operations ORDER BY created_at, id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(OperationRow::into_entry).collect())
    }

    pub async fn get(&self, id: i64) -> Result<Option<QueueEntry>, StoreError> {
        let row: Option<OperationRow> =
            sqlx::query_as("SELECT * FROM pending_operations WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(OperationRow::into_entry))
    }

    /// Deletes one record. Returns false if it was already gone.
    pub async fn remove(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM pending_operations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_operations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Number of queued operations still referencing a draft.
    pub async fn count_for_draft(&self, draft_id: &str) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM pending_operations WHERE draft_id = ?")
                .bind(draft_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Drops the whole queue. Returns the number of discarded operations.
    pub async fn clear_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM pending_operations")
            .execute(&self.pool)
            .await?;
        tracing::warn!("Cleared {} pending operation(s)", result.rows_affected());
        Ok(result.rows_affected())
    }
}
