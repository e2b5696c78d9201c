use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool};

use super::operation_repo::insert_operation;
use super::StoreError;
use crate::models::{DraftDocument, NewOperation, SyncStatus};

/// Locally cached drafts of remote-owned documents.
#[derive(Debug, Clone)]
pub struct DraftStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct DraftRow {
    id: String,
    parent_id: String,
    body: String,
    sync_status: String,
    updated_at: i64,
}

impl TryFrom<DraftRow> for DraftDocument {
    type Error = StoreError;

    fn try_from(row: DraftRow) -> Result<Self, Self::Error> {
        Ok(DraftDocument {
            id: row.id,
            parent_id: row.parent_id,
            body: serde_json::from_str(&row.body)?,
            // Unknown statuses are treated as still needing a sync
            sync_status: row.sync_status.parse().unwrap_or(SyncStatus::Pending),
            updated_at: DateTime::from_timestamp_millis(row.updated_at).unwrap_or_else(Utc::now),
        })
    }
}

async fn upsert_draft<'e, E>(executor: E, draft: &DraftDocument) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let body = serde_json::to_string(&draft.body)?;

    sqlx::query(
        r#"
        INSERT INTO drafts (id, parent_id, body, sync_status, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            parent_id = excluded.parent_id,
            body = excluded.body,
            sync_status = excluded.sync_status,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&draft.id)
    .bind(&draft.parent_id)
    .bind(&body)
    .bind(draft.sync_status.to_string())
    .bind(draft.updated_at.timestamp_millis())
    .execute(executor)
    .await?;

    Ok(())
}

impl DraftStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, draft: &DraftDocument) -> Result<(), StoreError> {
        upsert_draft(&self.pool, draft).await
    }

    /// Saves a draft as pending together with the operation that will confirm it.
    ///
    /// Both rows are written in one transaction, so a pending draft always has
    /// an outstanding operation. Returns the operation id.
    pub async fn stage(
        &self,
        draft: &DraftDocument,
        op: NewOperation,
    ) -> Result<i64, StoreError> {
        let mut pending = draft.clone();
        pending.sync_status = SyncStatus::Pending;
        pending.updated_at = Utc::now();
        let op = op.with_draft(&draft.id);

        let mut tx = self.pool.begin().await?;
        upsert_draft(&mut *tx, &pending).await?;
        let op_id = insert_operation(&mut *tx, &op).await?;
        tx.commit().await?;

        tracing::debug!(draft = %draft.id, op_id, "Staged draft for sync");
        Ok(op_id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<DraftDocument>, StoreError> {
        let row: Option<DraftRow> = sqlx::query_as("SELECT * FROM drafts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(DraftDocument::try_from).transpose()
    }

    pub async fn list_by_parent(&self, parent_id: &str) -> Result<Vec<DraftDocument>, StoreError> {
        let rows: Vec<DraftRow> =
            sqlx::query_as("SELECT * FROM drafts WHERE parent_id = ? ORDER BY updated_at DESC")
                .bind(parent_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(DraftDocument::try_from).collect()
    }

    pub async fn list_by_status(
        &self,
        status: SyncStatus,
    ) -> Result<Vec<DraftDocument>, StoreError> {
        let rows: Vec<DraftRow> =
            sqlx::query_as("SELECT * FROM drafts WHERE sync_status = ? ORDER BY updated_at DESC")
                .bind(status.to_string())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(DraftDocument::try_from).collect()
    }

    pub async fn list(&self) -> Result<Vec<DraftDocument>, StoreError> {
        let rows: Vec<DraftRow> = sqlx::query_as("SELECT * FROM drafts ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DraftDocument::try_from).collect()
    }

    /// Changes a draft's sync status. Returns false if the draft does not exist.
    pub async fn set_status(&self, id: &str, status: SyncStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE drafts SET sync_status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM drafts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HttpMethod, OperationKind, QueueEntry};
    use crate::store::{init_store, OperationStore};
    use serde_json::json;
    use tempfile::TempDir;

    struct TestContext {
        drafts: DraftStore,
        operations: OperationStore,
        _temp_dir: TempDir,
    }

    async fn setup_store() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_store(&temp_dir.path().join("test.db")).await.unwrap();
        TestContext {
            drafts: DraftStore::new(pool.clone()),
            operations: OperationStore::new(pool),
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let ctx = setup_store().await;
        let draft = DraftDocument::new("intent-1", "project-1", json!({"name": "Classify"}));

        ctx.drafts.upsert(&draft).await.unwrap();

        let fetched = ctx.drafts.get("intent-1").await.unwrap().unwrap();
        assert_eq!(fetched.parent_id, "project-1");
        assert_eq!(fetched.body, json!({"name": "Classify"}));
        assert_eq!(fetched.sync_status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_body() {
        let ctx = setup_store().await;
        let mut draft = DraftDocument::new("intent-1", "project-1", json!({"v": 1}));
        ctx.drafts.upsert(&draft).await.unwrap();

        draft.body = json!({"v": 2});
        ctx.drafts.upsert(&draft).await.unwrap();

        let fetched = ctx.drafts.get("intent-1").await.unwrap().unwrap();
        assert_eq!(fetched.body, json!({"v": 2}));
        assert_eq!(ctx.drafts.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_by_parent_and_status() {
        let ctx = setup_store().await;
        ctx.drafts
            .upsert(&DraftDocument::new("a", "p1", json!({})))
            .await
            .unwrap();
        ctx.drafts
            .upsert(&DraftDocument::new("b", "p1", json!({})))
            .await
            .unwrap();
        ctx.drafts
            .upsert(&DraftDocument::new("c", "p2", json!({})))
            .await
            .unwrap();
        ctx.drafts.set_status("b", SyncStatus::Synced).await.unwrap();

        assert_eq!(ctx.drafts.list_by_parent("p1").await.unwrap().len(), 2);
        assert_eq!(ctx.drafts.list_by_parent("p3").await.unwrap().len(), 0);

        let pending = ctx.drafts.list_by_status(SyncStatus::Pending).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(pending.len(), 2);
        assert!(ids.contains(&"a"));
        assert!(ids.contains(&"c"));
    }

    #[tokio::test]
    async fn test_set_status_missing_draft() {
        let ctx = setup_store().await;
        assert!(!ctx
            .drafts
            .set_status("missing", SyncStatus::Conflict)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_stage_links_operation_to_draft() {
        let ctx = setup_store().await;
        let mut draft = DraftDocument::new("intent-3", "project-1", json!({"name": "Tag"}));
        draft.sync_status = SyncStatus::Synced;

        let op_id = ctx
            .drafts
            .stage(
                &draft,
                NewOperation::new(OperationKind::Update, HttpMethod::Put, "/intents/intent-3")
                    .with_payload(draft.body.clone()),
            )
            .await
            .unwrap();

        let stored = ctx.drafts.get("intent-3").await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Pending);

        match ctx.operations.get(op_id).await.unwrap().unwrap() {
            QueueEntry::Ready(op) => assert_eq!(op.draft_id.as_deref(), Some("intent-3")),
            other => panic!("expected ready entry, got {:?}", other),
        }
        assert_eq!(ctx.operations.count_for_draft("intent-3").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let ctx = setup_store().await;
        ctx.drafts
            .upsert(&DraftDocument::new("a", "p1", json!({})))
            .await
            .unwrap();

        assert!(ctx.drafts.delete("a").await.unwrap());
        assert!(ctx.drafts.get("a").await.unwrap().is_none());
        assert!(!ctx.drafts.delete("a").await.unwrap());
    }
}
