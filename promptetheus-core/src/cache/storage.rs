use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool};

use crate::store::StoreError;
use crate::transport::TransportResponse;

/// Named generations of stored responses keyed by request.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the generation if it does not exist yet.
    async fn open(&self, name: &str) -> Result<(), StoreError>;

    /// Generation names in the order they were first opened.
    async fn cache_names(&self) -> Result<Vec<String>, StoreError>;

    async fn match_in(&self, name: &str, key: &str) -> Result<Option<TransportResponse>, StoreError>;

    /// Looks the key up across all generations, oldest first.
    /// Returns the generation that answered along with the response.
    async fn match_any(&self, key: &str) -> Result<Option<(String, TransportResponse)>, StoreError>;

    async fn put(&self, name: &str, key: &str, response: &TransportResponse) -> Result<(), StoreError>;

    /// Stores every entry or none of them.
    async fn put_all(
        &self,
        name: &str,
        entries: &[(String, TransportResponse)],
    ) -> Result<(), StoreError>;

    async fn keys(&self, name: &str) -> Result<Vec<String>, StoreError>;

    /// Drops a generation and all its entries. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;
}

/// Cache generations stored alongside the operation queue.
#[derive(Debug, Clone)]
pub struct SqliteCacheStorage {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    status: i64,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl From<EntryRow> for TransportResponse {
    fn from(row: EntryRow) -> Self {
        TransportResponse::new(row.status as u16, row.content_type, row.body)
    }
}

async fn open_generation<'e, E>(executor: E, name: &str) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT OR IGNORE INTO cache_generations (name, created_at) VALUES (?, ?)")
        .bind(name)
        .bind(Utc::now().timestamp_millis())
        .execute(executor)
        .await?;
    Ok(())
}

async fn put_entry<'e, E>(
    executor: E,
    name: &str,
    key: &str,
    response: &TransportResponse,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO cache_entries (cache_name, request_key, status, content_type, body, stored_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(cache_name, request_key) DO UPDATE SET
            status = excluded.status,
            content_type = excluded.content_type,
            body = excluded.body,
            stored_at = excluded.stored_at
        "#,
    )
    .bind(name)
    .bind(key)
    .bind(response.status as i64)
    .bind(&response.content_type)
    .bind(&response.body)
    .bind(Utc::now().timestamp_millis())
    .execute(executor)
    .await?;
    Ok(())
}

impl SqliteCacheStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn open(&self, name: &str) -> Result<(), StoreError> {
        open_generation(&self.pool, name).await
    }

    async fn cache_names(&self) -> Result<Vec<String>, StoreError> {
        let names: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM cache_generations ORDER BY created_at, rowid")
                .fetch_all(&self.pool)
                .await?;
        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    async fn match_in(&self, name: &str, key: &str) -> Result<Option<TransportResponse>, StoreError> {
        let row: Option<EntryRow> = sqlx::query_as(
            "SELECT status, content_type, body FROM cache_entries WHERE cache_name = ? AND request_key = ?",
        )
        .bind(name)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn match_any(&self, key: &str) -> Result<Option<(String, TransportResponse)>, StoreError> {
        let row: Option<(String, i64, Option<String>, Vec<u8>)> = sqlx::query_as(
            r#"
            SELECT e.cache_name, e.status, e.content_type, e.body
            FROM cache_entries e
            JOIN cache_generations g ON g.name = e.cache_name
            WHERE e.request_key = ?
            ORDER BY g.created_at, g.rowid
            LIMIT 1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(name, status, content_type, body)| {
            (name, TransportResponse::new(status as u16, content_type, body))
        }))
    }

    async fn put(&self, name: &str, key: &str, response: &TransportResponse) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        open_generation(&mut *tx, name).await?;
        put_entry(&mut *tx, name, key, response).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn put_all(
        &self,
        name: &str,
        entries: &[(String, TransportResponse)],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        open_generation(&mut *tx, name).await?;
        for (key, response) in entries {
            put_entry(&mut *tx, name, key, response).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn keys(&self, name: &str) -> Result<Vec<String>, StoreError> {
        let keys: Vec<(String,)> = sqlx::query_as(
            "SELECT request_key FROM cache_entries WHERE cache_name = ? ORDER BY request_key",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys.into_iter().map(|(key,)| key).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        // Entries go with the generation through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM cache_generations WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
