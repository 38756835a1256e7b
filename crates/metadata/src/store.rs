//! Metadata store trait and the SQLite implementation.

use crate::error::MetadataResult;
use crate::repos::{ArtifactRepo, OperationRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: ArtifactRepo + OperationRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store, creating the database file if needed.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // serializes statements, which keeps each conditional UPDATE atomic
            // without "database is locked" retries.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "SQLite metadata store ready");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement the repository traits for SqliteStore.
// Timestamps are RFC 3339 text with a variable number of fractional digits,
// so every comparison and ordering goes through julianday().
mod sqlite_impl {
    use super::*;
    use crate::models::{ArtifactRow, OperationRow};
    use crate::repos::ClaimWindow;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl ArtifactRepo for SqliteStore {
        async fn upsert_artifact(&self, artifact: &ArtifactRow) -> MetadataResult<ArtifactRow> {
            // The conflict branch only refreshes the requested key (last writer
            // wins); status, timestamps and the ID of the existing row survive.
            let row = sqlx::query_as::<_, ArtifactRow>(
                r#"
                INSERT INTO artifacts (artifact_id, canonical_key, requested_key, artifact_url, status,
                                       fetched_at, failure_reason, claimed_at, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(canonical_key) DO UPDATE SET requested_key = excluded.requested_key
                RETURNING *
                "#,
            )
            .bind(artifact.artifact_id)
            .bind(&artifact.canonical_key)
            .bind(&artifact.requested_key)
            .bind(&artifact.artifact_url)
            .bind(&artifact.status)
            .bind(artifact.fetched_at)
            .bind(&artifact.failure_reason)
            .bind(artifact.claimed_at)
            .bind(artifact.created_at)
            .bind(artifact.updated_at)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_artifact(&self, artifact_id: Uuid) -> MetadataResult<Option<ArtifactRow>> {
            let row =
                sqlx::query_as::<_, ArtifactRow>("SELECT * FROM artifacts WHERE artifact_id = ?")
                    .bind(artifact_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn get_artifact_by_key(
            &self,
            canonical_key: &str,
        ) -> MetadataResult<Option<ArtifactRow>> {
            let row =
                sqlx::query_as::<_, ArtifactRow>("SELECT * FROM artifacts WHERE canonical_key = ?")
                    .bind(canonical_key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn get_artifacts(&self, artifact_ids: &[Uuid]) -> MetadataResult<Vec<ArtifactRow>> {
            // SQLite has a limit of ~999 parameters, so we batch if needed
            const BATCH_SIZE: usize = 900;
            let mut result = Vec::with_capacity(artifact_ids.len());

            for batch in artifact_ids.chunks(BATCH_SIZE) {
                let placeholders: Vec<&str> = batch.iter().map(|_| "?").collect();
                let query = format!(
                    "SELECT * FROM artifacts WHERE artifact_id IN ({})",
                    placeholders.join(", ")
                );

                let mut query_builder = sqlx::query_as::<_, ArtifactRow>(&query);
                for id in batch {
                    query_builder = query_builder.bind(id);
                }
                result.extend(query_builder.fetch_all(&self.pool).await?);
            }

            Ok(result)
        }

        async fn mark_stale(
            &self,
            canonical_key: &str,
            fetched_before: OffsetDateTime,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE artifacts SET status = 'stale', updated_at = ?
                 WHERE canonical_key = ? AND status = 'success'
                   AND (fetched_at IS NULL OR julianday(fetched_at) < julianday(?))",
            )
            .bind(updated_at)
            .bind(canonical_key)
            .bind(fetched_before)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn try_claim(
            &self,
            canonical_key: &str,
            window: ClaimWindow,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE artifacts
                SET status = 'processing', claimed_at = ?, updated_at = ?
                WHERE canonical_key = ?
                  AND (
                        status IN ('new', 'failure', 'stale')
                     OR (status = 'success' AND (fetched_at IS NULL OR julianday(fetched_at) < julianday(?)))
                     OR (status = 'processing' AND (claimed_at IS NULL OR julianday(claimed_at) < julianday(?)))
                  )
                "#,
            )
            .bind(window.claimed_at)
            .bind(window.claimed_at)
            .bind(canonical_key)
            .bind(window.success_fetched_before)
            .bind(window.lease_cutoff)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn complete_success(
            &self,
            artifact_id: Uuid,
            artifact_url: &str,
            fetched_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE artifacts
                 SET status = 'success', artifact_url = ?, fetched_at = ?, failure_reason = NULL,
                     claimed_at = NULL, updated_at = ?
                 WHERE artifact_id = ?",
            )
            .bind(artifact_url)
            .bind(fetched_at)
            .bind(fetched_at)
            .bind(artifact_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn complete_failure(
            &self,
            artifact_id: Uuid,
            reason: &str,
            failed_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE artifacts
                 SET status = 'failure', artifact_url = NULL, failure_reason = ?,
                     claimed_at = NULL, updated_at = ?
                 WHERE artifact_id = ?",
            )
            .bind(reason)
            .bind(failed_at)
            .bind(artifact_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn list_unfetched(&self, limit: u32) -> MetadataResult<Vec<ArtifactRow>> {
            let rows = sqlx::query_as::<_, ArtifactRow>(
                "SELECT * FROM artifacts WHERE status IN ('new', 'stale')
                 ORDER BY julianday(updated_at) ASC, rowid ASC LIMIT ?",
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_expired(
            &self,
            fetched_before: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<ArtifactRow>> {
            let rows = sqlx::query_as::<_, ArtifactRow>(
                "SELECT * FROM artifacts WHERE status = 'success'
                   AND julianday(fetched_at) < julianday(?)
                 ORDER BY julianday(fetched_at) ASC, rowid ASC LIMIT ?",
            )
            .bind(fetched_before)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_abandoned_claims(
            &self,
            claimed_before: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<ArtifactRow>> {
            let rows = sqlx::query_as::<_, ArtifactRow>(
                "SELECT * FROM artifacts WHERE status = 'processing'
                   AND julianday(claimed_at) < julianday(?)
                 ORDER BY julianday(claimed_at) ASC, rowid ASC LIMIT ?",
            )
            .bind(claimed_before)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl OperationRepo for SqliteStore {
        async fn create_operation(&self, operation: &OperationRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO operations (operation_id, status, artifact_ids, requested_keys, created_at, completed_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(operation.operation_id)
            .bind(&operation.status)
            .bind(&operation.artifact_ids)
            .bind(&operation.requested_keys)
            .bind(operation.created_at)
            .bind(operation.completed_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_operation(&self, operation_id: Uuid) -> MetadataResult<Option<OperationRow>> {
            let row =
                sqlx::query_as::<_, OperationRow>("SELECT * FROM operations WHERE operation_id = ?")
                    .bind(operation_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn complete_operation(
            &self,
            operation_id: Uuid,
            status: &str,
            completed_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE operations SET status = ?, completed_at = ?
                 WHERE operation_id = ? AND completed_at IS NULL",
            )
            .bind(status)
            .bind(completed_at)
            .bind(operation_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn list_open_operations(&self, limit: u32) -> MetadataResult<Vec<OperationRow>> {
            let rows = sqlx::query_as::<_, OperationRow>(
                "SELECT * FROM operations WHERE completed_at IS NULL
                 ORDER BY julianday(created_at) ASC, rowid ASC LIMIT ?",
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Artifact cache rows: at most one per canonical key
CREATE TABLE IF NOT EXISTS artifacts (
    artifact_id BLOB PRIMARY KEY,
    canonical_key TEXT NOT NULL UNIQUE,
    requested_key TEXT NOT NULL,
    artifact_url TEXT,
    status TEXT NOT NULL DEFAULT 'new',
    fetched_at TEXT,
    failure_reason TEXT,
    -- Lease anchor for PROCESSING rows
    claimed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_artifacts_status_updated ON artifacts(status, updated_at);
CREATE INDEX IF NOT EXISTS idx_artifacts_status_fetched ON artifacts(status, fetched_at);
CREATE INDEX IF NOT EXISTS idx_artifacts_status_claimed ON artifacts(status, claimed_at);

-- Batch operations; artifact_ids and requested_keys are parallel JSON arrays
CREATE TABLE IF NOT EXISTS operations (
    operation_id BLOB PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'processing',
    artifact_ids TEXT NOT NULL,
    requested_keys TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_operations_open ON operations(created_at) WHERE completed_at IS NULL;
"#;
