//! PostgreSQL-based metadata store implementation.

use crate::error::MetadataResult;
use crate::models::{ArtifactRow, OperationRow};
use crate::repos::{ArtifactRepo, ClaimWindow, OperationRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use easel_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// Lets the password arrive separately (e.g. via `EASEL_METADATA__PASSWORD`).
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactRepo for PostgresStore {
    async fn upsert_artifact(&self, artifact: &ArtifactRow) -> MetadataResult<ArtifactRow> {
        let row = sqlx::query_as::<_, ArtifactRow>(
            r#"
            INSERT INTO artifacts (artifact_id, canonical_key, requested_key, artifact_url, status,
                                   fetched_at, failure_reason, claimed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT(canonical_key) DO UPDATE SET requested_key = EXCLUDED.requested_key
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
        let row = sqlx::query_as::<_, ArtifactRow>("SELECT * FROM artifacts WHERE artifact_id = $1")
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
            sqlx::query_as::<_, ArtifactRow>("SELECT * FROM artifacts WHERE canonical_key = $1")
                .bind(canonical_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn get_artifacts(&self, artifact_ids: &[Uuid]) -> MetadataResult<Vec<ArtifactRow>> {
        if artifact_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows =
            sqlx::query_as::<_, ArtifactRow>("SELECT * FROM artifacts WHERE artifact_id = ANY($1)")
                .bind(artifact_ids)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn mark_stale(
        &self,
        canonical_key: &str,
        fetched_before: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE artifacts SET status = 'stale', updated_at = $1
             WHERE canonical_key = $2 AND status = 'success'
               AND (fetched_at IS NULL OR fetched_at < $3)",
        )
        .bind(updated_at)
        .bind(canonical_key)
        .bind(fetched_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn try_claim(&self, canonical_key: &str, window: ClaimWindow) -> MetadataResult<bool> {
        // Under READ COMMITTED a concurrent claimant blocks on the row lock and
        // re-evaluates the predicate against the winner's PROCESSING row.
        let result = sqlx::query(
            r#"
            UPDATE artifacts
            SET status = 'processing', claimed_at = $1, updated_at = $1
            WHERE canonical_key = $2
              AND (
                    status IN ('new', 'failure', 'stale')
                 OR (status = 'success' AND (fetched_at IS NULL OR fetched_at < $3))
                 OR (status = 'processing' AND (claimed_at IS NULL OR claimed_at < $4))
              )
            "#,
        )
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
             SET status = 'success', artifact_url = $1, fetched_at = $2, failure_reason = NULL,
                 claimed_at = NULL, updated_at = $2
             WHERE artifact_id = $3",
        )
        .bind(artifact_url)
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
             SET status = 'failure', artifact_url = NULL, failure_reason = $1,
                 claimed_at = NULL, updated_at = $2
             WHERE artifact_id = $3",
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
             ORDER BY updated_at ASC LIMIT $1",
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
            "SELECT * FROM artifacts WHERE status = 'success' AND fetched_at < $1
             ORDER BY fetched_at ASC LIMIT $2",
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
            "SELECT * FROM artifacts WHERE status = 'processing' AND claimed_at < $1
             ORDER BY claimed_at ASC LIMIT $2",
        )
        .bind(claimed_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl OperationRepo for PostgresStore {
    async fn create_operation(&self, operation: &OperationRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO operations (operation_id, status, artifact_ids, requested_keys, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
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
            sqlx::query_as::<_, OperationRow>("SELECT * FROM operations WHERE operation_id = $1")
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
            "UPDATE operations SET status = $1, completed_at = $2
             WHERE operation_id = $3 AND completed_at IS NULL",
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
             ORDER BY created_at ASC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
