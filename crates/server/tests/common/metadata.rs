//! Metadata store test utilities.

use easel_metadata::{MetadataResult, MetadataStore, PostgresStore, SqliteStore};
use sqlx::{Pool, Postgres as SqlxPostgres, Sqlite};
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Stable prefix for Docker/container startup failures in Postgres test setup.
/// Tests use this marker to decide whether to skip due to unavailable Docker.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// A test metadata store wrapper that cleans up on drop.
#[allow(dead_code)]
pub struct TestMetadata {
    pub store: Arc<dyn MetadataStore>,
    pub(crate) sqlite_store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

impl TestMetadata {
    /// Create a new test metadata store backed by a temp-dir SQLite file.
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");
        let store = SqliteStore::new(&db_path).await?;
        let arc_store = Arc::new(store);

        Ok(Self {
            store: arc_store.clone(),
            sqlite_store: arc_store,
            _temp_dir: temp_dir,
        })
    }

    /// Get a reference to the metadata store.
    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    /// Get a reference to the SQLite connection pool for raw queries.
    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite_store.pool()
    }
}

/// PostgreSQL test metadata store wrapper that manages a testcontainer.
#[allow(dead_code)]
pub struct PostgresTestMetadata {
    pub store: Arc<dyn MetadataStore>,
    pub(crate) postgres_store: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
}

impl PostgresTestMetadata {
    /// Create a new PostgreSQL test store with a testcontainer.
    pub async fn new() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                easel_metadata::MetadataError::Internal(format!(
                    "{} Failed to start PostgreSQL container: {e}",
                    POSTGRES_CONTAINER_START_ERR_PREFIX
                ))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Default credentials from testcontainers-modules postgres
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        let store = PostgresStore::from_url(&url, 5, None).await?;
        let arc_store = Arc::new(store);

        Ok(Self {
            store: arc_store.clone(),
            postgres_store: arc_store,
            _container: container,
        })
    }

    /// Get a reference to the metadata store.
    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    /// Get a reference to the PostgreSQL connection pool for raw queries.
    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<SqlxPostgres> {
        self.postgres_store.pool()
    }
}

/// Run a test against both SQLite and PostgreSQL backends.
#[allow(dead_code)]
pub async fn run_metadata_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    // Test with SQLite backend
    let sqlite = TestMetadata::new()
        .await
        .expect("Failed to create SQLite test metadata");
    test_fn.clone()(sqlite.store()).await;

    // Test with PostgreSQL backend (requires Docker)
    if std::env::var("SKIP_POSTGRES_TESTS").is_err() {
        match PostgresTestMetadata::new().await {
            Ok(postgres) => {
                test_fn(postgres.store()).await;
            }
            Err(err) => {
                eprintln!("Skipping PostgreSQL metadata tests: {err}");
            }
        }
    }
}

/// Store wrapper whose `complete_success` fails for one artifact.
///
/// Every other call is forwarded to the wrapped store.
#[allow(dead_code)]
pub struct FailingWriteStore {
    inner: Arc<dyn MetadataStore>,
    fail_artifact: std::sync::Mutex<Option<uuid::Uuid>>,
}

#[allow(dead_code)]
impl FailingWriteStore {
    pub fn new(inner: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner,
            fail_artifact: std::sync::Mutex::new(None),
        }
    }

    /// Make `complete_success` fail for this artifact.
    pub fn fail_success_for(&self, artifact_id: uuid::Uuid) {
        *self.fail_artifact.lock().unwrap() = Some(artifact_id);
    }
}

mod failing_write_impl {
    use super::FailingWriteStore;
    use async_trait::async_trait;
    use easel_metadata::models::{ArtifactRow, OperationRow};
    use easel_metadata::repos::{ArtifactRepo, ClaimWindow, OperationRepo};
    use easel_metadata::{MetadataError, MetadataResult, MetadataStore};
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl ArtifactRepo for FailingWriteStore {
        async fn upsert_artifact(&self, artifact: &ArtifactRow) -> MetadataResult<ArtifactRow> {
            self.inner.upsert_artifact(artifact).await
        }

        async fn get_artifact(&self, artifact_id: Uuid) -> MetadataResult<Option<ArtifactRow>> {
            self.inner.get_artifact(artifact_id).await
        }

        async fn get_artifact_by_key(
            &self,
            canonical_key: &str,
        ) -> MetadataResult<Option<ArtifactRow>> {
            self.inner.get_artifact_by_key(canonical_key).await
        }

        async fn get_artifacts(&self, artifact_ids: &[Uuid]) -> MetadataResult<Vec<ArtifactRow>> {
            self.inner.get_artifacts(artifact_ids).await
        }

        async fn mark_stale(
            &self,
            canonical_key: &str,
            fetched_before: OffsetDateTime,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            self.inner
                .mark_stale(canonical_key, fetched_before, updated_at)
                .await
        }

        async fn try_claim(
            &self,
            canonical_key: &str,
            window: ClaimWindow,
        ) -> MetadataResult<bool> {
            self.inner.try_claim(canonical_key, window).await
        }

        async fn complete_success(
            &self,
            artifact_id: Uuid,
            artifact_url: &str,
            fetched_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            if *self.fail_artifact.lock().unwrap() == Some(artifact_id) {
                return Err(MetadataError::Internal("injected write failure".to_string()));
            }
            self.inner
                .complete_success(artifact_id, artifact_url, fetched_at)
                .await
        }

        async fn complete_failure(
            &self,
            artifact_id: Uuid,
            reason: &str,
            failed_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            self.inner
                .complete_failure(artifact_id, reason, failed_at)
                .await
        }

        async fn list_unfetched(&self, limit: u32) -> MetadataResult<Vec<ArtifactRow>> {
            self.inner.list_unfetched(limit).await
        }

        async fn list_expired(
            &self,
            fetched_before: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<ArtifactRow>> {
            self.inner.list_expired(fetched_before, limit).await
        }

        async fn list_abandoned_claims(
            &self,
            claimed_before: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<ArtifactRow>> {
            self.inner
                .list_abandoned_claims(claimed_before, limit)
                .await
        }
    }

    #[async_trait]
    impl OperationRepo for FailingWriteStore {
        async fn create_operation(&self, operation: &OperationRow) -> MetadataResult<()> {
            self.inner.create_operation(operation).await
        }

        async fn get_operation(&self, operation_id: Uuid) -> MetadataResult<Option<OperationRow>> {
            self.inner.get_operation(operation_id).await
        }

        async fn complete_operation(
            &self,
            operation_id: Uuid,
            status: &str,
            completed_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            self.inner
                .complete_operation(operation_id, status, completed_at)
                .await
        }

        async fn list_open_operations(&self, limit: u32) -> MetadataResult<Vec<OperationRow>> {
            self.inner.list_open_operations(limit).await
        }
    }

    #[async_trait]
    impl MetadataStore for FailingWriteStore {
        async fn migrate(&self) -> MetadataResult<()> {
            self.inner.migrate().await
        }

        async fn health_check(&self) -> MetadataResult<()> {
            self.inner.health_check().await
        }
    }
}
