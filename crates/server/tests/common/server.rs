//! Server test utilities.

use crate::common::upstream::FakeResolver;
use easel_core::OperationStatus;
use easel_core::config::{AppConfig, MetadataConfig};
use easel_metadata::{MetadataStore, SqliteStore};
use easel_server::operations::OperationView;
use easel_server::{AppState, create_router};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub resolver: Arc<FakeResolver>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with a temp-dir SQLite store and a fake upstream.
    pub async fn new() -> Self {
        Self::build(FakeResolver::new(), |_| {}).await
    }

    /// Create a test server around a configured fake upstream.
    pub async fn with_resolver(resolver: FakeResolver) -> Self {
        Self::build(resolver, |_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(FakeResolver::new(), modifier).await
    }

    pub async fn build<F>(resolver: FakeResolver, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig {
            metadata: MetadataConfig::Sqlite { path: db_path },
            ..AppConfig::for_testing()
        };
        modifier(&mut config);

        let resolver = Arc::new(resolver);
        let state = AppState::new(config, metadata, resolver.clone());
        let router = create_router(state.clone());

        Self {
            router,
            state,
            resolver,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Poll an operation until its status is terminal.
    pub async fn wait_for_operation(&self, operation_id: Uuid) -> OperationView {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let view = self
                .state
                .operations
                .status(operation_id)
                .await
                .expect("Failed to load operation status");
            if view.status != OperationStatus::Processing {
                return view;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("operation {operation_id} did not settle in time: {view:?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
