//! Batch operation repository.

use crate::error::MetadataResult;
use crate::models::OperationRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for batch operation records.
#[async_trait]
pub trait OperationRepo: Send + Sync {
    /// Create an operation.
    async fn create_operation(&self, operation: &OperationRow) -> MetadataResult<()>;

    /// Get an operation by ID.
    async fn get_operation(&self, operation_id: Uuid) -> MetadataResult<Option<OperationRow>>;

    /// Persist a terminal status.
    ///
    /// Only applies while `completed_at` is still NULL, so a completed
    /// operation never regresses. Returns true if the row changed.
    async fn complete_operation(
        &self,
        operation_id: Uuid,
        status: &str,
        completed_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Operations that were never completed, oldest first.
    /// Used on startup to re-drive work orphaned by a previous process.
    async fn list_open_operations(&self, limit: u32) -> MetadataResult<Vec<OperationRow>>;
}
