//! Batch operations: submission, background driving and status aggregation.

use crate::coordinator::{RefreshCoordinator, RefreshError};
use crate::metrics;
use crate::state::RefreshTaskRegistry;
use easel_core::{ArtifactStatus, OperationStatus, OutcomeCounts, validate_batch};
use easel_metadata::MetadataStore;
use easel_metadata::models::{ArtifactRow, OperationRow};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Upper bound on operations re-driven at startup.
const RESUME_LIMIT: u32 = 1000;

const EMPTY_OPERATION_ERROR: &str = "operation references no artifacts";

/// A requested key whose artifact resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyResult {
    pub key: String,
    pub url: String,
}

/// A requested key whose artifact failed to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyFailure {
    pub key: String,
    pub reason: String,
}

/// Read model returned by the status endpoint.
///
/// Keys still being refreshed appear in neither list.
#[derive(Debug, Clone, Serialize)]
pub struct OperationView {
    pub operation_id: Uuid,
    pub status: OperationStatus,
    pub results: Vec<KeyResult>,
    pub failures: Vec<KeyFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct OperationAggregator {
    metadata: Arc<dyn MetadataStore>,
    coordinator: Arc<RefreshCoordinator>,
    tasks: Arc<RefreshTaskRegistry>,
    max_batch_keys: usize,
}

impl OperationAggregator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        coordinator: Arc<RefreshCoordinator>,
        tasks: Arc<RefreshTaskRegistry>,
        max_batch_keys: usize,
    ) -> Self {
        Self {
            metadata,
            coordinator,
            tasks,
            max_batch_keys,
        }
    }

    pub fn tasks(&self) -> &Arc<RefreshTaskRegistry> {
        &self.tasks
    }

    /// Validate, track and record a batch, then refresh it in the background.
    ///
    /// Returns as soon as the PROCESSING operation is persisted.
    pub async fn submit(self: &Arc<Self>, keys: &[String]) -> Result<OperationRow, RefreshError> {
        validate_batch(keys, self.max_batch_keys)?;

        let rows = self.coordinator.ensure_tracked(keys).await?;
        let artifact_ids: Vec<Uuid> = rows.iter().map(|row| row.artifact_id).collect();
        let operation = self.create(keys, &artifact_ids).await?;

        tracing::info!(
            operation_id = %operation.operation_id,
            keys = keys.len(),
            "Operation submitted"
        );

        self.spawn_driver(operation.operation_id, distinct_keys(&rows))
            .await;
        Ok(operation)
    }

    /// Persist a PROCESSING operation over parallel key and row-id lists.
    pub async fn create(
        &self,
        requested_keys: &[String],
        artifact_ids: &[Uuid],
    ) -> Result<OperationRow, RefreshError> {
        let operation = OperationRow::new(requested_keys, artifact_ids, OffsetDateTime::now_utc())?;
        self.metadata.create_operation(&operation).await?;
        metrics::OPERATIONS_CREATED.inc();
        Ok(operation)
    }

    /// Settle the operation's status from its rows if every row is terminal.
    ///
    /// An operation that references no rows fails immediately.
    pub async fn finalize(&self, operation_id: Uuid) -> Result<OperationStatus, RefreshError> {
        let operation = self.load(operation_id).await?;
        let persisted = operation.status()?;
        if persisted.is_terminal() {
            return Ok(persisted);
        }

        let artifact_ids = operation.artifact_ids()?;
        let status = if artifact_ids.is_empty() {
            OperationStatus::Failure
        } else {
            let rows = self.load_rows(&artifact_ids).await?;
            tally(&artifact_ids, &rows).status()
        };

        if status.is_terminal() {
            self.persist_terminal(operation_id, status).await?;
        }
        Ok(status)
    }

    /// Build the read model, persisting a terminal status the first time it
    /// is observed.
    pub async fn status(&self, operation_id: Uuid) -> Result<OperationView, RefreshError> {
        let operation = self.load(operation_id).await?;
        let entries = operation.entries()?;

        let artifact_ids: Vec<Uuid> = entries.iter().map(|(_, id)| *id).collect();
        let rows = self.load_rows(&artifact_ids).await?;

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (key, artifact_id) in &entries {
            let Some(row) = rows.get(artifact_id) else {
                continue;
            };
            match (row.status()?, &row.artifact_url) {
                (ArtifactStatus::Success, Some(url)) => results.push(KeyResult {
                    key: key.clone(),
                    url: url.clone(),
                }),
                (ArtifactStatus::Failure, _) => failures.push(KeyFailure {
                    key: key.clone(),
                    reason: row
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "unknown failure".to_string()),
                }),
                _ => {}
            }
        }

        let error = entries
            .is_empty()
            .then(|| EMPTY_OPERATION_ERROR.to_string());

        let persisted = operation.status()?;
        let status = if persisted.is_terminal() {
            persisted
        } else {
            let live = if entries.is_empty() {
                OperationStatus::Failure
            } else {
                tally(&artifact_ids, &rows).status()
            };
            if live.is_terminal() {
                self.persist_terminal(operation_id, live).await?;
            }
            live
        };

        Ok(OperationView {
            operation_id,
            status,
            results,
            failures,
            error,
        })
    }

    /// Re-drive operations a previous process left in PROCESSING.
    pub async fn resume_open_operations(self: &Arc<Self>) -> Result<usize, RefreshError> {
        let open = self.metadata.list_open_operations(RESUME_LIMIT).await?;

        for operation in &open {
            let artifact_ids = operation.artifact_ids()?;
            let rows = self.load_rows(&artifact_ids).await?;
            let ordered: Vec<ArtifactRow> = artifact_ids
                .iter()
                .filter_map(|id| rows.get(id).cloned())
                .collect();
            tracing::info!(
                operation_id = %operation.operation_id,
                artifacts = ordered.len(),
                "Resuming open operation"
            );
            self.spawn_driver(operation.operation_id, distinct_keys(&ordered))
                .await;
        }

        Ok(open.len())
    }

    /// Refresh every key to a terminal state, then finalize.
    pub async fn drive(
        &self,
        operation_id: Uuid,
        canonical_keys: &[String],
    ) -> Result<OperationStatus, RefreshError> {
        let outcomes = self.coordinator.refresh_all(canonical_keys).await;
        for (key, outcome) in canonical_keys.iter().zip(&outcomes) {
            if let Err(e) = outcome {
                tracing::warn!(
                    operation_id = %operation_id,
                    key = %key,
                    error = %e,
                    "Refresh did not settle"
                );
            }
        }

        let status = self.finalize(operation_id).await?;
        tracing::info!(operation_id = %operation_id, status = %status, "Operation driven");
        Ok(status)
    }

    async fn spawn_driver(self: &Arc<Self>, operation_id: Uuid, canonical_keys: Vec<String>) {
        let this = Arc::clone(self);
        metrics::BATCH_DRIVERS_ACTIVE.inc();
        let handle = tokio::spawn(async move {
            if let Err(e) = this.drive(operation_id, &canonical_keys).await {
                tracing::error!(operation_id = %operation_id, error = %e, "Batch driver failed");
            }
            metrics::BATCH_DRIVERS_ACTIVE.dec();
        });
        self.tasks.register(operation_id, handle).await;
    }

    async fn persist_terminal(
        &self,
        operation_id: Uuid,
        status: OperationStatus,
    ) -> Result<(), RefreshError> {
        let updated = self
            .metadata
            .complete_operation(operation_id, status.as_str(), OffsetDateTime::now_utc())
            .await?;
        if updated {
            metrics::OPERATIONS_FINALIZED
                .with_label_values(&[status.as_str()])
                .inc();
            tracing::debug!(operation_id = %operation_id, status = %status, "Operation completed");
        }
        Ok(())
    }

    async fn load(&self, operation_id: Uuid) -> Result<OperationRow, RefreshError> {
        self.metadata
            .get_operation(operation_id)
            .await?
            .ok_or(RefreshError::OperationNotFound(operation_id))
    }

    async fn load_rows(
        &self,
        artifact_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, ArtifactRow>, RefreshError> {
        let mut unique = artifact_ids.to_vec();
        let mut seen = HashSet::new();
        unique.retain(|id| seen.insert(*id));

        let rows = self.metadata.get_artifacts(&unique).await?;
        Ok(rows.into_iter().map(|row| (row.artifact_id, row)).collect())
    }
}

/// Count one outcome per referenced row id; ids without a row stay pending.
fn tally(artifact_ids: &[Uuid], rows: &HashMap<Uuid, ArtifactRow>) -> OutcomeCounts {
    let mut counts = OutcomeCounts::default();
    for artifact_id in artifact_ids {
        match rows.get(artifact_id).map(ArtifactRow::status) {
            Some(Ok(status)) => counts.record(status),
            _ => counts.record_missing(),
        }
    }
    counts
}

/// Canonical keys in first-seen order, one per row.
fn distinct_keys(rows: &[ArtifactRow]) -> Vec<String> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter(|row| seen.insert(row.canonical_key.as_str()))
        .map(|row| row.canonical_key.clone())
        .collect()
}
