//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use easel_core::{ArtifactStatus, CanonicalKey, OperationStatus};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

// =============================================================================
// Artifacts
// =============================================================================

/// Cached artifact record, one per canonical key.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactRow {
    pub artifact_id: Uuid,
    pub canonical_key: String,
    /// Key as last requested by a caller (original casing).
    pub requested_key: String,
    pub artifact_url: Option<String>,
    pub status: String,
    /// Time of the last successful upstream fetch.
    pub fetched_at: Option<OffsetDateTime>,
    pub failure_reason: Option<String>,
    /// Set when the row enters PROCESSING; anchors the claim lease.
    pub claimed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ArtifactRow {
    /// Build a NEW row for a key observed for the first time.
    pub fn new(key: &CanonicalKey, requested_key: &str, now: OffsetDateTime) -> Self {
        Self {
            artifact_id: Uuid::new_v4(),
            canonical_key: key.as_str().to_string(),
            requested_key: requested_key.to_string(),
            artifact_url: None,
            status: ArtifactStatus::New.as_str().to_string(),
            fetched_at: None,
            failure_reason: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parse the stored status.
    pub fn status(&self) -> MetadataResult<ArtifactStatus> {
        self.status.parse().map_err(|e| {
            MetadataError::Corrupt(format!("artifact {}: {e}", self.artifact_id))
        })
    }

    /// A SUCCESS row whose last fetch is younger than `ttl`.
    pub fn is_fresh(&self, now: OffsetDateTime, ttl: Duration) -> bool {
        self.status == ArtifactStatus::Success.as_str()
            && self.fetched_at.is_some_and(|fetched| now - fetched < ttl)
    }

    /// A SUCCESS row whose last fetch is at least `ttl` old.
    pub fn is_expired(&self, now: OffsetDateTime, ttl: Duration) -> bool {
        self.status == ArtifactStatus::Success.as_str() && !self.is_fresh(now, ttl)
    }
}

// =============================================================================
// Operations
// =============================================================================

/// Batch operation record.
///
/// `artifact_ids` and `requested_keys` are JSON arrays of equal length; entry
/// `i` of each describes the `i`-th key of the submitted batch.
#[derive(Debug, Clone, FromRow)]
pub struct OperationRow {
    pub operation_id: Uuid,
    pub status: String,
    pub artifact_ids: String,   // JSON array of UUIDs
    pub requested_keys: String, // JSON array of strings
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl OperationRow {
    /// Build a PROCESSING operation over parallel key and row-id lists.
    pub fn new(
        requested_keys: &[String],
        artifact_ids: &[Uuid],
        now: OffsetDateTime,
    ) -> MetadataResult<Self> {
        if requested_keys.len() != artifact_ids.len() {
            return Err(MetadataError::Internal(format!(
                "operation lists differ in length: {} keys, {} artifact ids",
                requested_keys.len(),
                artifact_ids.len()
            )));
        }
        Ok(Self {
            operation_id: Uuid::new_v4(),
            status: OperationStatus::Processing.as_str().to_string(),
            artifact_ids: serde_json::to_string(artifact_ids)?,
            requested_keys: serde_json::to_string(requested_keys)?,
            created_at: now,
            completed_at: None,
        })
    }

    pub fn status(&self) -> MetadataResult<OperationStatus> {
        self.status.parse().map_err(|e| {
            MetadataError::Corrupt(format!("operation {}: {e}", self.operation_id))
        })
    }

    pub fn artifact_ids(&self) -> MetadataResult<Vec<Uuid>> {
        Ok(serde_json::from_str(&self.artifact_ids)?)
    }

    pub fn requested_keys(&self) -> MetadataResult<Vec<String>> {
        Ok(serde_json::from_str(&self.requested_keys)?)
    }

    /// Decode both lists, checking that they are still parallel.
    pub fn entries(&self) -> MetadataResult<Vec<(String, Uuid)>> {
        let keys = self.requested_keys()?;
        let ids = self.artifact_ids()?;
        if keys.len() != ids.len() {
            return Err(MetadataError::Corrupt(format!(
                "operation {}: {} keys but {} artifact ids",
                self.operation_id,
                keys.len(),
                ids.len()
            )));
        }
        Ok(keys.into_iter().zip(ids).collect())
    }
}
