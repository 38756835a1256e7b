//! Artifact cache repository.

use crate::error::MetadataResult;
use crate::models::ArtifactRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Bounds for an atomic PROCESSING claim.
///
/// A row is claimable when it is NEW, FAILURE or STALE; when it is SUCCESS
/// with a fetch older than `success_fetched_before`; or when it is PROCESSING
/// with a claim older than `lease_cutoff` (its previous claimant is presumed
/// dead).
#[derive(Debug, Clone, Copy)]
pub struct ClaimWindow {
    /// Timestamp recorded as the new claim (and `updated_at`).
    pub claimed_at: OffsetDateTime,
    pub success_fetched_before: OffsetDateTime,
    pub lease_cutoff: OffsetDateTime,
}

/// Repository for artifact cache rows.
#[async_trait]
pub trait ArtifactRepo: Send + Sync {
    /// Insert a NEW row, or on canonical-key conflict update only the
    /// requested key. Returns the stored row either way.
    ///
    /// This is a single `INSERT ... ON CONFLICT ... RETURNING` statement, so
    /// concurrent callers for the same key never create two rows.
    async fn upsert_artifact(&self, artifact: &ArtifactRow) -> MetadataResult<ArtifactRow>;

    /// Get an artifact by ID.
    async fn get_artifact(&self, artifact_id: Uuid) -> MetadataResult<Option<ArtifactRow>>;

    /// Get an artifact by canonical key.
    async fn get_artifact_by_key(&self, canonical_key: &str)
    -> MetadataResult<Option<ArtifactRow>>;

    /// Get every artifact whose ID is in `artifact_ids`. Unknown IDs are
    /// silently absent from the result; order is unspecified.
    async fn get_artifacts(&self, artifact_ids: &[Uuid]) -> MetadataResult<Vec<ArtifactRow>>;

    /// Transition SUCCESS -> STALE if the last fetch predates `fetched_before`.
    /// Returns true if the row changed.
    async fn mark_stale(
        &self,
        canonical_key: &str,
        fetched_before: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Atomically claim a row for refresh (transition to PROCESSING).
    ///
    /// Returns true for exactly one caller among concurrent claimants: the
    /// leader. The check and the write are one conditional UPDATE.
    async fn try_claim(&self, canonical_key: &str, window: ClaimWindow) -> MetadataResult<bool>;

    /// Record a successful fetch. Clears the failure reason and the claim.
    async fn complete_success(
        &self,
        artifact_id: Uuid,
        artifact_url: &str,
        fetched_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Record a failed fetch. Clears the URL and the claim; keeps `fetched_at`.
    async fn complete_failure(
        &self,
        artifact_id: Uuid,
        reason: &str,
        failed_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// NEW or STALE rows, least recently updated first.
    async fn list_unfetched(&self, limit: u32) -> MetadataResult<Vec<ArtifactRow>>;

    /// SUCCESS rows fetched before `fetched_before`, oldest fetch first.
    async fn list_expired(
        &self,
        fetched_before: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<ArtifactRow>>;

    /// PROCESSING rows whose claim predates `claimed_before`, oldest first.
    async fn list_abandoned_claims(
        &self,
        claimed_before: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<ArtifactRow>>;
}
