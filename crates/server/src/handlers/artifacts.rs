//! Artifact lookup endpoint.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use easel_core::{ArtifactStatus, CanonicalKey};
use easel_metadata::models::ArtifactRow;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Artifact response.
#[derive(Debug, Serialize)]
pub struct ArtifactResponse {
    pub artifact_id: Uuid,
    pub key: String,
    pub requested_key: String,
    pub status: ArtifactStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub updated_at: String,
}

impl TryFrom<ArtifactRow> for ArtifactResponse {
    type Error = ApiError;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        Ok(Self {
            artifact_id: row.artifact_id,
            status: row.status()?,
            key: row.canonical_key,
            requested_key: row.requested_key,
            url: row.artifact_url,
            fetched_at: row.fetched_at.map(format_timestamp).transpose()?,
            failure_reason: row.failure_reason,
            updated_at: format_timestamp(row.updated_at)?,
        })
    }
}

fn format_timestamp(ts: OffsetDateTime) -> ApiResult<String> {
    ts.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format timestamp: {e}")))
}

/// GET /v1/artifacts/{key} - Current cache row for a key.
///
/// Read-only: never triggers an upstream fetch.
pub async fn get_artifact(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<ArtifactResponse>> {
    let key = CanonicalKey::parse(&key)?;
    let row = state
        .metadata
        .get_artifact_by_key(key.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("artifact not tracked: {key}")))?;

    Ok(Json(row.try_into()?))
}
