//! Batch operation endpoints.

use crate::error::{ApiError, ApiResult};
use crate::operations::OperationView;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Submit request body.
#[derive(Debug, Deserialize)]
pub struct SubmitOperationRequest {
    pub keys: Vec<String>,
}

/// Submit response body.
#[derive(Debug, Serialize)]
pub struct SubmitOperationResponse {
    pub operation_id: Uuid,
}

/// POST /v1/operations - Track a batch of keys and refresh them in the background.
///
/// Validation happens before anything is written; the response is sent
/// before any upstream call is made.
pub async fn submit_operation(
    State(state): State<AppState>,
    Json(request): Json<SubmitOperationRequest>,
) -> ApiResult<(StatusCode, Json<SubmitOperationResponse>)> {
    let operation = state.operations.submit(&request.keys).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitOperationResponse {
            operation_id: operation.operation_id,
        }),
    ))
}

/// GET /v1/operations/{operation_id} - Aggregated operation status.
pub async fn get_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> ApiResult<Json<OperationView>> {
    let operation_id = Uuid::parse_str(&operation_id)
        .map_err(|_| ApiError::BadRequest(format!("invalid operation id: {operation_id}")))?;

    let view = state.operations.status(operation_id).await?;
    Ok(Json(view))
}
