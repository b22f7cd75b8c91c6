//! Import endpoints
//!
//! - api_submit_import: run one batch submission, answer with the report
//! - api_confirm_batch: staged → confirmed
//! - api_undo_batch: remove a staged batch's transactions

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use homeledger_core::{ImportOutcome, ImportReport, ImportRequest};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Submit a batch (JSON API)
///
/// Always answers with the report; a refused submission is a 422.
pub async fn api_submit_import(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> ApiResult<(StatusCode, Json<ImportReport>)> {
    if request.tenant_id.trim().is_empty() {
        return Err(ApiError::BadRequest {
            message: "tenant_id is required".to_string(),
        });
    }

    let report = state.service.import(request).await;
    state.persist().await;

    let status = match report.outcome {
        ImportOutcome::Rejected => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::OK,
    };
    Ok((status, Json(report)))
}

/// Confirm a staged batch (JSON API)
pub async fn api_confirm_batch(
    State(state): State<AppState>,
    Path((tenant, batch_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let batch = state.service.confirm_batch(&tenant, &batch_id).await?;
    state.persist().await;
    Ok(Json(json!({
        "batch_id": batch.id,
        "status": batch.status,
        "month": batch.month,
    })))
}

/// Undo a staged batch (JSON API)
pub async fn api_undo_batch(
    State(state): State<AppState>,
    Path((tenant, batch_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let removed = state.service.undo_batch(&tenant, &batch_id).await?;
    state.persist().await;
    Ok(Json(json!({ "batch_id": batch_id, "removed": removed })))
}
