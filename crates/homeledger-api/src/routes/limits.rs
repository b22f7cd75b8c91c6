//! Category limit endpoints
//!
//! - api_limit_status: spend-to-date per limited category for a month
//! - api_evaluate_transaction: would this one transaction be flagged

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

use homeledger_core::fingerprint::fingerprint;
use homeledger_core::{CategoryStatus, FlagDecision, TransactionRecord, UNCATEGORIZED};
use homeledger_utils::{month_bounds, month_key};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Spend status for `?month=YYYY-MM`, the current month when absent (JSON API)
pub async fn api_limit_status(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<CategoryStatus>>> {
    let month = match params.get("month") {
        Some(month) => {
            if month_bounds(month).is_some() {
                month.clone()
            } else {
                return Err(ApiError::BadRequest {
                    message: format!("month must be YYYY-MM, got '{}'", month),
                });
            }
        }
        None => month_key(Utc::now().date_naive()),
    };

    let statuses = state.service.limit_status(&tenant, &month).await?;
    Ok(Json(statuses))
}

/// A transaction about to be added or edited
#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    /// Id of the stored transaction when editing
    #[serde(default)]
    pub id: Option<String>,
    pub date: NaiveDate,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Flag decision for a single transaction (JSON API)
pub async fn api_evaluate_transaction(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(request): Json<EvaluateRequest>,
) -> ApiResult<Json<FlagDecision>> {
    let currency = request
        .currency
        .unwrap_or_else(|| state.service.options().default_currency.clone());
    let transaction = TransactionRecord {
        id: request.id,
        tenant_id: tenant.clone(),
        date: request.date,
        fingerprint: fingerprint(&tenant, &currency, request.date, request.amount, &request.description),
        currency,
        amount: request.amount,
        description: request.description,
        category: request.category.unwrap_or_else(|| UNCATEGORIZED.to_string()),
        payer: None,
        source: "manual".to_string(),
        recurrence_key: None,
        batch_id: None,
        flag: FlagDecision::none(),
        flag_source: None,
    };

    let decision = state.service.evaluate_transaction(&transaction).await?;
    Ok(Json(decision))
}
