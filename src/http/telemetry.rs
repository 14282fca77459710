//! REST handlers for telemetry reads (developer role and above)

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::services::telemetry::{OperationRecord, OperationStatus};
use crate::AppState;

pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(state.telemetry.metrics())
}

#[derive(Debug, Deserialize)]
pub struct OperationsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

pub async fn list_operations(
    State(state): State<AppState>,
    Query(query): Query<OperationsQuery>,
) -> Result<Json<Value>, AppError> {
    if query.limit == 0 || query.limit > 1000 {
        return Err(AppError::invalid_params("limit must be between 1 and 1000"));
    }

    let status = match query.status.as_deref() {
        None => None,
        Some("running") => Some(OperationStatus::Running),
        Some("completed") => Some(OperationStatus::Completed),
        Some("failed") => Some(OperationStatus::Failed),
        Some(_) => {
            return Err(AppError::invalid_params(
                "status must be one of: running, completed, failed",
            ))
        }
    };

    let operations = state.telemetry.operations(status, query.limit);
    Ok(Json(json!({
        "count": operations.len(),
        "operations": operations,
    })))
}

pub async fn get_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Result<Json<OperationRecord>, AppError> {
    state
        .telemetry
        .operation(&operation_id)
        .map(Json)
        .ok_or_else(|| AppError::resource_not_found("Operation not found"))
}
