//! REST handlers for API-key management

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::AppError;
use crate::services::auth::{AuthContext, Role};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

pub async fn create_key(
    State(state): State<AppState>,
    Json(request): Json<CreateKeyRequest>,
) -> Json<Value> {
    let user_id = request
        .user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let role = request.role.unwrap_or(Role::User);

    let api_key = state.auth.issue_key(&user_id, role);
    Json(json!({
        "api_key": api_key,
        "user_id": user_id,
        "role": role,
    }))
}

pub async fn revoke_key(
    State(state): State<AppState>,
    Path(api_key): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !state.auth.revoke(&api_key) {
        return Err(AppError::resource_not_found("API key not found"));
    }
    Ok(Json(json!({ "success": true })))
}

pub async fn me(Extension(context): Extension<AuthContext>) -> Json<AuthContext> {
    Json(context)
}
