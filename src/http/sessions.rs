//! REST handlers for session management

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::errors::AppError;
use crate::AppState;

fn session_not_found() -> AppError {
    AppError::resource_not_found("Session not found")
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub ttl: Option<i64>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<Value>, AppError> {
    let session_id = state.sessions.create(request.metadata, request.ttl).await?;
    Ok(Json(json!({ "session_id": session_id })))
}

#[derive(Debug, Deserialize)]
pub struct GetSessionQuery {
    #[serde(default)]
    pub context_only: bool,
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<GetSessionQuery>,
) -> Result<Json<Value>, AppError> {
    let session = state
        .sessions
        .get(&session_id)
        .await?
        .ok_or_else(session_not_found)?;

    if query.context_only {
        return Ok(Json(Value::Object(session.context)));
    }
    serde_json::to_value(&session)
        .map(Json)
        .map_err(|err| AppError::internal(format!("Error encoding session: {err}")))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

pub async fn update_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<UpdateSessionRequest>,
) -> Result<Json<Value>, AppError> {
    let updated = state
        .sessions
        .update(&session_id, request.context, request.metadata, true)
        .await?;
    if !updated {
        return Err(session_not_found());
    }
    Ok(Json(json!({ "success": true, "session_id": session_id })))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !state.sessions.delete(&session_id).await? {
        return Err(session_not_found());
    }
    Ok(Json(json!({ "success": true, "session_id": session_id })))
}

pub async fn session_heartbeat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !state.sessions.heartbeat(&session_id).await? {
        return Err(session_not_found());
    }
    Ok(Json(json!({ "success": true, "session_id": session_id })))
}

pub async fn get_context_value(
    State(state): State<AppState>,
    Path((session_id, key)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let session = state
        .sessions
        .get(&session_id)
        .await?
        .ok_or_else(session_not_found)?;

    let mut body = Map::new();
    body.insert(
        key.clone(),
        session.context.get(&key).cloned().unwrap_or(Value::Null),
    );
    Ok(Json(Value::Object(body)))
}

pub async fn set_context_value(
    State(state): State<AppState>,
    Path((session_id, key)): Path<(String, String)>,
    Json(value): Json<Value>,
) -> Result<Json<Value>, AppError> {
    if !state
        .sessions
        .set_context_value(&session_id, &key, value)
        .await?
    {
        return Err(session_not_found());
    }
    Ok(Json(
        json!({ "success": true, "session_id": session_id, "key": key }),
    ))
}

pub async fn list_sessions(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let sessions = state.sessions.list().await?;
    Ok(Json(json!({ "count": sessions.len(), "sessions": sessions })))
}
