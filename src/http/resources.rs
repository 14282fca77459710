//! REST handlers for binary resource storage

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::errors::AppError;
use crate::services::resource::parse_resource_uri;
use crate::AppState;

fn resource_not_found(uri: &str) -> AppError {
    AppError::resource_not_found(format!("Resource not found: {uri}"))
}

/// Accept bare `{type}/{id}` forms as well as full URIs.
fn normalize_uri(raw: &str) -> String {
    if raw.starts_with("resource://") {
        raw.to_string()
    } else {
        format!("resource://{raw}")
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub ttl: Option<i64>,
    #[serde(default)]
    pub ext: Option<String>,
    /// JSON-encoded object of caller-supplied metadata.
    #[serde(default)]
    pub metadata: Option<String>,
}

pub async fn upload_resource(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let extra: Map<String, Value> = match query.metadata.as_deref() {
        None | Some("") => Map::new(),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|_| AppError::invalid_params("metadata must be a JSON object"))?,
    };

    let uri = state
        .resources
        .store(
            &body,
            &resource_type,
            extra,
            query.ext.as_deref().unwrap_or(""),
            query.ttl,
        )
        .await?;
    Ok(Json(json!({ "uri": uri })))
}

#[derive(Debug, Deserialize)]
pub struct GetResourceQuery {
    #[serde(default)]
    pub metadata_only: bool,
    #[serde(default)]
    pub download: bool,
}

pub async fn get_resource(
    State(state): State<AppState>,
    Path(uri): Path<String>,
    Query(query): Query<GetResourceQuery>,
) -> Result<Response, AppError> {
    let uri = normalize_uri(&uri);

    if query.metadata_only {
        let metadata = state
            .resources
            .metadata(&uri)
            .await?
            .ok_or_else(|| resource_not_found(&uri))?;
        let body = serde_json::to_value(&metadata)
            .map_err(|err| AppError::internal(format!("Error encoding metadata: {err}")))?;
        return Ok(Json(body).into_response());
    }

    let (bytes, metadata) = state
        .resources
        .fetch(&uri)
        .await?
        .ok_or_else(|| resource_not_found(&uri))?;

    let parsed = parse_resource_uri(&uri)?;
    let content_type = if metadata.resource_type == "screenshot" {
        "image/png"
    } else {
        match parsed.extension.as_str() {
            ".png" => "image/png",
            ".json" => "application/json",
            ".xml" => "application/xml",
            ".txt" => "text/plain",
            _ => "application/octet-stream",
        }
    };

    let mut response = (StatusCode::OK, bytes).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(content_type),
    );
    if query.download {
        let filename = uri.rsplit('/').next().unwrap_or("resource");
        if let Ok(value) =
            header::HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        {
            response
                .headers_mut()
                .insert(header::CONTENT_DISPOSITION, value);
        }
    }
    Ok(response)
}

pub async fn delete_resource(
    State(state): State<AppState>,
    Path(uri): Path<String>,
) -> Result<Json<Value>, AppError> {
    let uri = normalize_uri(&uri);
    if !state.resources.delete(&uri).await? {
        return Err(resource_not_found(&uri));
    }
    Ok(Json(json!({ "success": true, "uri": uri })))
}

pub async fn update_resource_metadata(
    State(state): State<AppState>,
    Path(uri): Path<String>,
    Json(updates): Json<Map<String, Value>>,
) -> Result<Json<Value>, AppError> {
    let uri = normalize_uri(&uri);
    if !state.resources.update_metadata(&uri, updates).await? {
        return Err(resource_not_found(&uri));
    }
    Ok(Json(json!({ "success": true, "uri": uri })))
}
