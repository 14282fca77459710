//! Core endpoints: health, discovery, the JSON-RPC endpoint, and the SSE
//! stream
//!
//! The JSON-RPC endpoint always answers at transport status 200 (or 204 when
//! the protocol produces no body); the protocol-level error code is the true
//! signal on this surface.

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::Stream;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::{AppError, UnifiedError};
use crate::rpc::engine::{self, EngineReply};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub jsonrpc_endpoint: &'static str,
    pub events_endpoint: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn discovery() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        jsonrpc_endpoint: "/mcp/jsonrpc",
        events_endpoint: "/mcp/events/{client_id}",
    })
}

/// Transport-level failures on the JSON-RPC surface still render as protocol
/// error envelopes at status 200.
fn rpc_error_response(err: &AppError) -> Response {
    let envelope = UnifiedError::from_app_error(err).into_rpc_envelope(None);
    (StatusCode::OK, Json(envelope)).into_response()
}

pub async fn rpc_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    if !content_type.contains("application/json") {
        return rpc_error_response(&AppError::parse("Content type must be application/json"));
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return rpc_error_response(&AppError::parse("Parse error: invalid JSON")),
    };
    if !payload.is_object() && !payload.is_array() {
        return rpc_error_response(&AppError::parse(
            "Parse error: request must be an object or an array",
        ));
    }

    match engine::handle_payload(&state, &payload).await {
        EngineReply::NoContent => StatusCode::NO_CONTENT.into_response(),
        EngineReply::Single(response) => (StatusCode::OK, Json(response)).into_response(),
        EngineReply::Batch(responses) => {
            (StatusCode::OK, Json(Value::Array(responses))).into_response()
        }
    }
}

pub async fn connect() -> Json<Value> {
    Json(json!({ "client_id": Uuid::new_v4().to_string() }))
}

pub async fn events(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if client_id.trim().is_empty() {
        return Err(AppError::malformed("Invalid client ID"));
    }

    let rx = state.events.subscribe(&client_id).await;
    state
        .events
        .send(
            &client_id,
            json!({ "type": "connection_established" }),
            Some("system"),
        )
        .await;

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let broker_event = rx.recv().await?;
        let mut event = Event::default().data(broker_event.data.to_string());
        if let Some(name) = broker_event.event {
            event = event.event(name);
        }
        Some((Ok(event), rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.sse_keepalive)))
}
