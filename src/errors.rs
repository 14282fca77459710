//! Error taxonomy shared by the JSON-RPC and REST surfaces
//!
//! Every failure in the server is one of a closed set of kinds, each carrying
//! a fixed JSON-RPC error code and a fixed default HTTP status. The mapping
//! table is static so the same failure always renders identically on both
//! surfaces.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// The closed set of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedEnvelope,
    MethodNotFound,
    InvalidParams,
    Internal,
    Parse,
    ResourceNotFound,
    AuthenticationRequired,
    AuthorizationDenied,
}

impl ErrorKind {
    pub const fn rpc_code(self) -> i64 {
        match self {
            Self::MalformedEnvelope => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::Internal => -32603,
            Self::Parse => -32700,
            Self::ResourceNotFound => -32800,
            Self::AuthenticationRequired => -32000,
            Self::AuthorizationDenied => -32001,
        }
    }

    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::MalformedEnvelope | Self::Parse => StatusCode::BAD_REQUEST,
            Self::MethodNotFound | Self::ResourceNotFound => StatusCode::NOT_FOUND,
            Self::InvalidParams => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::AuthorizationDenied => StatusCode::FORBIDDEN,
        }
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::MalformedEnvelope => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::Internal => "Internal error",
            Self::Parse => "Parse error",
            Self::ResourceNotFound => "Resource not found",
            Self::AuthenticationRequired => "Authentication required",
            Self::AuthorizationDenied => "Authorization denied",
        }
    }

    /// An error of this kind carrying its default message.
    pub fn into_error(self) -> AppError {
        AppError::new(self, self.default_message())
    }
}

/// HTTP status to JSON-RPC error code. One representative code per status;
/// anything unlisted falls back to internal-failure.
pub fn rpc_code_for_status(status: StatusCode) -> i64 {
    match status {
        StatusCode::BAD_REQUEST => ErrorKind::MalformedEnvelope.rpc_code(),
        StatusCode::UNAUTHORIZED => ErrorKind::AuthenticationRequired.rpc_code(),
        StatusCode::FORBIDDEN => ErrorKind::AuthorizationDenied.rpc_code(),
        StatusCode::NOT_FOUND => ErrorKind::ResourceNotFound.rpc_code(),
        StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::InvalidParams.rpc_code(),
        StatusCode::INTERNAL_SERVER_ERROR => ErrorKind::Internal.rpc_code(),
        _ => ErrorKind::Internal.rpc_code(),
    }
}

/// JSON-RPC error code to HTTP status. Unknown codes fall back to 500.
pub fn status_for_rpc_code(code: i64) -> StatusCode {
    match code {
        -32600 | -32700 => StatusCode::BAD_REQUEST,
        -32601 | -32800 => StatusCode::NOT_FOUND,
        -32602 => StatusCode::UNPROCESSABLE_ENTITY,
        -32603 => StatusCode::INTERNAL_SERVER_ERROR,
        -32000 => StatusCode::UNAUTHORIZED,
        -32001 => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A typed protocol failure: one kind plus a human-readable message and an
/// optional structured payload. The code is derived from the kind, never
/// stored, so an error can never disagree with the taxonomy.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub data: Option<Value>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedEnvelope, message)
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MethodNotFound, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn resource_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceNotFound, message)
    }

    pub fn authentication_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationRequired, message)
    }

    pub fn authorization_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthorizationDenied, message)
    }

    pub fn rpc_code(&self) -> i64 {
        self.kind.rpc_code()
    }
}

/// Which surface a failure originated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    Http,
    Jsonrpc,
}

/// The canonical internal error shape. Every failure is normalized into this
/// before being rendered onto either surface.
#[derive(Debug, Clone, Serialize)]
pub struct UnifiedError {
    pub status: u16,
    pub error_code: i64,
    pub message: String,
    pub detail: Option<Value>,
    pub source: ErrorSource,
}

impl UnifiedError {
    pub fn from_app_error(err: &AppError) -> Self {
        Self {
            status: status_for_rpc_code(err.rpc_code()).as_u16(),
            error_code: err.rpc_code(),
            message: err.message.clone(),
            detail: err.data.clone(),
            source: ErrorSource::Jsonrpc,
        }
    }

    /// From a transport-level fault that already carries its own status.
    pub fn from_status(status: StatusCode, detail: Value) -> Self {
        let (message, detail) = match detail {
            Value::String(text) => (text, None),
            other => ("HTTP error".to_string(), Some(other)),
        };
        Self {
            status: status.as_u16(),
            error_code: rpc_code_for_status(status),
            message,
            detail,
            source: ErrorSource::Http,
        }
    }

    pub fn from_unexpected(err: &dyn std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            error_code: ErrorKind::Internal.rpc_code(),
            message: "An unexpected error occurred".to_string(),
            detail: Some(json!({ "error": err.to_string() })),
            source: ErrorSource::Http,
        }
    }

    /// REST rendering: the real status code with the flat error body.
    pub fn into_rest_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(json!({
                "error_code": self.error_code,
                "message": self.message,
                "detail": self.detail,
            })),
        )
            .into_response()
    }

    /// JSON-RPC rendering: a full error envelope, to be sent at transport
    /// status 200 by the caller.
    pub fn into_rpc_envelope(self, id: Option<Value>) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": self.error_code,
                "message": self.message,
                "data": self.detail,
            }
        })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.kind == ErrorKind::Internal {
            tracing::error!(error = %self.message, "request failed with internal error");
        }
        UnifiedError::from_app_error(&self).into_rest_response()
    }
}
