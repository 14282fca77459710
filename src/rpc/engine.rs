//! The JSON-RPC request state machine
//!
//! Stateless across requests: parse, shape-check, detect notifications,
//! dispatch against a fixed method table, assemble responses. Batch items are
//! processed independently so one failing handler never poisons its siblings.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::errors::{AppError, ErrorKind};
use crate::rpc::envelope::{self, parse_envelope, RequestEnvelope};
use crate::AppState;

pub type MethodFuture = BoxFuture<'static, Result<Value, AppError>>;
pub type MethodHandler = Box<dyn Fn(AppState, Option<Value>) -> MethodFuture + Send + Sync>;

/// Dispatch table mapping method names to owned async handlers. Built once by
/// an explicit init routine at startup and never mutated afterwards.
#[derive(Default)]
pub struct MethodTable {
    methods: HashMap<String, MethodHandler>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, handler: MethodHandler) {
        self.methods.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<&MethodHandler> {
        self.methods.get(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// The built-in method table: tool listing, tool execution, and a diagnostic
/// echo.
pub fn builtin_methods() -> MethodTable {
    let mut table = MethodTable::new();

    table.register(
        "list_tools",
        Box::new(|state, _params| {
            async move { Ok(json!(state.tools.list())) }.boxed()
        }),
    );

    table.register(
        "execute_tool",
        Box::new(|state, params| async move { execute_tool(state, params).await }.boxed()),
    );

    table.register(
        "echo",
        Box::new(|_state, params| {
            async move {
                match params {
                    Some(Value::Object(map)) if map.contains_key("message") => {
                        Ok(json!({ "message": map["message"] }))
                    }
                    _ => Err(AppError::invalid_params("Message parameter is required")),
                }
            }
            .boxed()
        }),
    );

    table
}

async fn execute_tool(state: AppState, params: Option<Value>) -> Result<Value, AppError> {
    let Some(Value::Object(params)) = params else {
        return Err(AppError::invalid_params("Parameters must be an object"));
    };

    let name = match params.get("name").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(AppError::invalid_params("Tool name is required")),
    };
    let tool_params = params.get("parameters").cloned();

    let operation = state.telemetry.start_operation(
        &format!("tool:{name}"),
        json!({ "tool": name }),
    );
    let started = std::time::Instant::now();

    let result = state.tools.execute(&name, tool_params.as_ref()).await;

    let elapsed = started.elapsed().as_secs_f64();
    state.telemetry.record_tool_run(&name, elapsed, result.is_ok());
    match &result {
        Ok(_) => state.telemetry.finish_operation(&operation),
        Err(err) => state.telemetry.fail_operation(&operation, &err.message),
    }

    info!(
        tool = %name,
        outcome = if result.is_ok() { "success" } else { "failure" },
        "tool execution"
    );

    result
}

/// Outcome of dispatching one envelope. Notifications resolve to `Silent`,
/// which keeps the never-respond rule an explicit branch instead of a
/// swallowed error.
#[derive(Debug)]
enum Dispatch {
    Reply(Value),
    Fail(AppError),
    Silent,
}

/// What the transport should put on the wire for a whole payload.
#[derive(Debug, PartialEq)]
pub enum EngineReply {
    /// Nothing at all: a lone notification or an all-notification batch.
    NoContent,
    Single(Value),
    Batch(Vec<Value>),
}

/// Entry point for one wire-level payload (a single envelope or a batch).
pub async fn handle_payload(state: &AppState, payload: &Value) -> EngineReply {
    if let Some(batch) = payload.as_array() {
        if batch.is_empty() {
            return EngineReply::Single(envelope::error_envelope(
                None,
                &AppError::malformed("Invalid Request: empty batch"),
            ));
        }

        // Sequential in input order; responses keep that order with
        // notification entries removed entirely.
        let mut replies = Vec::new();
        for item in batch {
            if let Some(reply) = handle_single(state, item).await {
                replies.push(reply);
            }
        }

        if replies.is_empty() {
            EngineReply::NoContent
        } else {
            EngineReply::Batch(replies)
        }
    } else {
        match handle_single(state, payload).await {
            Some(reply) => EngineReply::Single(reply),
            None => EngineReply::NoContent,
        }
    }
}

/// Process one envelope. `None` means a notification that must produce no
/// response entry at all.
pub async fn handle_single(state: &AppState, payload: &Value) -> Option<Value> {
    let request = match parse_envelope(payload) {
        Ok(request) => request,
        // Shape checking precedes notification detection: a structurally
        // invalid envelope is answered even without an id.
        Err((id, err)) => return Some(envelope::error_envelope(id.as_ref(), &err)),
    };

    match dispatch(state, &request).await {
        Dispatch::Silent => None,
        Dispatch::Reply(result) => request
            .id
            .as_ref()
            .map(|id| envelope::success_envelope(id, result)),
        Dispatch::Fail(err) => Some(envelope::error_envelope(request.id.as_ref(), &err)),
    }
}

async fn dispatch(state: &AppState, request: &RequestEnvelope) -> Dispatch {
    let Some(handler) = state.methods.get(&request.method) else {
        if request.is_notification() {
            debug!(method = %request.method, "dropping unknown-method notification");
            return Dispatch::Silent;
        }
        return Dispatch::Fail(ErrorKind::MethodNotFound.into_error());
    };

    // A panicking handler is converted to an internal failure at this
    // per-request boundary; sibling batch items keep running.
    let outcome = match AssertUnwindSafe(handler(state.clone(), request.params.clone()))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic);
            warn!(method = %request.method, panic = %message, "method handler panicked");
            Err(AppError::internal(format!("Internal error: {message}")))
        }
    };

    if request.is_notification() {
        if let Err(err) = &outcome {
            warn!(
                method = %request.method,
                error = %err.message,
                "notification handler failed; dropping per protocol"
            );
        }
        return Dispatch::Silent;
    }

    match outcome {
        Ok(result) => Dispatch::Reply(result),
        Err(err) => Dispatch::Fail(err),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
