//! JSON-RPC wire representations and envelope shape checking

use serde_json::{json, Value};

use crate::errors::AppError;

pub const PROTOCOL_VERSION: &str = "2.0";

/// A request identifier. Echoed back type-preserving: a string id comes back
/// as a string, an integer id as an integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    /// `null` and non-string/non-integer values yield `None`, which the
    /// engine treats the same as an absent id.
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(text) = value.as_str() {
            return Some(Self::String(text.to_string()));
        }
        value.as_i64().map(Self::Number)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::String(text) => json!(text),
            Self::Number(number) => json!(number),
        }
    }
}

/// One parsed request or notification.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub id: Option<RequestId>,
    pub method: String,
    pub params: Option<Value>,
}

impl RequestEnvelope {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Shape-check one decoded JSON value. Violations come back as
/// malformed-envelope errors paired with whatever id could be salvaged, so
/// the caller can still address the error response correctly.
pub fn parse_envelope(value: &Value) -> Result<RequestEnvelope, (Option<RequestId>, AppError)> {
    let Some(object) = value.as_object() else {
        return Err((None, AppError::malformed("Invalid Request")));
    };

    let id = object.get("id").and_then(RequestId::from_value);

    match object.get("jsonrpc").and_then(Value::as_str) {
        Some(PROTOCOL_VERSION) => {}
        _ => return Err((id, AppError::malformed("Invalid Request"))),
    }

    let method = match object.get("method").and_then(Value::as_str) {
        Some(method) if !method.trim().is_empty() => method.to_string(),
        _ => {
            return Err((
                id,
                AppError::malformed("Invalid Request: method must be a non-empty string"),
            ))
        }
    };

    Ok(RequestEnvelope {
        id,
        method,
        params: object.get("params").cloned(),
    })
}

pub fn success_envelope(id: &RequestId, result: Value) -> Value {
    json!({
        "jsonrpc": PROTOCOL_VERSION,
        "id": id.to_value(),
        "result": result,
    })
}

pub fn error_envelope(id: Option<&RequestId>, err: &AppError) -> Value {
    let mut error = json!({
        "code": err.rpc_code(),
        "message": err.message,
    });
    if let Some(data) = &err.data {
        error["data"] = data.clone();
    }
    json!({
        "jsonrpc": PROTOCOL_VERSION,
        "id": id.map(RequestId::to_value).unwrap_or(Value::Null),
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_with_string_id() {
        let envelope = parse_envelope(&json!({
            "jsonrpc": "2.0",
            "id": "req-1",
            "method": "echo",
            "params": { "message": "hi" }
        }))
        .expect("valid envelope");

        assert_eq!(envelope.id, Some(RequestId::String("req-1".to_string())));
        assert_eq!(envelope.method, "echo");
        assert!(!envelope.is_notification());
    }

    #[test]
    fn integer_id_stays_integer() {
        let envelope = parse_envelope(&json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "echo"
        }))
        .expect("valid envelope");

        assert_eq!(envelope.id, Some(RequestId::Number(7)));
        assert_eq!(
            success_envelope(envelope.id.as_ref().expect("id"), json!({}))["id"],
            json!(7)
        );
    }

    #[test]
    fn absent_and_null_ids_are_notifications() {
        let absent = parse_envelope(&json!({ "jsonrpc": "2.0", "method": "echo" }))
            .expect("valid envelope");
        let null = parse_envelope(&json!({ "jsonrpc": "2.0", "id": null, "method": "echo" }))
            .expect("valid envelope");

        assert!(absent.is_notification());
        assert!(null.is_notification());
    }

    #[test]
    fn rejects_wrong_protocol_version() {
        let (id, err) = parse_envelope(&json!({
            "jsonrpc": "1.0",
            "id": 1,
            "method": "echo"
        }))
        .expect_err("wrong version must fail");

        assert_eq!(id, Some(RequestId::Number(1)));
        assert_eq!(err.rpc_code(), -32600);
    }

    #[test]
    fn rejects_missing_version() {
        let (_, err) = parse_envelope(&json!({ "id": 1, "method": "echo" }))
            .expect_err("missing version must fail");
        assert_eq!(err.rpc_code(), -32600);
    }

    #[test]
    fn rejects_missing_or_non_string_method() {
        for payload in [
            json!({ "jsonrpc": "2.0", "id": 1 }),
            json!({ "jsonrpc": "2.0", "id": 1, "method": 42 }),
            json!({ "jsonrpc": "2.0", "id": 1, "method": "  " }),
        ] {
            let (id, err) = parse_envelope(&payload).expect_err("bad method must fail");
            assert_eq!(id, Some(RequestId::Number(1)));
            assert_eq!(err.rpc_code(), -32600);
        }
    }

    #[test]
    fn rejects_non_object_payloads() {
        for payload in [json!("text"), json!(3), json!(null), json!(true)] {
            let (id, err) = parse_envelope(&payload).expect_err("non-object must fail");
            assert_eq!(id, None);
            assert_eq!(err.rpc_code(), -32600);
        }
    }

    #[test]
    fn error_envelope_omits_absent_data() {
        let envelope = error_envelope(None, &AppError::method_not_found("Method not found"));

        assert_eq!(envelope["id"], Value::Null);
        assert_eq!(envelope["error"]["code"], -32601);
        assert!(envelope["error"].get("data").is_none());
    }

    #[test]
    fn error_envelope_carries_structured_data() {
        let err = AppError::invalid_params("Invalid params")
            .with_data(json!({ "violations": [{ "field": "message" }] }));
        let envelope = error_envelope(Some(&RequestId::String("a".into())), &err);

        assert_eq!(envelope["id"], "a");
        assert_eq!(
            envelope["error"]["data"]["violations"][0]["field"],
            "message"
        );
    }
}
