//! Built-in tools registered at startup

use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};

use crate::tools::{tool_handler, ParamType, ParameterSpec, ToolDefinition, ToolRegistry};

pub fn register_builtin_tools(registry: &ToolRegistry) {
    registry.register(ToolDefinition {
        name: "echo".to_string(),
        description: "Echo back the input message".to_string(),
        parameters: vec![ParameterSpec::required(
            "message",
            ParamType::String,
            "Message to echo",
        )],
        returns: json!({
            "type": "object",
            "properties": { "message": { "type": "string" } }
        }),
        handler: tool_handler(|params| async move {
            Ok(json!({
                "message": params.get("message").cloned().unwrap_or(Value::Null)
            }))
        }),
    });

    registry.register(ToolDefinition {
        name: "server_info".to_string(),
        description: "Get information about the server".to_string(),
        parameters: vec![],
        returns: json!({
            "type": "object",
            "properties": {
                "platform": { "type": "string" },
                "arch": { "type": "string" },
                "version": { "type": "string" },
                "time": { "type": "number" }
            }
        }),
        handler: tool_handler(|_params| async move {
            Ok(json!({
                "platform": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
                "version": env!("CARGO_PKG_VERSION"),
                "time": Utc::now().timestamp_millis() as f64 / 1000.0,
            }))
        }),
    });

    registry.register(ToolDefinition {
        name: "random_number".to_string(),
        description: "Generate a random number within a range".to_string(),
        parameters: vec![
            ParameterSpec::optional("min", ParamType::Integer, "Minimum value (inclusive)")
                .with_default(json!(0)),
            ParameterSpec::optional("max", ParamType::Integer, "Maximum value (inclusive)")
                .with_default(json!(100)),
        ],
        returns: json!({
            "type": "object",
            "properties": { "number": { "type": "integer" } }
        }),
        handler: tool_handler(|params| async move {
            let mut min = params.get("min").and_then(Value::as_i64).unwrap_or(0);
            let mut max = params.get("max").and_then(Value::as_i64).unwrap_or(100);
            if min > max {
                std::mem::swap(&mut min, &mut max);
            }
            let number = rand::thread_rng().gen_range(min..=max);
            Ok(json!({ "number": number }))
        }),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolRegistry {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry);
        registry
    }

    #[tokio::test]
    async fn echo_returns_its_input_unchanged() {
        let registry = registry();
        for message in ["hi", "", "with spaces and ünïcode"] {
            let result = registry
                .execute("echo", Some(&json!({ "message": message })))
                .await
                .expect("echo succeeds");
            assert_eq!(result, json!({ "message": message }));
        }
    }

    #[tokio::test]
    async fn server_info_reports_platform_and_version() {
        let registry = registry();
        let result = registry
            .execute("server_info", None)
            .await
            .expect("server_info succeeds");

        assert_eq!(result["platform"], std::env::consts::OS);
        assert_eq!(result["version"], env!("CARGO_PKG_VERSION"));
        assert!(result["time"].as_f64().expect("time") > 0.0);
    }

    #[tokio::test]
    async fn random_number_respects_bounds_and_defaults() {
        let registry = registry();

        let result = registry
            .execute("random_number", Some(&json!({ "min": 5, "max": 7 })))
            .await
            .expect("random_number succeeds");
        let number = result["number"].as_i64().expect("number");
        assert!((5..=7).contains(&number));

        let result = registry
            .execute("random_number", Some(&json!({})))
            .await
            .expect("defaults apply");
        let number = result["number"].as_i64().expect("number");
        assert!((0..=100).contains(&number));
    }

    #[tokio::test]
    async fn random_number_swaps_inverted_bounds() {
        let registry = registry();
        let result = registry
            .execute("random_number", Some(&json!({ "min": 9, "max": 3 })))
            .await
            .expect("inverted bounds succeed");
        let number = result["number"].as_i64().expect("number");
        assert!((3..=9).contains(&number));
    }

    #[tokio::test]
    async fn all_builtins_are_listed() {
        let registry = registry();
        let mut names: Vec<String> = registry.list().into_iter().map(|tool| tool.name).collect();
        names.sort();
        assert_eq!(names, ["echo", "random_number", "server_info"]);
    }
}
