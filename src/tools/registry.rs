//! Tool definitions, schema derivation, and validated execution
//!
//! A tool's parameter schema is derived once at registration time. Execution
//! validates and coerces raw parameters against the declared specs before the
//! handler ever runs, so handlers only see schema-shaped maps.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::errors::AppError;

/// The fixed set of parameter types. Validation is a static match over this
/// tag; no runtime type synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Validate-and-coerce one value. The policy is lenient and uniform:
    /// numeric strings coerce to integer/number targets, integral floats
    /// coerce to integer, "true"/"false" strings coerce to boolean. Anything
    /// lossy or ambiguous is rejected.
    pub fn coerce(self, value: &Value) -> Result<Value, String> {
        match self {
            Self::String => value
                .as_str()
                .map(|text| json!(text))
                .ok_or_else(|| "expected a string".to_string()),
            Self::Integer => {
                if let Some(number) = value.as_i64() {
                    return Ok(json!(number));
                }
                if let Some(float) = value.as_f64() {
                    if float.fract() == 0.0
                        && float >= i64::MIN as f64
                        && float <= i64::MAX as f64
                    {
                        return Ok(json!(float as i64));
                    }
                    return Err("expected an integer".to_string());
                }
                if let Some(text) = value.as_str() {
                    if let Ok(number) = text.trim().parse::<i64>() {
                        return Ok(json!(number));
                    }
                }
                Err("expected an integer".to_string())
            }
            Self::Number => {
                if value.is_number() {
                    return Ok(value.clone());
                }
                if let Some(text) = value.as_str() {
                    if let Ok(float) = text.trim().parse::<f64>() {
                        if float.is_finite() {
                            return Ok(json!(float));
                        }
                    }
                }
                Err("expected a number".to_string())
            }
            Self::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(json!(true)),
                    "false" => Ok(json!(false)),
                    _ => Err("expected a boolean".to_string()),
                },
                _ => Err("expected a boolean".to_string()),
            },
            Self::Array => {
                if value.is_array() {
                    Ok(value.clone())
                } else {
                    Err("expected an array".to_string())
                }
            }
            Self::Object => {
                if value.is_object() {
                    Ok(value.clone())
                } else {
                    Err("expected an object".to_string())
                }
            }
        }
    }
}

/// One declared parameter. Required parameters are constructed without a
/// default; a default set on a required parameter is never used.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub description: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Value>>,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
            default: None,
            choices: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
            default: None,
            choices: None,
        }
    }

    /// No effect on required parameters.
    pub fn with_default(mut self, value: Value) -> Self {
        if !self.required {
            self.default = Some(value);
        }
        self
    }

    pub fn with_choices(mut self, choices: Vec<Value>) -> Self {
        self.choices = Some(choices);
        self
    }
}

pub type ToolFuture = BoxFuture<'static, Result<Value, AppError>>;
pub type ToolHandler = Arc<dyn Fn(Map<String, Value>) -> ToolFuture + Send + Sync>;

/// Wrap a plain async function into a boxed tool handler.
pub fn tool_handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value, AppError>> + Send + 'static,
{
    Arc::new(move |params| Box::pin(f(params)))
}

pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    pub returns: Value,
    pub handler: ToolHandler,
}

/// What `list` exposes per tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    pub returns: Value,
    pub schema: Value,
}

#[derive(Debug, Serialize)]
struct FieldViolation {
    field: String,
    error: String,
}

struct RegisteredTool {
    definition: ToolDefinition,
    schema: Value,
}

/// The process-lifetime tool registry. Registration happens at startup;
/// should it ever happen at runtime, the write lock keeps it exclusive
/// against concurrent execution.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace under the definition's name; the last registration
    /// for a name wins. The object schema is derived here, not at call time.
    pub fn register(&self, definition: ToolDefinition) {
        let schema = derive_schema(&definition.parameters);
        let name = definition.name.clone();
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .insert(name.clone(), RegisteredTool { definition, schema });
        info!(tool = %name, "registered tool");
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All registered tools. Iteration order is not guaranteed.
    pub fn list(&self) -> Vec<ToolSummary> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .values()
            .map(|tool| ToolSummary {
                name: tool.definition.name.clone(),
                description: tool.definition.description.clone(),
                parameters: tool.definition.parameters.clone(),
                returns: tool.definition.returns.clone(),
                schema: tool.schema.clone(),
            })
            .collect()
    }

    /// Validate `raw` against the tool's parameter specs and invoke the
    /// handler with exactly the validated map. Unexpected keys are dropped;
    /// the validated map is schema-shaped, not a passthrough.
    pub async fn execute(&self, name: &str, raw: Option<&Value>) -> Result<Value, AppError> {
        let (specs, handler) = {
            let tools = self.tools.read().expect("tool registry lock poisoned");
            let Some(tool) = tools.get(name) else {
                return Err(AppError::method_not_found(format!("Tool not found: {name}")));
            };
            (
                tool.definition.parameters.clone(),
                Arc::clone(&tool.definition.handler),
            )
        };

        let raw_map = match raw {
            None => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(AppError::invalid_params("Tool parameters must be an object"))
            }
        };

        let mut validated = Map::new();
        let mut violations: Vec<FieldViolation> = Vec::new();

        for spec in &specs {
            match raw_map.get(&spec.name) {
                Some(value) => match spec.kind.coerce(value) {
                    Ok(coerced) => {
                        if let Some(choices) = &spec.choices {
                            if !choices.contains(&coerced) {
                                violations.push(FieldViolation {
                                    field: spec.name.clone(),
                                    error: format!(
                                        "must be one of: {}",
                                        choices
                                            .iter()
                                            .map(Value::to_string)
                                            .collect::<Vec<_>>()
                                            .join(", ")
                                    ),
                                });
                                continue;
                            }
                        }
                        validated.insert(spec.name.clone(), coerced);
                    }
                    Err(problem) => violations.push(FieldViolation {
                        field: spec.name.clone(),
                        error: problem,
                    }),
                },
                None if spec.required => violations.push(FieldViolation {
                    field: spec.name.clone(),
                    error: "required parameter is missing".to_string(),
                }),
                None => {
                    if let Some(default) = &spec.default {
                        validated.insert(spec.name.clone(), default.clone());
                    }
                }
            }
        }

        if !violations.is_empty() {
            return Err(
                AppError::invalid_params(format!("Invalid parameters for tool: {name}"))
                    .with_data(json!({ "violations": violations })),
            );
        }

        handler(validated).await
    }
}

fn derive_schema(parameters: &[ParameterSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for spec in parameters {
        let mut property = Map::new();
        property.insert("type".to_string(), json!(spec.kind.name()));
        property.insert("description".to_string(), json!(spec.description));
        if let Some(choices) = &spec.choices {
            property.insert("enum".to_string(), json!(choices));
        }
        if let Some(default) = &spec.default {
            property.insert("default".to_string(), default.clone());
        }
        if spec.required {
            required.push(spec.name.clone());
        }
        properties.insert(spec.name.clone(), Value::Object(property));
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), json!(required));
    }
    Value::Object(schema)
}
