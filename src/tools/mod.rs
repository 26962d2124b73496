pub mod builtin;
pub mod registry;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{ToolError, ToolResult};
use crate::policy::ResourceAccess;

pub use registry::{RegistryError, ToolRegistry};

/// Per-invocation context handed to a tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Correlates the invocation with its run (and its audit entries).
    pub task_id: String,
    pub step: u32,
    /// Per-tool deadline of the run.
    pub timeout: Duration,
}

impl ToolContext {
    pub fn new(task_id: impl Into<String>, step: u32, timeout: Duration) -> Self {
        Self {
            task_id: task_id.into(),
            step,
            timeout,
        }
    }
}

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    pub allowed_values: Option<Vec<Value>>,
    pub default: Option<Value>,
}

impl ToolParameter {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: true,
            allowed_values: None,
            default: None,
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_allowed(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = Some(values);
        self
    }

    /// JSON-schema property for this parameter.
    fn schema(&self) -> Value {
        let mut prop = json!({
            "type": self.param_type.as_str(),
            "description": self.description,
        });
        if let Some(values) = &self.allowed_values {
            prop["enum"] = Value::Array(values.clone());
        }
        if let Some(default) = &self.default {
            prop["default"] = default.clone();
        }
        prop
    }
}

/// A named capability a plan step can invoke.
///
/// The executor validates arguments against [`parameters`](Tool::parameters),
/// asks the policy engine about every resource from
/// [`accesses`](Tool::accesses), and only then calls
/// [`invoke`](Tool::invoke). A tool never sees arguments that failed
/// validation or touches a resource it did not declare.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Action name used in plan steps (lowercase, underscores).
    fn name(&self) -> &str;

    /// Shown to the planner so it knows when to use the tool.
    fn description(&self) -> &str;

    fn parameters(&self) -> Vec<ToolParameter>;

    /// Filesystem resources this call would touch, given validated arguments.
    fn accesses(&self, _args: &Map<String, Value>) -> Vec<ResourceAccess> {
        Vec::new()
    }

    async fn invoke(&self, args: &Map<String, Value>, ctx: &ToolContext) -> ToolResult<Value>;

    /// True when `invoke` enforces `ctx.timeout` itself and cleans up before
    /// returning `timeout`. The executor then does not cut the call short.
    fn enforces_timeout(&self) -> bool {
        false
    }

    /// `{type: "object", properties, required}` built from the parameters.
    fn input_schema(&self) -> Value {
        input_schema(&self.parameters())
    }
}

pub fn input_schema(params: &[ToolParameter]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in params {
        properties.insert(param.name.clone(), param.schema());
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Checks `args` against `params` and fills in defaults.
///
/// A `null` value counts as absent. Arguments the tool does not declare
/// are passed through untouched.
pub fn validate_arguments(
    params: &[ToolParameter],
    args: &Map<String, Value>,
) -> ToolResult<Map<String, Value>> {
    let mut validated = args.clone();
    for param in params {
        match validated.get(&param.name).filter(|v| !v.is_null()) {
            None => {
                validated.remove(&param.name);
                if let Some(default) = &param.default {
                    validated.insert(param.name.clone(), default.clone());
                } else if param.required {
                    return Err(ToolError::MissingArgument(param.name.clone()));
                }
            }
            Some(value) => {
                if !param.param_type.matches(value) {
                    return Err(ToolError::invalid(
                        &param.name,
                        format!("expected {}, got {value}", param.param_type.as_str()),
                    ));
                }
                if let Some(allowed) = &param.allowed_values {
                    if !allowed.contains(value) {
                        return Err(ToolError::invalid(
                            &param.name,
                            format!("{value} is not one of {}", Value::Array(allowed.clone())),
                        ));
                    }
                }
            }
        }
    }
    Ok(validated)
}

// ── Argument accessors (for validated maps) ──────────────

pub fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> ToolResult<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::MissingArgument(name.to_string()))
}

pub fn opt_str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

pub fn opt_u64_arg(args: &Map<String, Value>, name: &str) -> Option<u64> {
    args.get(name).and_then(Value::as_u64)
}

pub fn bool_arg(args: &Map<String, Value>, name: &str, default: bool) -> bool {
    args.get(name).and_then(Value::as_bool).unwrap_or(default)
}
