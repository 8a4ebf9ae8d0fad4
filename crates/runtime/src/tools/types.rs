//! Tool-related types.

use super::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Tool arguments: parameter name to value.
pub type Arguments = Map<String, Value>;

/// A tool definition advertised to the model and to transport clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema object describing the parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// A definition that takes no parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        }
    }

    /// Declare one parameter.
    pub fn param(
        mut self,
        name: &str,
        kind: ParamType,
        description: &str,
        required: bool,
    ) -> Self {
        let schema = self.parameters.as_object_mut();
        if let Some(schema) = schema {
            let properties = schema
                .entry("properties")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(properties) = properties.as_object_mut() {
                properties.insert(
                    name.to_string(),
                    json!({"type": kind.as_str(), "description": description}),
                );
            }
            if required {
                let list = schema
                    .entry("required")
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Some(list) = list.as_array_mut() {
                    list.push(Value::String(name.to_string()));
                }
            }
        }
        self
    }

    /// Check arguments against the required names and declared types.
    ///
    /// Only the top level of the schema is checked.
    pub fn check_arguments(&self, arguments: &Arguments) -> Result<(), ToolError> {
        let name = &self.name;

        if let Some(required) = self.parameters.get("required").and_then(Value::as_array) {
            for param in required.iter().filter_map(Value::as_str) {
                if !arguments.contains_key(param) {
                    return Err(ToolError::InvalidInput(format!(
                        "{name}: missing required parameter '{param}'"
                    )));
                }
            }
        }

        let Some(properties) = self.parameters.get("properties").and_then(Value::as_object)
        else {
            return Ok(());
        };

        for (param, value) in arguments {
            let declared = properties
                .get(param)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
                .and_then(ParamType::parse);
            if let Some(kind) = declared {
                if !kind.accepts(value) {
                    return Err(ToolError::InvalidInput(format!(
                        "{name}: parameter '{param}' must be {}",
                        kind.as_str()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// JSON Schema primitive types usable for parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "string" => Self::String,
            "number" => Self::Number,
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            "object" => Self::Object,
            "array" => Self::Array,
            _ => return None,
        })
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// What a tool invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    /// The tool's output, or a description of what went wrong.
    pub output: Value,
    pub is_error: bool,
}

impl ToolExecutionResult {
    pub fn success(output: Value) -> Self {
        Self {
            output,
            is_error: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            output: Value::String(message.into()),
            is_error: true,
        }
    }

    /// Output rendered as text: strings verbatim, everything else as JSON.
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl From<ToolError> for ToolExecutionResult {
    fn from(error: ToolError) -> Self {
        Self::failure(error.to_string())
    }
}
