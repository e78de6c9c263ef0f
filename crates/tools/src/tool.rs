//! Tool interface
//!
//! Tools describe their input with a small JSON Schema subset. Input is
//! validated against it before `execute` is called.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Tool errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Tool '{tool}' timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("Tool execution failed: {0}")]
    Execution(String),
}

impl ToolError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        ToolError::InvalidParams(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        ToolError::Execution(message.into())
    }
}

/// Tool output
///
/// `text` is what gets spoken back into the reply; `data` carries the
/// structured result for logging and clients that want it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Tool description handed to the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

/// Input schema (object with typed properties)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: HashMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl InputSchema {
    pub fn object() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: HashMap::new(),
            required: Vec::new(),
        }
    }

    pub fn property(mut self, name: &str, schema: PropertySchema, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.push(name.to_string());
        }
        self
    }
}

/// Property schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub prop_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// Upper bound on string length, in characters
    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

impl PropertySchema {
    fn typed(prop_type: &str, description: impl Into<String>) -> Self {
        Self {
            prop_type: prop_type.to_string(),
            description: Some(description.into()),
            minimum: None,
            maximum: None,
            max_length: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::typed("integer", description)
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.minimum = Some(min);
        self.maximum = Some(max);
        self
    }

    pub fn with_max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }
}

/// Tool trait
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> InputSchema;

    async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }

    /// Check `input` against the schema
    ///
    /// `null` counts as an empty object, since models often omit arguments
    /// for tools that take none.
    fn validate(&self, input: &Value) -> Result<(), ToolError> {
        let schema = self.input_schema();
        let empty = serde_json::Map::new();

        let obj = match input {
            Value::Object(obj) => obj,
            Value::Null => &empty,
            _ => return Err(ToolError::invalid_params("input must be an object")),
        };

        for required in &schema.required {
            if !obj.contains_key(required) {
                return Err(ToolError::invalid_params(format!(
                    "missing required field: {}",
                    required
                )));
            }
        }

        for (name, value) in obj {
            if let Some(prop) = schema.properties.get(name) {
                validate_property(name, value, prop)?;
            }
        }

        Ok(())
    }

    /// Per-tool timeout; the registry applies the smaller of this and its own
    fn timeout_secs(&self) -> u64 {
        10
    }
}

pub(crate) fn validate_property(
    name: &str,
    value: &Value,
    schema: &PropertySchema,
) -> Result<(), ToolError> {
    let type_valid = match schema.prop_type.as_str() {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        _ => true,
    };

    if !type_valid {
        return Err(ToolError::invalid_params(format!(
            "field '{}' must be of type '{}'",
            name, schema.prop_type
        )));
    }

    if let (Some(s), Some(max)) = (value.as_str(), schema.max_length) {
        if s.chars().count() > max {
            return Err(ToolError::invalid_params(format!(
                "field '{}' exceeds {} characters",
                name, max
            )));
        }
    }

    if let Some(num) = value.as_f64() {
        if schema.minimum.map_or(false, |min| num < min)
            || schema.maximum.map_or(false, |max| num > max)
        {
            return Err(ToolError::invalid_params(format!(
                "field '{}' is out of range: {}",
                name, num
            )));
        }
    }

    Ok(())
}
