use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

/// Arguments attached to a model-requested tool call.
///
/// Providers deliver either already-structured JSON or a raw text payload
/// that still needs parsing. Parsing is deferred to the invocation loop so a
/// malformed payload becomes a `ToolResult` failure instead of a wire error.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArguments {
    Text(String),
    Structured(serde_json::Value),
}

impl ToolArguments {
    pub fn structured(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }

    pub fn text(raw: impl Into<String>) -> Self {
        Self::Text(raw.into())
    }

    /// Resolve to a JSON value. An empty text payload counts as `{}`.
    pub fn parse(&self) -> Result<serde_json::Value, ToolError> {
        match self {
            Self::Structured(value) => Ok(value.clone()),
            Self::Text(raw) => {
                if raw.trim().is_empty() {
                    return Ok(serde_json::json!({}));
                }
                serde_json::from_str(raw).map_err(|e| {
                    ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}"))
                })
            }
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: ToolArguments,
}

/// Outcome of one tool invocation.
///
/// Always constructed, never thrown. Failures are values fed back to the
/// model so the conversation can continue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(tool_name: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// The serialized form recorded as a `tool` message's content.
    pub fn message_content(&self) -> String {
        if self.success {
            serde_json::json!({ "result": self.output }).to_string()
        } else {
            serde_json::json!({ "error": self.error }).to_string()
        }
    }
}

/// Tool definition advertised to the model as part of the request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}
