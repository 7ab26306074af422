//! Queue tool-calling front end for external agents.
//!
//! Transport-free: the API exposes the registry over HTTP, but tools only
//! see JSON parameters and return JSON-serializable output.

pub mod queue;
pub mod registry;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ToolError;

pub use queue::{AddTaskTool, DeleteTaskTool, ViewTaskTool};
pub use registry::ToolRegistry;

/// A callable operation with a JSON-schema parameter contract.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Advertised shape of a tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

/// Tool result. Domain failures (e.g. unknown task) are reported in-band
/// with `is_error` rather than as a [`ToolError`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Pretty-printed JSON as a text block.
    pub fn json(value: &impl Serialize) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|e| e.to_string());
        Self::text(text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(text)
        }
    }

    /// Concatenated text of all blocks.
    pub fn as_text(&self) -> String {
        self.content
            .iter()
            .map(|ToolContent::Text { text }| text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Extract a required string parameter.
pub fn require_str<'a>(
    tool: &str,
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("missing '{key}' parameter"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_serializes_like_mcp_result() {
        let ok = serde_json::to_value(ToolOutput::text("done")).unwrap();
        assert_eq!(ok, serde_json::json!({ "content": [{ "type": "text", "text": "done" }] }));

        let err = serde_json::to_value(ToolOutput::error("nope")).unwrap();
        assert_eq!(err["isError"], true);
    }

    #[test]
    fn require_str_reports_missing_key() {
        let params = serde_json::json!({ "taskId": 7 });
        assert!(matches!(
            require_str("view_task", &params, "taskId"),
            Err(ToolError::InvalidParameters { .. })
        ));
        let params = serde_json::json!({ "taskId": "abc" });
        assert_eq!(require_str("view_task", &params, "taskId").unwrap(), "abc");
    }
}
