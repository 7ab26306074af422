//! Tool registry for the queue tools.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{AddTaskTool, DeleteTaskTool, Tool, ToolDefinition, ToolOutput, ViewTaskTool};
use crate::error::ToolError;
use crate::queue::TaskQueue;

/// Registry of available tools.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with `add_task`, `view_task` and `delete_task` bound to `queue`.
    pub async fn with_queue_tools(queue: Arc<TaskQueue>) -> Self {
        let registry = Self::new();
        registry
            .register(Arc::new(AddTaskTool::new(Arc::clone(&queue))))
            .await;
        registry
            .register(Arc::new(ViewTaskTool::new(Arc::clone(&queue))))
            .await;
        registry.register(Arc::new(DeleteTaskTool::new(queue))).await;
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().await.insert(name.clone(), tool);
        tracing::debug!("Registered tool: {}", name);
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Tool definitions, sorted by name.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .await
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Look up and run a tool.
    pub async fn execute(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.get(name).await.ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;
        tool.execute(params).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
