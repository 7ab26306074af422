//! `add_task`, `view_task` and `delete_task` over the task queue.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::{Tool, ToolOutput, require_str};
use crate::error::{QueueError, ToolError};
use crate::queue::{FormField, TaskQueue};

fn parse_task_id(tool: &str, raw: &str) -> Result<Uuid, ToolError> {
    Uuid::parse_str(raw.trim()).map_err(|e| ToolError::InvalidParameters {
        name: tool.to_string(),
        reason: format!("taskId '{raw}' is not a valid id: {e}"),
    })
}

/// Enqueue a new form automation task.
pub struct AddTaskTool {
    queue: Arc<TaskQueue>,
}

impl AddTaskTool {
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Tool for AddTaskTool {
    fn name(&self) -> &str {
        "add_task"
    }

    fn description(&self) -> &str {
        "Enqueue a new form automation task"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL of the form to automate"
                },
                "formData": {
                    "type": "array",
                    "description": "List of form fields to fill",
                    "items": {
                        "type": "object",
                        "properties": {
                            "selector": { "type": "string", "description": "CSS selector of the field" },
                            "value": { "type": "string", "description": "Value to fill" }
                        },
                        "required": ["selector", "value"]
                    }
                }
            },
            "required": ["url", "formData"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let url = require_str(self.name(), &params, "url")?;
        let form_data: Vec<FormField> = params
            .get("formData")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ToolError::InvalidParameters {
                name: self.name().to_string(),
                reason: format!("formData: {e}"),
            })?
            .unwrap_or_default();

        match self.queue.enqueue(url, form_data).await {
            Ok(task) => Ok(ToolOutput::json(&serde_json::json!({
                "message": "Task added successfully",
                "taskId": task.id,
                "status": task.status,
            }))),
            Err(QueueError::Validation(reason)) => Err(ToolError::InvalidParameters {
                name: self.name().to_string(),
                reason,
            }),
        }
    }
}

/// Retrieve one task, or all tasks when `taskId` is omitted.
pub struct ViewTaskTool {
    queue: Arc<TaskQueue>,
}

impl ViewTaskTool {
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Tool for ViewTaskTool {
    fn name(&self) -> &str {
        "view_task"
    }

    fn description(&self) -> &str {
        "Retrieve the status of an existing task or all tasks"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "taskId": {
                    "type": "string",
                    "description": "The ID of the task to view. If omitted, lists all tasks."
                }
            }
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let Some(raw) = params.get("taskId").and_then(|v| v.as_str()) else {
            return Ok(ToolOutput::json(&self.queue.list_all().await));
        };

        let id = parse_task_id(self.name(), raw)?;
        match self.queue.get(id).await {
            Some(task) => Ok(ToolOutput::json(&task)),
            None => Ok(ToolOutput::error(format!("Task with ID {id} not found"))),
        }
    }
}

/// Cancel or remove a task.
pub struct DeleteTaskTool {
    queue: Arc<TaskQueue>,
}

impl DeleteTaskTool {
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Tool for DeleteTaskTool {
    fn name(&self) -> &str {
        "delete_task"
    }

    fn description(&self) -> &str {
        "Cancel or remove a task"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "taskId": {
                    "type": "string",
                    "description": "The ID of the task to delete"
                }
            },
            "required": ["taskId"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let id = parse_task_id(self.name(), require_str(self.name(), &params, "taskId")?)?;
        if self.queue.delete(id).await {
            Ok(ToolOutput::text(format!("Task {id} deleted successfully")))
        } else {
            Ok(ToolOutput::error(format!("Task with ID {id} not found")))
        }
    }
}
