//! Task data model: records, statuses, fill reports, and live-update events.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting in the pending queue.
    Queued,
    /// Held by the worker.
    Processing,
    /// Paused until a file is uploaded for a field.
    WaitingForFile,
    /// Every attempted field was filled.
    Completed,
    /// Some, but not all, attempted fields failed.
    PartialSuccess,
    /// Fatal pipeline error or every attempted field failed.
    Failed,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    ///
    /// Monotonic except for the `Processing ⇄ WaitingForFile` cycle.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Queued, Processing) | (Queued, Failed) |
            (Processing, WaitingForFile) |
            (Processing, Completed) | (Processing, PartialSuccess) | (Processing, Failed) |
            (WaitingForFile, Processing) | (WaitingForFile, Failed)
        )
    }

    /// Terminal statuses: no further automatic transition follows.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::PartialSuccess | Self::Failed)
    }

    /// Held by the worker (the single-flight slot).
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Processing | Self::WaitingForFile)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::WaitingForFile => "WAITING_FOR_FILE",
            Self::Completed => "COMPLETED",
            Self::PartialSuccess => "PARTIAL_SUCCESS",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// A declared `{selector, value}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub selector: String,
    pub value: String,
}

impl FormField {
    pub fn new(selector: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            value: value.into(),
        }
    }
}

/// One audit-trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Outcome of a single working-set field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    Filled,
    Failed,
}

/// Per-field entry of the final fill report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldReport {
    pub selector: String,
    pub status: FieldStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FieldReport {
    pub fn filled(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            status: FieldStatus::Filled,
            error: None,
        }
    }

    pub fn failed(selector: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            status: FieldStatus::Failed,
            error: Some(error.into()),
        }
    }
}

/// Structured task outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskResult {
    /// The field the paused task is waiting on (while `WaitingForFile`).
    AwaitingFile { selector: String },
    /// Final per-field fill report (any terminal status).
    Fields { fields: Vec<FieldReport> },
}

impl TaskResult {
    /// Number of failed entries in a fill report.
    pub fn failure_count(&self) -> usize {
        match self {
            Self::Fields { fields } => fields
                .iter()
                .filter(|f| f.status == FieldStatus::Failed)
                .count(),
            Self::AwaitingFile { .. } => 0,
        }
    }
}

/// A single form-automation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub url: String,
    /// Declared intent; never rewritten by the worker.
    pub form_data: Vec<FormField>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Append-only audit trail.
    pub logs: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Enqueue order, breaks `created_at` ties.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Task {
    pub(crate) fn new(url: String, form_data: Vec<FormField>, seq: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url,
            form_data,
            status: TaskStatus::Queued,
            result: None,
            error: None,
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
            seq,
        }
    }

    /// Messages of the audit trail, in order.
    pub fn log_messages(&self) -> Vec<&str> {
        self.logs.iter().map(|l| l.message.as_str()).collect()
    }
}

/// Live-update events fanned out to dashboard observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// Full current task list, sent to newly attached observers.
    TasksSync { tasks: Vec<Task> },
    TaskAdded { task: Task },
    /// Status, result or log change.
    TaskUpdated { task: Task },
    TaskDeleted { id: Uuid },
    TaskProcessing { task: Task },
}

/// Signals consumed by the worker's scoped listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerSignal {
    /// A task was deleted; cancels it if in flight.
    TaskDeleted { id: Uuid },
    /// A file was persisted for a paused field.
    FileUploaded {
        id: Uuid,
        selector: String,
        path: PathBuf,
    },
}
