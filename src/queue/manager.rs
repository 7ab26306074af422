//! Task queue. Owns task records and the pending FIFO, enforces single-flight
//! processing, and fans lifecycle events out to observers.
//!
//! The worker never touches task records directly: it receives dispatched
//! tasks over an mpsc channel and reports back through the mutation methods
//! here. Deletion and file-upload completion reach the worker as
//! [`WorkerSignal`]s on a separate broadcast channel.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::model::{FormField, LogEntry, QueueEvent, Task, TaskResult, TaskStatus, WorkerSignal};
use crate::error::QueueError;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Worker signal capacity. Signals are rare (deletes and uploads).
const SIGNAL_CAPACITY: usize = 64;

/// Receiving end of the dispatch channel; the worker consumes it.
pub type TaskReceiver = mpsc::UnboundedReceiver<Task>;

#[derive(Default)]
struct QueueState {
    tasks: HashMap<Uuid, Task>,
    pending: VecDeque<Uuid>,
    /// The single task currently held by the worker.
    in_flight: Option<Uuid>,
    next_seq: u64,
}

/// In-memory task store and single-concurrency scheduler.
pub struct TaskQueue {
    state: RwLock<QueueState>,
    events: broadcast::Sender<QueueEvent>,
    signals: broadcast::Sender<WorkerSignal>,
    dispatch: mpsc::UnboundedSender<Task>,
}

impl TaskQueue {
    /// Create a new queue and the receiver the worker listens on.
    pub fn new() -> (Arc<Self>, TaskReceiver) {
        let (events, _) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        let (dispatch, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            state: RwLock::new(QueueState::default()),
            events,
            signals,
            dispatch,
        });
        (queue, rx)
    }

    /// Subscribe to live-update events. Each dashboard observer calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Subscribe to worker signals. Dropping the receiver retires the listener.
    pub fn subscribe_signals(&self) -> broadcast::Receiver<WorkerSignal> {
        self.signals.subscribe()
    }

    /// Validate and store a new task, then try to start processing.
    pub async fn enqueue(
        &self,
        url: impl Into<String>,
        form_data: Vec<FormField>,
    ) -> Result<Task, QueueError> {
        let url = url.into().trim().to_string();
        if url.is_empty() {
            return Err(QueueError::Validation("URL and formData are required".into()));
        }
        if form_data.is_empty() {
            return Err(QueueError::Validation("URL and formData are required".into()));
        }
        if let Some(pos) = form_data.iter().position(|f| f.selector.trim().is_empty()) {
            return Err(QueueError::Validation(format!(
                "formData[{pos}] has an empty selector"
            )));
        }

        let mut state = self.state.write().await;
        let seq = state.next_seq;
        state.next_seq += 1;

        let task = Task::new(url, form_data, seq);
        info!(
            task_id = %task.id,
            url = %task.url,
            fields = task.form_data.len(),
            "Task enqueued"
        );

        state.tasks.insert(task.id, task.clone());
        state.pending.push_back(task.id);

        // Broadcast, ok if no receivers are listening yet
        let _ = self.events.send(QueueEvent::TaskAdded { task: task.clone() });

        self.start_next(&mut state);
        Ok(state.tasks.get(&task.id).cloned().unwrap_or(task))
    }

    /// Get a snapshot of one task.
    pub async fn get(&self, id: Uuid) -> Option<Task> {
        self.state.read().await.tasks.get(&id).cloned()
    }

    /// All tasks, newest first.
    pub async fn list_all(&self) -> Vec<Task> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        tasks
    }

    /// Remove a task at any status. Returns whether it existed.
    ///
    /// If the task is in flight the worker observes the deletion signal,
    /// tears down its session and releases the slot itself.
    pub async fn delete(&self, id: Uuid) -> bool {
        let mut state = self.state.write().await;

        let Some(task) = state.tasks.remove(&id) else {
            return false;
        };
        state.pending.retain(|pending| *pending != id);

        info!(task_id = %id, status = %task.status, "Task deleted");

        let _ = self.events.send(QueueEvent::TaskDeleted { id });
        let _ = self.signals.send(WorkerSignal::TaskDeleted { id });
        true
    }

    /// Update status (and optionally result / error). No-op on absent tasks.
    pub async fn set_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: Option<TaskResult>,
        error: Option<String>,
    ) -> bool {
        let mut state = self.state.write().await;
        self.apply_status(&mut state, id, status, result, error)
    }

    /// Return a paused task to `Processing`, dropping its `AwaitingFile` context.
    pub async fn resume(&self, id: Uuid) -> bool {
        let mut state = self.state.write().await;
        if let Some(task) = state.tasks.get_mut(&id) {
            if task.status == TaskStatus::WaitingForFile {
                task.result = None;
            }
        }
        self.apply_status(&mut state, id, TaskStatus::Processing, None, None)
    }

    /// Append a timestamped audit-trail entry. No-op on absent tasks.
    pub async fn append_log(&self, id: Uuid, message: impl Into<String>) -> bool {
        let mut state = self.state.write().await;
        self.push_log(&mut state, id, message.into())
    }

    /// Mark completed, free the slot, start the next task.
    pub async fn complete(&self, id: Uuid, result: TaskResult) {
        self.finish(id, TaskStatus::Completed, Some(result), None)
            .await;
    }

    /// Mark partially successful, free the slot, start the next task.
    pub async fn partial(&self, id: Uuid, result: TaskResult) {
        self.finish(id, TaskStatus::PartialSuccess, Some(result), None)
            .await;
    }

    /// Mark failed, free the slot, start the next task.
    pub async fn fail(&self, id: Uuid, error: impl Into<String>, result: Option<TaskResult>) {
        self.finish(id, TaskStatus::Failed, result, Some(error.into()))
            .await;
    }

    /// Free the slot without touching the (already deleted) record.
    pub async fn release(&self, id: Uuid) {
        let mut state = self.state.write().await;
        if state.in_flight == Some(id) {
            state.in_flight = None;
            debug!(task_id = %id, "Released in-flight slot");
        }
        self.start_next(&mut state);
    }

    /// Record an uploaded file and signal the paused worker.
    ///
    /// Returns `false` (and signals nothing) if the task no longer exists.
    pub async fn file_uploaded(
        &self,
        id: Uuid,
        selector: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> bool {
        let selector = selector.into();
        let path = path.into();
        let mut state = self.state.write().await;

        if !state.tasks.contains_key(&id) {
            error!(task_id = %id, selector = %selector, "File uploaded for unknown task");
            return false;
        }

        info!(task_id = %id, selector = %selector, path = %path.display(), "File uploaded");
        self.push_log(&mut state, id, format!("File uploaded for {selector}"));
        let _ = self
            .signals
            .send(WorkerSignal::FileUploaded { id, selector, path });
        true
    }

    /// The task currently held by the worker, if any.
    pub async fn in_flight(&self) -> Option<Uuid> {
        self.state.read().await.in_flight
    }

    /// Number of tasks waiting in the pending queue.
    pub async fn pending_len(&self) -> usize {
        self.state.read().await.pending.len()
    }

    async fn finish(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: Option<TaskResult>,
        error: Option<String>,
    ) {
        let mut state = self.state.write().await;
        self.apply_status(&mut state, id, status, result, error);
        if state.in_flight == Some(id) {
            state.in_flight = None;
        }
        self.start_next(&mut state);
    }

    fn apply_status(
        &self,
        state: &mut QueueState,
        id: Uuid,
        status: TaskStatus,
        result: Option<TaskResult>,
        error: Option<String>,
    ) -> bool {
        let Some(task) = state.tasks.get_mut(&id) else {
            debug!(task_id = %id, status = %status, "Status update for absent task ignored");
            return false;
        };

        if task.status != status && !task.status.can_transition_to(status) {
            warn!(
                task_id = %id,
                from = %task.status,
                to = %status,
                "Rejected invalid status transition"
            );
            return false;
        }

        task.status = status;
        if let Some(result) = result {
            task.result = Some(result);
        }
        if let Some(error) = error {
            task.error = Some(error);
        }
        task.updated_at = Utc::now();

        let _ = self.events.send(QueueEvent::TaskUpdated { task: task.clone() });
        true
    }

    fn push_log(&self, state: &mut QueueState, id: Uuid, message: String) -> bool {
        let Some(task) = state.tasks.get_mut(&id) else {
            return false;
        };

        let now = Utc::now();
        task.logs.push(LogEntry {
            timestamp: now,
            message,
        });
        task.updated_at = now;

        let _ = self.events.send(QueueEvent::TaskUpdated { task: task.clone() });
        true
    }

    /// Strict FIFO; no-op while a task is in flight or the queue is empty.
    fn start_next(&self, state: &mut QueueState) {
        while state.in_flight.is_none() {
            let Some(id) = state.pending.pop_front() else {
                return;
            };
            let Some(task) = state.tasks.get_mut(&id) else {
                debug!(task_id = %id, "Skipping task deleted while queued");
                continue;
            };

            task.status = TaskStatus::Processing;
            task.updated_at = Utc::now();
            let snapshot = task.clone();
            state.in_flight = Some(id);

            let _ = self.events.send(QueueEvent::TaskUpdated {
                task: snapshot.clone(),
            });
            let _ = self.events.send(QueueEvent::TaskProcessing {
                task: snapshot.clone(),
            });

            info!(task_id = %id, url = %snapshot.url, "Task dispatched to worker");

            if self.dispatch.send(snapshot).is_err() {
                error!(task_id = %id, "Automation worker is not running");
                state.in_flight = None;
                self.apply_status(
                    state,
                    id,
                    TaskStatus::Failed,
                    None,
                    Some("Automation worker is not running".into()),
                );
            }
        }
    }
}
