//! Pipeline stage machine for the task currently held by the worker.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

/// Stage of a single task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    /// Acquiring the browser session.
    Init,
    Navigating,
    /// Classifying and filling the working set.
    Filling,
    /// Paused on a file field.
    AwaitingFile { selector: String },
    Submitting,
    /// Classifying the outcome and reporting it.
    Finalizing,
    Completed,
    PartialSuccess,
    Failed,
    /// The task was deleted mid-run.
    Cancelled,
}

impl Stage {
    /// Check if this stage allows transitioning to another stage.
    pub fn can_transition_to(&self, target: &Stage) -> bool {
        use Stage::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(target, Failed | Cancelled) {
            return true;
        }
        matches!(
            (self, target),
            (Init, Navigating) |
            (Navigating, Filling) |
            (Filling, AwaitingFile { .. }) | (Filling, Submitting) |
            (AwaitingFile { .. }, Filling) |
            (Submitting, Finalizing) |
            (Finalizing, Completed) | (Finalizing, PartialSuccess)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartialSuccess | Self::Failed | Self::Cancelled
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Navigating => write!(f, "navigating"),
            Self::Filling => write!(f, "filling"),
            Self::AwaitingFile { selector } => write!(f, "awaiting_file({selector})"),
            Self::Submitting => write!(f, "submitting"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Completed => write!(f, "completed"),
            Self::PartialSuccess => write!(f, "partial_success"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A stage transition event.
#[derive(Debug, Clone, Serialize)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub timestamp: DateTime<Utc>,
}

/// Stage history of one task run.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub task_id: Uuid,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub transitions: Vec<StageTransition>,
}

impl RunState {
    pub fn new(task_id: Uuid) -> Self {
        Self {
            task_id,
            stage: Stage::Init,
            started_at: Utc::now(),
            transitions: Vec::new(),
        }
    }

    /// Transition to a new stage.
    pub fn transition_to(&mut self, stage: Stage) -> Result<(), String> {
        if !self.stage.can_transition_to(&stage) {
            return Err(format!("Cannot transition from {} to {}", self.stage, stage));
        }
        self.transitions.push(StageTransition {
            from: self.stage.clone(),
            to: stage.clone(),
            timestamp: Utc::now(),
        });
        self.stage = stage;
        Ok(())
    }
}

/// Publishes the current run's stage on a watch channel.
pub struct StageTracker {
    tx: watch::Sender<Option<RunState>>,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RunState>> {
        self.tx.subscribe()
    }

    /// Start tracking a new run at [`Stage::Init`].
    pub fn begin(&self, task_id: Uuid) {
        self.tx.send_replace(Some(RunState::new(task_id)));
    }

    /// Advance the current run. Invalid transitions are logged and ignored.
    pub fn advance(&self, stage: Stage) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|state| {
            let Some(run) = state.as_mut() else {
                return false;
            };
            match run.transition_to(stage.clone()) {
                Ok(()) => {
                    applied = true;
                    true
                }
                Err(e) => {
                    warn!(task_id = %run.task_id, error = %e, "Ignoring stage transition");
                    false
                }
            }
        });
        applied
    }
}
