//! The automation worker: drives one dispatched task at a time through
//! session acquisition, navigation, classification, filling, submission and
//! finalization.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::cancel::{CancelToken, DeletionListener, SessionSlot};
use super::fields::classify;
use super::fill::FieldFiller;
use super::stage::{RunState, Stage, StageTracker};
use crate::browser::{BrowserLauncher, BrowserSession};
use crate::config::AutomationConfig;
use crate::error::AutomationError;
use crate::queue::{FieldReport, Task, TaskQueue, TaskReceiver, TaskResult, TaskStatus};

/// Hidden before filling: overlays that intercept clicks.
pub const AD_BLOCK_CSS: &str =
    "#fixedban, footer, #adplus-anchor, .ad-plus-container, #google_esf { display: none !important; }";

/// Probed in order; the first present one is clicked.
pub const SUBMIT_SELECTORS: &[&str] = &[
    "#submit",
    r#"button[type="submit"]"#,
    r#"input[type="submit"]"#,
    ".submit-button",
    "#FSsubmit",
    r#"input[name="Submit"]"#,
];

/// Page text that signals a successful submission (case-insensitive).
pub const SUCCESS_INDICATORS: &[&str] = &["thank", "success", "received", "submitted", "completed"];

/// Whether `text` contains a success indicator.
pub fn contains_success_indicator(text: &str) -> bool {
    let lower = text.to_lowercase();
    SUCCESS_INDICATORS.iter().any(|word| lower.contains(word))
}

/// Terminal status for a fill report. `attempted` is the working-set size.
pub fn outcome_status(failures: usize, attempted: usize) -> TaskStatus {
    if failures == 0 {
        TaskStatus::Completed
    } else if failures < attempted {
        TaskStatus::PartialSuccess
    } else {
        TaskStatus::Failed
    }
}

/// Per-field results of a run that reached finalization.
#[derive(Debug, Default)]
struct FillReport {
    fields: Vec<FieldReport>,
    failures: usize,
}

/// Sequential automation worker.
pub struct Worker {
    queue: Arc<TaskQueue>,
    launcher: Arc<dyn BrowserLauncher>,
    config: AutomationConfig,
    stages: StageTracker,
}

impl Worker {
    pub fn new(
        queue: Arc<TaskQueue>,
        launcher: Arc<dyn BrowserLauncher>,
        config: AutomationConfig,
    ) -> Self {
        Self {
            queue,
            launcher,
            config,
            stages: StageTracker::new(),
        }
    }

    /// Observe the stage of the run in progress.
    pub fn stages(&self) -> watch::Receiver<Option<RunState>> {
        self.stages.subscribe()
    }

    /// Spawn the worker loop on the runtime.
    pub fn spawn(self, rx: TaskReceiver) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    /// Process dispatched tasks until the queue is dropped.
    pub async fn run(self, mut rx: TaskReceiver) {
        info!("Worker started and listening for tasks");
        while let Some(task) = rx.recv().await {
            self.run_task(task).await;
        }
        info!("Worker stopped: dispatch channel closed");
    }

    /// Drive one task to a terminal status, or release it if deleted.
    pub async fn run_task(&self, task: Task) {
        let task_id = task.id;
        let cancel = CancelToken::new();
        let slot = SessionSlot::default();
        let _listener = DeletionListener::spawn(
            self.queue.subscribe_signals(),
            task_id,
            cancel.clone(),
            slot.clone(),
        );

        if self.queue.get(task_id).await.is_none() {
            info!(task_id = %task_id, "Task deleted before processing started");
            self.queue.release(task_id).await;
            return;
        }

        info!(task_id = %task_id, url = %task.url, "Processing task");
        self.stages.begin(task_id);

        let outcome = self.execute(&task, &cancel, &slot).await;
        let cancelled = cancel.is_cancelled() || matches!(&outcome, Err(e) if e.is_cancelled());

        if cancelled {
            info!(task_id = %task_id, "Task cancelled, releasing slot");
            self.stages.advance(Stage::Cancelled);
            self.queue.release(task_id).await;
        } else {
            match outcome {
                Ok(report) => self.finalize(task_id, report, &cancel).await,
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "Task failed");
                    self.stages.advance(Stage::Failed);
                    self.queue
                        .append_log(task_id, format!("Task failed: {e}"))
                        .await;
                    self.queue.fail(task_id, e.to_string(), None).await;
                }
            }
        }

        let held = slot.lock().await.take();
        if let Some(session) = held {
            if let Err(e) = session.close().await {
                debug!(task_id = %task_id, error = %e, "Session close failed");
            }
        }
    }

    async fn log(&self, task: &Task, message: impl Into<String>) {
        self.queue.append_log(task.id, message).await;
    }

    async fn execute(
        &self,
        task: &Task,
        cancel: &CancelToken,
        slot: &SessionSlot,
    ) -> Result<FillReport, AutomationError> {
        let session = cancel
            .guard(self.launcher.launch())
            .await
            .map_err(|e| match e {
                AutomationError::Browser(b) => AutomationError::SessionAcquisition(b.to_string()),
                other => other,
            })?;
        *slot.lock().await = Some(session.clone());
        // A deletion that raced the launch found an empty slot.
        cancel.checkpoint()?;

        self.stages.advance(Stage::Navigating);
        self.navigate(task, session.as_ref(), cancel).await?;

        match cancel.guard(session.add_style(AD_BLOCK_CSS)).await {
            Ok(()) => self.log(task, "Page loaded & Cleaned").await,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Style injection failed");
                self.log(task, "Warning: Could not hide ads, proceeding anyway.")
                    .await;
            }
        }

        self.stages.advance(Stage::Filling);
        let working_set = classify(session.as_ref(), &task.form_data, cancel).await?;
        if working_set.name_fallback_needed {
            self.log(
                task,
                "Specific name fields missing, looking for Full Name field...",
            )
            .await;
            if let Some(selector) = &working_set.name_fallback {
                self.log(
                    task,
                    format!("Found generic name field {selector}, combining First and Last name."),
                )
                .await;
            }
        }
        if working_set.is_empty() {
            return Err(AutomationError::NoMatchingFields);
        }
        self.log(
            task,
            format!("Identified {} fields to fill.", working_set.len()),
        )
        .await;

        let filler = FieldFiller {
            session: session.as_ref(),
            queue: &self.queue,
            task_id: task.id,
            cancel,
            config: &self.config,
            stages: &self.stages,
        };

        let mut report = FillReport::default();
        for field in &working_set.fields {
            match filler.fill(field).await {
                Ok(()) => report.fields.push(FieldReport::filled(&field.selector)),
                Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                    return Err(AutomationError::Cancelled);
                }
                Err(AutomationError::PageClosed) => return Err(AutomationError::PageClosed),
                Err(e) => {
                    warn!(task_id = %task.id, selector = %field.selector, error = %e, "Field failed");
                    self.log(task, format!("Error filling {}: {e}", field.selector))
                        .await;
                    report.failures += 1;
                    report
                        .fields
                        .push(FieldReport::failed(&field.selector, e.to_string()));
                }
            }
        }

        self.stages.advance(Stage::Submitting);
        match self.submit(task, session.as_ref(), cancel).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Submission failed");
                self.log(task, format!("Error submitting form: {e}")).await;
            }
        }

        self.stages.advance(Stage::Finalizing);
        Ok(report)
    }

    /// Bounded navigation retries with a fixed delay between attempts.
    async fn navigate(
        &self,
        task: &Task,
        session: &dyn BrowserSession,
        cancel: &CancelToken,
    ) -> Result<(), AutomationError> {
        self.log(task, format!("Navigating to {}", task.url)).await;
        let attempts = self.config.nav_attempts.max(1);

        let mut attempt = 1;
        loop {
            match cancel
                .guard(session.goto(&task.url, self.config.nav_timeout))
                .await
            {
                Ok(()) => {
                    debug!(task_id = %task.id, attempt, "Navigation succeeded");
                    return Ok(());
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(task_id = %task.id, attempt, error = %e, "Navigation attempt failed");
                    self.log(task, format!("Navigation attempt {attempt} failed: {e}"))
                        .await;
                    if attempt >= attempts {
                        return Err(AutomationError::Navigation {
                            attempts,
                            reason: e.to_string(),
                        });
                    }
                    cancel.sleep(self.config.nav_retry_delay).await?;
                    attempt += 1;
                }
            }
        }
    }

    /// Click the first submit control found and wait for a success indicator.
    async fn submit(
        &self,
        task: &Task,
        session: &dyn BrowserSession,
        cancel: &CancelToken,
    ) -> Result<(), AutomationError> {
        cancel.checkpoint()?;
        self.log(task, "Attempting to submit form...").await;

        let mut clicked = None;
        for selector in SUBMIT_SELECTORS {
            if let Ok(true) = cancel.atomic(session.exists(selector)).await {
                cancel.atomic(session.dom_click(selector)).await?;
                clicked = Some(*selector);
                break;
            }
            cancel.checkpoint()?;
        }

        let Some(selector) = clicked else {
            warn!(task_id = %task.id, "No submit control found");
            self.log(task, "No submit button found, skipping submission.")
                .await;
            return Ok(());
        };

        self.log(task, format!("Clicked submit button: {selector}"))
            .await;
        self.log(task, "Waiting for submission to complete...").await;

        if self.wait_for_success(session, cancel).await? {
            self.log(task, "Success message detected.").await;
        } else {
            self.log(
                task,
                "Warning: Success message not detected (timeout), but proceeding.",
            )
            .await;
        }
        Ok(())
    }

    async fn wait_for_success(
        &self,
        session: &dyn BrowserSession,
        cancel: &CancelToken,
    ) -> Result<bool, AutomationError> {
        let deadline = Instant::now() + self.config.success_timeout;
        loop {
            let polled = tokio::time::timeout_at(deadline, cancel.guard(session.body_text())).await;
            match polled {
                Err(_) => return Ok(false),
                Ok(Ok(text)) if contains_success_indicator(&text) => return Ok(true),
                Ok(Ok(_)) => {}
                Ok(Err(e)) if e.is_cancelled() => return Err(e),
                // The page may be mid-navigation after submit.
                Ok(Err(e)) => debug!(error = %e, "Body text unavailable"),
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            cancel.sleep(self.config.success_poll).await?;
        }
    }

    async fn finalize(&self, task_id: uuid::Uuid, report: FillReport, cancel: &CancelToken) {
        let status = outcome_status(report.failures, report.fields.len());
        let result = TaskResult::Fields {
            fields: report.fields,
        };

        match status {
            TaskStatus::Completed => {
                info!(task_id = %task_id, "Task completed");
                self.stages.advance(Stage::Completed);
                self.queue
                    .append_log(task_id, "Task completed successfully")
                    .await;
                self.queue.complete(task_id, result).await;
            }
            TaskStatus::PartialSuccess => {
                info!(task_id = %task_id, failures = report.failures, "Task partially completed");
                self.stages.advance(Stage::PartialSuccess);
                self.queue
                    .append_log(
                        task_id,
                        format!("Task completed with {} errors", report.failures),
                    )
                    .await;
                self.queue.partial(task_id, result).await;
            }
            _ => {
                let err = AutomationError::AllFieldsFailed;
                error!(task_id = %task_id, "All fields failed");
                self.stages.advance(Stage::Failed);
                self.queue
                    .append_log(task_id, "Task failed: All fields failed")
                    .await;
                self.queue.fail(task_id, err.to_string(), Some(result)).await;
            }
        }

        // Leave the final page visible briefly before the session is released.
        let _ = cancel.sleep(self.config.linger).await;
    }
}
