//! Per-field preparation and fill strategies.

use chrono::Datelike;
use tracing::{debug, warn};
use uuid::Uuid;

use super::cancel::CancelToken;
use super::fields::{FillStrategy, day_cell_selector, parse_date};
use super::rendezvous::FileRendezvous;
use super::stage::{Stage, StageTracker};
use crate::browser::BrowserSession;
use crate::config::AutomationConfig;
use crate::error::AutomationError;
use crate::queue::{FormField, TaskQueue, TaskResult, TaskStatus};

const YEAR_SELECT: &str = ".react-datepicker__year-select";
const MONTH_SELECT: &str = ".react-datepicker__month-select";
const DROPDOWN_OPTION: &str = r#"div[id^="react-select"][id*="-option-"]"#;
const AUTOCOMPLETE_MENU: &str = ".subjects-auto-complete__menu";

/// Fills working-set fields for one task run.
pub struct FieldFiller<'a> {
    pub session: &'a dyn BrowserSession,
    pub queue: &'a TaskQueue,
    pub task_id: Uuid,
    pub cancel: &'a CancelToken,
    pub config: &'a AutomationConfig,
    pub stages: &'a StageTracker,
}

impl FieldFiller<'_> {
    async fn log(&self, message: impl Into<String>) {
        self.queue.append_log(self.task_id, message).await;
    }

    /// Prepare and fill one field.
    ///
    /// `Cancelled` and `PageClosed` abort the task; anything else is a
    /// failure of this field only.
    pub async fn fill(&self, field: &FormField) -> Result<(), AutomationError> {
        let selector = field.selector.as_str();
        self.cancel.checkpoint()?;
        if self.session.is_closed() {
            return Err(AutomationError::PageClosed);
        }

        self.log(format!("Processing: {selector}")).await;
        self.prepare(selector).await?;

        let strategy = match FillStrategy::for_selector(selector) {
            Some(strategy) => strategy,
            None => self.element_strategy(selector).await?,
        };
        debug!(task_id = %self.task_id, selector, ?strategy, "Filling field");

        match strategy {
            FillStrategy::DatePicker => self.fill_date(field).await,
            FillStrategy::SearchableDropdown => self.fill_dropdown(field).await,
            FillStrategy::Autocomplete => self.fill_autocomplete(field).await,
            FillStrategy::Label => {
                self.cancel
                    .atomic(self.session.click(selector, 1))
                    .await
                    .map_err(|e| self.field_error(selector, e))?;
                self.log(format!("Clicked label {selector}")).await;
                self.filled(selector).await
            }
            FillStrategy::Select => {
                self.cancel
                    .atomic(self.session.select_option(selector, &field.value))
                    .await
                    .map_err(|e| self.field_error(selector, e))?;
                self.filled(selector).await
            }
            FillStrategy::FileUpload => {
                self.fill_file(selector).await?;
                self.filled(selector).await
            }
            FillStrategy::Toggle => {
                if let Err(e) = self.cancel.atomic(self.session.click(selector, 1)).await {
                    if e.is_cancelled() {
                        return Err(e);
                    }
                    debug!(selector, error = %e, "Native click failed, dispatching DOM click");
                    self.cancel
                        .atomic(self.session.dom_click(selector))
                        .await
                        .map_err(|e| self.field_error(selector, e))?;
                }
                self.filled(selector).await
            }
            FillStrategy::Text => {
                self.fill_text(field).await?;
                self.filled(selector).await
            }
        }
    }

    async fn filled(&self, selector: &str) -> Result<(), AutomationError> {
        self.log(format!("Filled {selector}")).await;
        Ok(())
    }

    /// Cancellation passes through untouched; everything else is tagged with
    /// the selector.
    fn field_error(&self, selector: &str, err: AutomationError) -> AutomationError {
        match err {
            AutomationError::Cancelled
            | AutomationError::PageClosed
            | AutomationError::FieldFill { .. }
            | AutomationError::UploadTimeout { .. } => err,
            other => AutomationError::field(selector, other),
        }
    }

    /// Wait for the field, scroll it into view and let the layout settle.
    async fn prepare(&self, selector: &str) -> Result<(), AutomationError> {
        self.cancel
            .guard(
                self.session
                    .wait_for_selector(selector, self.config.field_timeout),
            )
            .await
            .map_err(|e| self.field_error(selector, e))?;

        if let Err(e) = self.cancel.atomic(self.session.scroll_into_view(selector)).await {
            if e.is_cancelled() {
                return Err(e);
            }
            debug!(selector, error = %e, "Scroll into view failed");
        }

        self.cancel.sleep(self.config.stability_delay).await
    }

    async fn element_strategy(&self, selector: &str) -> Result<FillStrategy, AutomationError> {
        let tag = self
            .cancel
            .atomic(self.session.tag_name(selector))
            .await
            .map_err(|e| self.field_error(selector, e))?;
        let input_type = match self.cancel.atomic(self.session.attribute(selector, "type")).await {
            Ok(kind) => kind,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(_) => None,
        };
        Ok(FillStrategy::for_element(&tag, input_type.as_deref()))
    }

    async fn fill_date(&self, field: &FormField) -> Result<(), AutomationError> {
        let selector = field.selector.as_str();
        let date = parse_date(&field.value).ok_or_else(|| {
            AutomationError::field(selector, format!("Unrecognized date '{}'", field.value))
        })?;

        let picked = async {
            self.cancel.atomic(self.session.click(selector, 1)).await?;
            self.cancel
                .guard(
                    self.session
                        .wait_for_selector(YEAR_SELECT, self.config.field_timeout),
                )
                .await?;
            self.cancel
                .atomic(
                    self.session
                        .select_option(YEAR_SELECT, &date.year().to_string()),
                )
                .await?;
            self.cancel
                .atomic(
                    self.session
                        .select_option(MONTH_SELECT, &date.month0().to_string()),
                )
                .await?;
            self.cancel
                .atomic(self.session.click(&day_cell_selector(date.day()), 1))
                .await
        };
        picked.await.map_err(|e| self.field_error(selector, e))?;

        self.log(format!("Selected Date: {}", field.value)).await;
        Ok(())
    }

    async fn fill_dropdown(&self, field: &FormField) -> Result<(), AutomationError> {
        let selector = field.selector.as_str();
        let picked = async {
            self.cancel.atomic(self.session.click(selector, 1)).await?;
            self.cancel
                .atomic(self.session.type_text(None, &field.value))
                .await?;
            self.cancel
                .guard(
                    self.session
                        .wait_for_selector(DROPDOWN_OPTION, self.config.field_timeout),
                )
                .await?;
            self.cancel.atomic(self.session.press_key("Enter")).await
        };
        picked.await.map_err(|e| self.field_error(selector, e))?;

        self.log(format!("Selected '{}' in {selector}", field.value))
            .await;
        Ok(())
    }

    async fn fill_autocomplete(&self, field: &FormField) -> Result<(), AutomationError> {
        let selector = field.selector.as_str();
        let picked = async {
            self.cancel
                .atomic(self.session.type_text(Some(selector), &field.value))
                .await?;
            self.cancel
                .guard(
                    self.session
                        .wait_for_selector(AUTOCOMPLETE_MENU, self.config.field_timeout),
                )
                .await?;
            self.cancel.atomic(self.session.press_key("Enter")).await
        };
        picked.await.map_err(|e| self.field_error(selector, e))?;

        self.log(format!("Selected Subject: {}", field.value)).await;
        Ok(())
    }

    /// Clear by triple-click + Backspace and type; fall back to setting the
    /// value directly with synthetic `input` / `change` events.
    async fn fill_text(&self, field: &FormField) -> Result<(), AutomationError> {
        let selector = field.selector.as_str();
        let typed = async {
            self.cancel.atomic(self.session.click(selector, 3)).await?;
            self.cancel
                .atomic(self.session.press_key("Backspace"))
                .await?;
            self.cancel
                .atomic(self.session.type_text(Some(selector), &field.value))
                .await
        };

        match typed.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                debug!(selector, error = %e, "Typing failed, setting value directly");
                self.cancel
                    .atomic(self.session.set_value(selector, &field.value))
                    .await
                    .map_err(|e| self.field_error(selector, e))?;
                self.log(format!("Filled {selector} via JS fallback")).await;
                Ok(())
            }
        }
    }

    /// Pause the task until a file is uploaded for `selector`.
    async fn fill_file(&self, selector: &str) -> Result<(), AutomationError> {
        self.log(format!("File input detected: {selector}")).await;

        let rendezvous = FileRendezvous::open(self.queue, self.task_id, selector);
        self.queue
            .set_status(
                self.task_id,
                TaskStatus::WaitingForFile,
                Some(TaskResult::AwaitingFile {
                    selector: selector.to_string(),
                }),
                None,
            )
            .await;
        self.stages.advance(Stage::AwaitingFile {
            selector: selector.to_string(),
        });
        self.log(format!("Waiting for user to upload file for {selector}..."))
            .await;

        let outcome = rendezvous
            .wait(self.cancel, self.config.upload_timeout)
            .await;
        if let Err(e) = &outcome {
            if e.is_cancelled() {
                return outcome.map(|_| ());
            }
        }

        self.stages.advance(Stage::Filling);
        self.queue.resume(self.task_id).await;

        let path = match outcome {
            Ok(path) => path,
            Err(e) => {
                warn!(task_id = %self.task_id, selector, "No file uploaded before timeout");
                return Err(e);
            }
        };

        self.log(format!("File received: {}", path.display())).await;
        self.cancel
            .atomic(self.session.upload_file(selector, &path))
            .await
            .map_err(|e| self.field_error(selector, e))?;
        self.log("File uploaded to form").await;
        Ok(())
    }
}
