//! Error types for Form Runner.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the task store & scheduler.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Bad enqueue input; no task is created.
    #[error("{0}")]
    Validation(String),
}

/// Errors raised while driving a task through the automation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("Failed to acquire browser session: {0}")]
    SessionAcquisition(String),

    /// Message carries the last navigation failure verbatim.
    #[error("{reason}")]
    Navigation { attempts: u32, reason: String },

    #[error("No matching fields found on the page.")]
    NoMatchingFields,

    #[error("All fields failed to fill. Check selectors.")]
    AllFieldsFailed,

    #[error("{reason}")]
    FieldFill { selector: String, reason: String },

    #[error("Timed out waiting for file upload")]
    UploadTimeout { selector: String, timeout: Duration },

    #[error("Page closed unexpectedly")]
    PageClosed,

    #[error("Task cancelled")]
    Cancelled,

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

impl AutomationError {
    /// The deletion-driven cancellation condition.
    ///
    /// A closed session observed while cancelling is reported as `Browser(Closed)`;
    /// callers must consult the cancellation context as well.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Build a field failure from any displayable cause.
    pub fn field(selector: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::FieldFill {
            selector: selector.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors surfaced by a browser-session capability.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("No element matches selector {selector}")]
    NotFound { selector: String },

    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("Browser session closed")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Queue tool-calling errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    NotFound { name: String },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_messages_match_audit_trail() {
        assert_eq!(
            AutomationError::NoMatchingFields.to_string(),
            "No matching fields found on the page."
        );
        assert_eq!(
            AutomationError::AllFieldsFailed.to_string(),
            "All fields failed to fill. Check selectors."
        );
        let nav = AutomationError::Navigation {
            attempts: 3,
            reason: "net::ERR_NAME_NOT_RESOLVED".into(),
        };
        assert_eq!(nav.to_string(), "net::ERR_NAME_NOT_RESOLVED");
    }

    #[test]
    fn only_cancelled_is_cancellation() {
        assert!(AutomationError::Cancelled.is_cancelled());
        assert!(!AutomationError::PageClosed.is_cancelled());
        assert!(!AutomationError::Browser(BrowserError::Closed).is_cancelled());
        assert!(
            !AutomationError::UploadTimeout {
                selector: "#upload".into(),
                timeout: Duration::from_secs(300),
            }
            .is_cancelled()
        );
    }

    #[test]
    fn browser_errors_convert() {
        let err: AutomationError = BrowserError::NotFound {
            selector: "#a".into(),
        }
        .into();
        assert_eq!(err.to_string(), "No element matches selector #a");
    }
}
