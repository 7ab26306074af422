//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Dashboard HTTP/WS port.
    pub port: u16,
    /// Directory where uploaded files are persisted.
    pub upload_dir: PathBuf,
    /// Launch the browser without a visible window.
    pub headless: bool,
    /// Automation bounds.
    pub automation: AutomationConfig,
}

/// Bounds used by the automation worker.
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Navigation attempts before the task fails.
    pub nav_attempts: u32,
    /// Fixed delay between navigation attempts.
    pub nav_retry_delay: Duration,
    /// Per-attempt navigation timeout.
    pub nav_timeout: Duration,
    /// Wait for a field, widget menu or option list to appear.
    pub field_timeout: Duration,
    /// Settle delay after scrolling a field into view.
    pub stability_delay: Duration,
    /// Bounded wait for a success indicator after submission.
    pub success_timeout: Duration,
    /// Poll interval while waiting for the success indicator.
    pub success_poll: Duration,
    /// File-upload rendezvous timeout.
    pub upload_timeout: Duration,
    /// Observation delay before the session is released.
    pub linger: Duration,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            nav_attempts: 3,
            nav_retry_delay: Duration::from_secs(2),
            nav_timeout: Duration::from_secs(60),
            field_timeout: Duration::from_secs(5),
            stability_delay: Duration::from_millis(300),
            success_timeout: Duration::from_secs(15),
            success_poll: Duration::from_millis(250),
            upload_timeout: Duration::from_secs(300), // 5 minutes
            linger: Duration::from_secs(2),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            upload_dir: PathBuf::from("./uploads"),
            headless: false,
            automation: AutomationConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Build from `FORM_RUNNER_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let auto = defaults.automation.clone();

        let upload_dir = std::env::var("FORM_RUNNER_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.upload_dir);

        Self {
            port: env_parse("FORM_RUNNER_PORT", defaults.port),
            upload_dir,
            headless: env_parse("FORM_RUNNER_HEADLESS", defaults.headless),
            automation: AutomationConfig {
                nav_attempts: env_parse("FORM_RUNNER_NAV_ATTEMPTS", auto.nav_attempts),
                nav_retry_delay: env_millis("FORM_RUNNER_NAV_RETRY_DELAY_MS", auto.nav_retry_delay),
                nav_timeout: env_secs("FORM_RUNNER_NAV_TIMEOUT_SECS", auto.nav_timeout),
                field_timeout: env_millis("FORM_RUNNER_FIELD_TIMEOUT_MS", auto.field_timeout),
                stability_delay: env_millis(
                    "FORM_RUNNER_STABILITY_DELAY_MS",
                    auto.stability_delay,
                ),
                success_timeout: env_secs("FORM_RUNNER_SUCCESS_TIMEOUT_SECS", auto.success_timeout),
                success_poll: auto.success_poll,
                upload_timeout: env_secs("FORM_RUNNER_UPLOAD_TIMEOUT_SECS", auto.upload_timeout),
                linger: env_millis("FORM_RUNNER_LINGER_MS", auto.linger),
            },
        }
    }
}

impl RunnerConfig {
    /// Reject bounds the worker cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.automation.nav_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FORM_RUNNER_NAV_ATTEMPTS".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.automation.success_poll.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "success_poll".into(),
                message: "must be non-zero".into(),
            });
        }
        Ok(())
    }

    /// Create the upload directory if missing.
    pub async fn ensure_upload_dir(&self) -> Result<(), ConfigError> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        Ok(())
    }
}

fn env_parse<T: FromStr + Copy + std::fmt::Debug>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, ?default, "Unparseable config value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parse(key, default.as_millis() as u64))
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(key, default.as_secs()))
}
