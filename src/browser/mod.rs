//! Browser-session capability consumed by the automation worker.
//!
//! The worker only talks to these traits. A Chromium DevTools backend lives
//! in [`chrome`] behind the `chrome` cargo feature; tests plug in scripted
//! sessions.
//!
//! Page-side helpers (`claim_element`, `scroll_into_view`, `set_value`, ...)
//! have default implementations built on [`BrowserSession::evaluate`], so a
//! backend only needs the primitive operations.

#[cfg(feature = "chrome")]
pub mod chrome;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BrowserError;

/// Poll interval for the default `wait_for_selector`.
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Element geometry in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Starts browser sessions. One session per task.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a browser and return a session on its primary page.
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, BrowserError>;
}

/// A live browser session on a single page.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate and wait for the DOM to be ready.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Whether `selector` currently resolves to an element.
    async fn exists(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Geometry of the first match; `None` when not rendered.
    async fn bounding_box(&self, selector: &str) -> Result<Option<BoundingBox>, BrowserError>;

    /// Click the first match `click_count` times.
    async fn click(&self, selector: &str, click_count: u32) -> Result<(), BrowserError>;

    /// Type into the first match, or into the focused element when `None`.
    async fn type_text(&self, selector: Option<&str>, text: &str) -> Result<(), BrowserError>;

    /// Press a named key (`Enter`, `Backspace`, ...) on the focused element.
    async fn press_key(&self, key: &str) -> Result<(), BrowserError>;

    /// Attach a local file to a file input.
    async fn upload_file(&self, selector: &str, path: &Path) -> Result<(), BrowserError>;

    /// Evaluate a JavaScript expression and return its JSON value.
    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError>;

    /// Whether the session has been closed.
    fn is_closed(&self) -> bool;

    /// Close the session. Unblocks any in-flight operation.
    async fn close(&self) -> Result<(), BrowserError>;

    /// Wait until `selector` resolves.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.exists(selector).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    what: format!("selector {selector}"),
                    timeout,
                });
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    /// Inject a stylesheet into the page.
    async fn add_style(&self, css: &str) -> Result<(), BrowserError> {
        let script = format!(
            "(() => {{ const s = document.createElement('style'); s.textContent = {}; \
             (document.head || document.documentElement).appendChild(s); return true; }})()",
            js_str(css)
        );
        self.evaluate(&script).await.map(|_| ())
    }

    /// Mark the element as claimed. Returns `true` if it was already claimed.
    async fn claim_element(&self, selector: &str, marker: &str) -> Result<bool, BrowserError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return null; \
             if (el.getAttribute({m}) === 'true') return true; \
             el.setAttribute({m}, 'true'); return false; }})()",
            sel = js_str(selector),
            m = js_str(marker)
        );
        match self.evaluate(&script).await? {
            Value::Bool(claimed) => Ok(claimed),
            _ => Err(BrowserError::NotFound {
                selector: selector.to_string(),
            }),
        }
    }

    /// Lower-case tag name of the first match.
    async fn tag_name(&self, selector: &str) -> Result<String, BrowserError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.tagName.toLowerCase() : null; }})()",
            js_str(selector)
        );
        match self.evaluate(&script).await? {
            Value::String(tag) => Ok(tag),
            _ => Err(BrowserError::NotFound {
                selector: selector.to_string(),
            }),
        }
    }

    /// Attribute value of the first match.
    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, BrowserError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.getAttribute({}) : null; }})()",
            js_str(selector),
            js_str(name)
        );
        Ok(self.evaluate(&script).await?.as_str().map(str::to_string))
    }

    /// Scroll the first match to the center of the viewport.
    async fn scroll_into_view(&self, selector: &str) -> Result<(), BrowserError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); \
             if (el) el.scrollIntoView({{ block: 'center', inline: 'center' }}); return true; }})()",
            js_str(selector)
        );
        self.evaluate(&script).await.map(|_| ())
    }

    /// Click through direct DOM dispatch, bypassing hit-testing.
    async fn dom_click(&self, selector: &str) -> Result<(), BrowserError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }})()",
            js_str(selector)
        );
        expect_found(self.evaluate(&script).await?, selector)
    }

    /// Set the value directly and dispatch `input` / `change`.
    async fn set_value(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.value = {}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
            js_str(selector),
            js_str(value)
        );
        expect_found(self.evaluate(&script).await?, selector)
    }

    /// Choose the `<option>` whose value matches.
    async fn select_option(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; \
             const opt = Array.from(el.options || []).find(o => o.value === {v} || o.text === {v}); \
             if (!opt) return false; el.value = opt.value; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
            js_str(selector),
            v = js_str(value)
        );
        expect_found(self.evaluate(&script).await?, selector)
    }

    /// Visible text of the page body.
    async fn body_text(&self) -> Result<String, BrowserError> {
        let value = self
            .evaluate("document.body ? document.body.innerText : ''")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

/// Quote a Rust string as a JavaScript string literal.
pub fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn expect_found(value: Value, selector: &str) -> Result<(), BrowserError> {
    if value == Value::Bool(true) {
        Ok(())
    } else {
        Err(BrowserError::NotFound {
            selector: selector.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Session that answers `evaluate` from a canned value and records scripts.
    struct EvalOnly {
        answer: Value,
        scripts: Mutex<Vec<String>>,
    }

    impl EvalOnly {
        fn new(answer: Value) -> Self {
            Self {
                answer,
                scripts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BrowserSession for EvalOnly {
        async fn goto(&self, _url: &str, _timeout: Duration) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn exists(&self, _selector: &str) -> Result<bool, BrowserError> {
            Ok(false)
        }
        async fn bounding_box(&self, _s: &str) -> Result<Option<BoundingBox>, BrowserError> {
            Ok(None)
        }
        async fn click(&self, _s: &str, _n: u32) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn type_text(&self, _s: Option<&str>, _t: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn press_key(&self, _k: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn upload_file(&self, _s: &str, _p: &Path) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
            self.scripts.lock().unwrap().push(script.to_string());
            Ok(self.answer.clone())
        }
        fn is_closed(&self) -> bool {
            false
        }
        async fn close(&self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    #[test]
    fn js_str_escapes_quotes() {
        assert_eq!(js_str(r#"input[placeholder="Name"]"#), r#""input[placeholder=\"Name\"]""#);
    }

    #[tokio::test]
    async fn claim_element_reads_bool() {
        let session = EvalOnly::new(Value::Bool(true));
        assert!(session.claim_element("#a", "data-fr-queued").await.unwrap());

        let missing = EvalOnly::new(Value::Null);
        assert!(matches!(
            missing.claim_element("#a", "data-fr-queued").await,
            Err(BrowserError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn set_value_embeds_quoted_value() {
        let session = EvalOnly::new(Value::Bool(true));
        session.set_value("#a", "O'Brien \"Jr\"").await.unwrap();
        let scripts = session.scripts.lock().unwrap();
        assert!(scripts[0].contains(r#""O'Brien \"Jr\"""#));
        assert!(scripts[0].contains("dispatchEvent(new Event('change'"));
    }

    #[tokio::test]
    async fn dom_click_reports_missing_element() {
        let session = EvalOnly::new(Value::Bool(false));
        assert!(session.dom_click("#submit").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn default_wait_for_selector_times_out() {
        let session = EvalOnly::new(Value::Null);
        let err = session
            .wait_for_selector("#never", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Timeout { .. }));
    }

    #[tokio::test]
    async fn body_text_defaults_to_empty() {
        let session = EvalOnly::new(Value::Null);
        assert_eq!(session.body_text().await.unwrap(), "");
    }
}
