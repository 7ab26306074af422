//! Chromium DevTools backend (`chrome` feature).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::element::Element;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BoundingBox, BrowserLauncher, BrowserSession, js_str};
use crate::error::BrowserError;

const WINDOW_WIDTH: u32 = 1920;
const WINDOW_HEIGHT: u32 = 1080;

fn protocol(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Protocol(e.to_string())
}

/// Launches a local Chromium per task.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    headless: bool,
}

impl ChromeLauncher {
    pub fn new(headless: bool) -> Self {
        Self { headless }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .window_size(WINDOW_WIDTH, WINDOW_HEIGHT)
            .no_sandbox()
            .arg("--disable-setuid-sandbox");
        if !self.headless {
            builder = builder.with_head().arg("--start-maximized");
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser handler stopped");
                    break;
                }
            }
        });

        // Reuse the initial tab rather than opening a second window.
        let page = match browser.pages().await {
            Ok(mut pages) if !pages.is_empty() => pages.remove(0),
            _ => browser.new_page("about:blank").await.map_err(protocol)?,
        };

        info!(headless = self.headless, "Browser session started");
        Ok(Arc::new(ChromeSession {
            browser: Mutex::new(Some(browser)),
            page,
            events,
            closed: AtomicBool::new(false),
        }))
    }
}

/// One Chromium process and its primary page.
pub struct ChromeSession {
    browser: Mutex<Option<Browser>>,
    page: Page,
    events: JoinHandle<()>,
    closed: AtomicBool,
}

impl ChromeSession {
    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.is_closed() {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }

    async fn element(&self, selector: &str) -> Result<Element, BrowserError> {
        self.ensure_open()?;
        self.page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::NotFound {
                selector: selector.to_string(),
            })
    }

    async fn focused(&self) -> Result<Element, BrowserError> {
        match self.page.find_element(":focus").await {
            Ok(el) => Ok(el),
            Err(_) => self.element("body").await,
        }
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        self.ensure_open()?;
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(protocol(e)),
            Err(_) => Err(BrowserError::Timeout {
                what: format!("navigation to {url}"),
                timeout,
            }),
        }
    }

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError> {
        self.ensure_open()?;
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn bounding_box(&self, selector: &str) -> Result<Option<BoundingBox>, BrowserError> {
        let el = self.element(selector).await?;
        Ok(el.bounding_box().await.ok().map(|b| BoundingBox {
            x: b.x,
            y: b.y,
            width: b.width,
            height: b.height,
        }))
    }

    async fn click(&self, selector: &str, click_count: u32) -> Result<(), BrowserError> {
        let el = self.element(selector).await?;
        el.click().await.map_err(protocol)?;
        if click_count >= 3 {
            // Triple click selects the field's contents.
            let script = format!(
                "(() => {{ const el = document.querySelector({}); if (el && el.select) el.select(); return true; }})()",
                js_str(selector)
            );
            self.evaluate(&script).await?;
        } else {
            for _ in 1..click_count {
                el.click().await.map_err(protocol)?;
            }
        }
        Ok(())
    }

    async fn type_text(&self, selector: Option<&str>, text: &str) -> Result<(), BrowserError> {
        let el = match selector {
            Some(selector) => {
                let el = self.element(selector).await?;
                el.focus().await.map_err(protocol)?;
                el
            }
            None => self.focused().await?,
        };
        el.type_str(text).await.map_err(protocol)?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let el = self.focused().await?;
        el.press_key(key).await.map_err(protocol)?;
        Ok(())
    }

    async fn upload_file(&self, selector: &str, path: &Path) -> Result<(), BrowserError> {
        let el = self.element(selector).await?;
        let path = path.canonicalize().map_err(|e| protocol(format!("{}: {e}", path.display())))?;
        let params = SetFileInputFilesParams::builder()
            .files(vec![path.to_string_lossy().into_owned()])
            .backend_node_id(el.backend_node_id)
            .build()
            .map_err(BrowserError::Protocol)?;
        self.page.execute(params).await.map_err(protocol)?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        self.ensure_open()?;
        let result = self.page.evaluate(script).await.map_err(protocol)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        if let Err(e) = browser.close().await {
            warn!(error = %e, "Browser close failed");
        }
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "Browser process wait failed");
        }
        self.events.abort();
        info!("Browser session closed");
        Ok(())
    }
}
