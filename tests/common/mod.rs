//! Scripted in-memory browser and worker harness shared by integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use form_runner::browser::{BoundingBox, BrowserLauncher, BrowserSession};
use form_runner::config::AutomationConfig;
use form_runner::error::BrowserError;
use form_runner::queue::{Task, TaskQueue, TaskStatus};
use form_runner::worker::{RunState, Worker};

/// Maximum (virtual) time any wait is allowed before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(3600);

pub const NAV_ERROR: &str = "net::ERR_CONNECTION_RESET";

#[derive(Debug, Clone)]
struct FakeElement {
    tag: String,
    input_type: Option<String>,
    /// Every interaction with this element fails.
    broken: bool,
}

/// Page layout copied into every session the fake browser launches.
#[derive(Debug, Clone, Default)]
struct PageScript {
    nodes: Vec<FakeElement>,
    selectors: HashMap<String, usize>,
    nav_failures: u32,
    hang_urls: HashSet<String>,
    body_text: String,
    /// Reading the page text never completes.
    hang_body: bool,
    style_fails: bool,
}

/// Launches scripted sessions; keeps every session for inspection.
#[derive(Default)]
pub struct FakeBrowser {
    script: PageScript,
    launch_error: Option<String>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element reachable through `selector`.
    pub fn element(mut self, selector: &str, tag: &str, input_type: Option<&str>) -> Self {
        self.script.nodes.push(FakeElement {
            tag: tag.to_string(),
            input_type: input_type.map(str::to_string),
            broken: false,
        });
        self.script
            .selectors
            .insert(selector.to_string(), self.script.nodes.len() - 1);
        self
    }

    /// Text input.
    pub fn input(self, selector: &str) -> Self {
        self.element(selector, "input", Some("text"))
    }

    /// Text input whose every interaction fails.
    pub fn broken_input(mut self, selector: &str) -> Self {
        self = self.input(selector);
        if let Some(node) = self.script.nodes.last_mut() {
            node.broken = true;
        }
        self
    }

    /// Another selector for an element that already exists.
    pub fn alias(mut self, selector: &str, existing: &str) -> Self {
        let node = self.script.selectors[existing];
        self.script.selectors.insert(selector.to_string(), node);
        self
    }

    /// The first `n` navigations of each session fail.
    pub fn nav_failures(mut self, n: u32) -> Self {
        self.script.nav_failures = n;
        self
    }

    /// Navigation to `url` never completes.
    pub fn hang_on(mut self, url: &str) -> Self {
        self.script.hang_urls.insert(url.to_string());
        self
    }

    pub fn body(mut self, text: &str) -> Self {
        self.script.body_text = text.to_string();
        self
    }

    pub fn hang_body(mut self) -> Self {
        self.script.hang_body = true;
        self
    }

    pub fn style_fails(mut self) -> Self {
        self.script.style_fails = true;
        self
    }

    pub fn launch_error(mut self, message: &str) -> Self {
        self.launch_error = Some(message.to_string());
        self
    }

    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn session(&self, index: usize) -> Arc<FakeSession> {
        self.sessions()[index].clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, BrowserError> {
        if let Some(message) = &self.launch_error {
            return Err(BrowserError::Launch(message.clone()));
        }
        let session = Arc::new(FakeSession::new(self.script.clone()));
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

#[derive(Debug)]
struct PageState {
    script: PageScript,
    claimed: HashSet<usize>,
    actions: Vec<String>,
}

/// One scripted page. Records every mutating interaction in order.
#[derive(Debug)]
pub struct FakeSession {
    state: Mutex<PageState>,
    goto_calls: AtomicU32,
    closed: AtomicBool,
}

impl FakeSession {
    fn new(script: PageScript) -> Self {
        Self {
            state: Mutex::new(PageState {
                script,
                claimed: HashSet::new(),
                actions: Vec::new(),
            }),
            goto_calls: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn actions(&self) -> Vec<String> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn goto_calls(&self) -> u32 {
        self.goto_calls.load(Ordering::SeqCst)
    }

    fn record(&self, action: String) {
        self.state.lock().unwrap().actions.push(action);
    }

    fn node(&self, selector: &str) -> Result<(usize, FakeElement), BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        let state = self.state.lock().unwrap();
        state
            .script
            .selectors
            .get(selector)
            .map(|&id| (id, state.script.nodes[id].clone()))
            .ok_or_else(|| BrowserError::NotFound {
                selector: selector.to_string(),
            })
    }

    fn usable(&self, selector: &str) -> Result<FakeElement, BrowserError> {
        let (_, el) = self.node(selector)?;
        if el.broken {
            return Err(BrowserError::Protocol(format!(
                "Node {selector} is not interactable"
            )));
        }
        Ok(el)
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        self.goto_calls.fetch_add(1, Ordering::SeqCst);
        let (hang, fail) = {
            let mut state = self.state.lock().unwrap();
            let hang = state.script.hang_urls.contains(url);
            let fail = state.script.nav_failures > 0;
            if fail {
                state.script.nav_failures -= 1;
            }
            (hang, fail)
        };
        if hang {
            futures::future::pending::<()>().await;
        }
        if fail {
            return Err(BrowserError::Protocol(NAV_ERROR.to_string()));
        }
        self.record(format!("goto {url}"));
        Ok(())
    }

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError> {
        match self.node(selector) {
            Ok(_) => Ok(true),
            Err(BrowserError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn bounding_box(&self, selector: &str) -> Result<Option<BoundingBox>, BrowserError> {
        self.node(selector)?;
        Ok(Some(BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 200.0,
            height: 30.0,
        }))
    }

    async fn click(&self, selector: &str, click_count: u32) -> Result<(), BrowserError> {
        self.usable(selector)?;
        self.record(format!("click {selector} x{click_count}"));
        Ok(())
    }

    async fn type_text(&self, selector: Option<&str>, text: &str) -> Result<(), BrowserError> {
        let target = match selector {
            Some(selector) => {
                self.usable(selector)?;
                selector
            }
            None => "<focused>",
        };
        self.record(format!("type {target}={text}"));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        self.record(format!("key {key}"));
        Ok(())
    }

    async fn upload_file(&self, selector: &str, path: &Path) -> Result<(), BrowserError> {
        self.usable(selector)?;
        self.record(format!("upload {selector}={}", path.display()));
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> Result<Value, BrowserError> {
        Err(BrowserError::Unsupported("scripted page".into()))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        match self.exists(selector).await? {
            true => Ok(()),
            false => Err(BrowserError::Timeout {
                what: format!("selector {selector}"),
                timeout,
            }),
        }
    }

    async fn add_style(&self, _css: &str) -> Result<(), BrowserError> {
        if self.state.lock().unwrap().script.style_fails {
            return Err(BrowserError::Protocol("CSP blocked inline style".into()));
        }
        self.record("style".into());
        Ok(())
    }

    async fn claim_element(&self, selector: &str, _marker: &str) -> Result<bool, BrowserError> {
        let (id, _) = self.node(selector)?;
        Ok(!self.state.lock().unwrap().claimed.insert(id))
    }

    async fn tag_name(&self, selector: &str) -> Result<String, BrowserError> {
        Ok(self.node(selector)?.1.tag)
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, BrowserError> {
        let (_, el) = self.node(selector)?;
        Ok(if name == "type" { el.input_type } else { None })
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<(), BrowserError> {
        self.node(selector).map(|_| ())
    }

    async fn dom_click(&self, selector: &str) -> Result<(), BrowserError> {
        self.usable(selector)?;
        self.record(format!("dom_click {selector}"));
        Ok(())
    }

    async fn set_value(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        self.usable(selector)?;
        self.record(format!("set {selector}={value}"));
        Ok(())
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        self.usable(selector)?;
        self.record(format!("select {selector}={value}"));
        Ok(())
    }

    async fn body_text(&self) -> Result<String, BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        let (hang, text) = {
            let state = self.state.lock().unwrap();
            (state.script.hang_body, state.script.body_text.clone())
        };
        if hang {
            futures::future::pending::<()>().await;
        }
        Ok(text)
    }
}

/// Bounds small enough that tests don't wait on real delays.
pub fn fast_config() -> AutomationConfig {
    AutomationConfig {
        nav_retry_delay: Duration::from_millis(20),
        stability_delay: Duration::from_millis(1),
        success_timeout: Duration::from_millis(200),
        success_poll: Duration::from_millis(20),
        linger: Duration::from_millis(5),
        ..AutomationConfig::default()
    }
}

/// A running worker wired to a fresh queue and a scripted browser.
pub struct Harness {
    pub queue: Arc<TaskQueue>,
    pub browser: Arc<FakeBrowser>,
    pub stages: watch::Receiver<Option<RunState>>,
    worker: JoinHandle<()>,
}

impl Harness {
    pub fn start(browser: FakeBrowser) -> Self {
        Self::with_config(browser, fast_config())
    }

    pub fn with_config(browser: FakeBrowser, config: AutomationConfig) -> Self {
        let browser = Arc::new(browser);
        let (queue, rx) = TaskQueue::new();
        let worker = Worker::new(
            Arc::clone(&queue),
            Arc::clone(&browser) as Arc<dyn BrowserLauncher>,
            config,
        );
        let stages = worker.stages();
        let worker = worker.spawn(rx);
        Self {
            queue,
            browser,
            stages,
            worker,
        }
    }

    /// Poll until the task satisfies `done`.
    pub async fn wait_until(&self, id: Uuid, done: impl Fn(&Task) -> bool) -> Task {
        tokio::time::timeout(TEST_TIMEOUT, async {
            loop {
                if let Some(task) = self.queue.get(id).await {
                    if done(&task) {
                        return task;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task never reached the expected state")
    }

    pub async fn wait_for_status(&self, id: Uuid, status: TaskStatus) -> Task {
        self.wait_until(id, |t| t.status == status).await
    }

    pub async fn wait_terminal(&self, id: Uuid) -> Task {
        self.wait_until(id, |t| t.status.is_terminal()).await
    }

    /// Poll until `cond` holds.
    pub async fn wait_for(&self, cond: impl Fn() -> bool) {
        tokio::time::timeout(TEST_TIMEOUT, async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition never held");
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
