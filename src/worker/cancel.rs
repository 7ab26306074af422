//! Per-task cancellation context.
//!
//! A [`CancelToken`] is created for each dispatched task and threaded through
//! every pipeline step. Deleting the task trips it (via [`DeletionListener`])
//! and closes the browser session, which unblocks whatever operation is in
//! flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::BrowserSession;
use crate::error::AutomationError;
use crate::queue::WorkerSignal;

/// The browser session held by the current task, once acquired.
pub type SessionSlot = Arc<Mutex<Option<Arc<dyn BrowserSession>>>>;

/// Cooperative cancellation flag shared by the worker and its listener.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trip the token. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is tripped.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Fail fast if the token is tripped.
    pub fn checkpoint(&self) -> Result<(), AutomationError> {
        if self.is_cancelled() {
            Err(AutomationError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Race a suspending operation against cancellation.
    ///
    /// Cancellation wins over whatever the operation returned, so errors
    /// caused by the session being torn down surface as `Cancelled`.
    pub async fn guard<F, T, E>(&self, fut: F) -> Result<T, AutomationError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<AutomationError>,
    {
        self.checkpoint()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(AutomationError::Cancelled),
            result = fut => {
                self.checkpoint()?;
                result.map_err(Into::into)
            }
        }
    }

    /// Run an atomic operation to completion, then observe cancellation.
    pub async fn atomic<F, T, E>(&self, fut: F) -> Result<T, AutomationError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<AutomationError>,
    {
        self.checkpoint()?;
        let result = fut.await;
        self.checkpoint()?;
        result.map_err(Into::into)
    }

    /// Cancellable delay.
    pub async fn sleep(&self, duration: Duration) -> Result<(), AutomationError> {
        self.guard(async {
            tokio::time::sleep(duration).await;
            Ok::<_, AutomationError>(())
        })
        .await
    }
}

/// Watches for deletion of one task and tears its run down.
///
/// Scoped to a single task run: the background listener is aborted on drop,
/// so a finished task leaves nothing subscribed.
pub struct DeletionListener {
    handle: JoinHandle<()>,
}

impl DeletionListener {
    /// `signals` must be subscribed before the task's existence is checked so a
    /// deletion landing in between is still observed.
    pub fn spawn(
        mut signals: broadcast::Receiver<WorkerSignal>,
        task_id: Uuid,
        cancel: CancelToken,
        session: SessionSlot,
    ) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(WorkerSignal::TaskDeleted { id }) if id == task_id => {
                        info!(task_id = %task_id, "Task deleted while in flight, cancelling");
                        cancel.cancel();
                        let held = session.lock().await.clone();
                        if let Some(session) = held {
                            if let Err(e) = session.close().await {
                                debug!(task_id = %task_id, error = %e, "Session close after deletion failed");
                            }
                        }
                        break;
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(task_id = %task_id, missed = n, "Deletion listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { handle }
    }
}

impl Drop for DeletionListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrowserError;

    #[tokio::test]
    async fn checkpoint_follows_token() {
        let token = CancelToken::new();
        assert!(token.checkpoint().is_ok());
        token.clone().cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.checkpoint(), Err(AutomationError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn guard_interrupts_pending_operation() {
        let token = CancelToken::new();
        let trip = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trip.cancel();
        });

        let result = token
            .guard(futures::future::pending::<Result<(), BrowserError>>())
            .await;
        assert!(matches!(result, Err(AutomationError::Cancelled)));
    }

    #[tokio::test]
    async fn guard_passes_through_errors() {
        let token = CancelToken::new();
        let result = token
            .guard(async { Err::<(), _>(BrowserError::Closed) })
            .await;
        assert!(matches!(
            result,
            Err(AutomationError::Browser(BrowserError::Closed))
        ));
    }

    #[tokio::test]
    async fn atomic_completes_then_reports_cancellation() {
        let token = CancelToken::new();
        let trip = token.clone();
        let result = token
            .atomic(async move {
                trip.cancel();
                Ok::<_, BrowserError>(42)
            })
            .await;
        assert!(matches!(result, Err(AutomationError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_cancellable() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(10)).await.is_ok());

        let trip = token.clone();
        tokio::spawn(async move { trip.cancel() });
        let result = token.sleep(Duration::from_secs(3600)).await;
        assert!(matches!(result, Err(AutomationError::Cancelled)));
    }

    #[tokio::test]
    async fn listener_cancels_only_its_task() {
        let (tx, _) = broadcast::channel(8);
        let token = CancelToken::new();
        let task_id = Uuid::new_v4();
        let _listener = DeletionListener::spawn(
            tx.subscribe(),
            task_id,
            token.clone(),
            SessionSlot::default(),
        );

        tx.send(WorkerSignal::TaskDeleted { id: Uuid::new_v4() }).unwrap();
        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());

        tx.send(WorkerSignal::TaskDeleted { id: task_id }).unwrap();
        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropping_listener_unsubscribes() {
        let (tx, _) = broadcast::channel::<WorkerSignal>(8);
        let listener = DeletionListener::spawn(
            tx.subscribe(),
            Uuid::new_v4(),
            CancelToken::new(),
            SessionSlot::default(),
        );
        assert_eq!(tx.receiver_count(), 1);
        drop(listener);
        tokio::time::timeout(Duration::from_secs(5), async {
            while tx.receiver_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
