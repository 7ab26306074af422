//! File-upload rendezvous: pauses a task until the user supplies a file for
//! one field, the task is deleted, or the wait times out.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use super::cancel::CancelToken;
use crate::error::AutomationError;
use crate::queue::{TaskQueue, WorkerSignal};

/// A pending rendezvous keyed by `(task_id, selector)`.
pub struct FileRendezvous {
    task_id: Uuid,
    selector: String,
    signals: broadcast::Receiver<WorkerSignal>,
}

impl FileRendezvous {
    /// Register interest before the pause is announced so an upload that
    /// lands immediately is not missed.
    pub fn open(queue: &TaskQueue, task_id: Uuid, selector: impl Into<String>) -> Self {
        Self {
            task_id,
            selector: selector.into(),
            signals: queue.subscribe_signals(),
        }
    }

    /// Wait for the uploaded file's path.
    ///
    /// Uploads for other tasks or other selectors are ignored. Consuming `self`
    /// drops the subscription and the timer on every exit path.
    pub async fn wait(
        mut self,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> Result<PathBuf, AutomationError> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AutomationError::Cancelled),
                _ = &mut deadline => {
                    return Err(AutomationError::UploadTimeout {
                        selector: self.selector.clone(),
                        timeout,
                    });
                }
                signal = self.signals.recv() => match signal {
                    Ok(WorkerSignal::FileUploaded { id, selector, path })
                        if id == self.task_id && selector == self.selector =>
                    {
                        return Ok(path);
                    }
                    Ok(WorkerSignal::TaskDeleted { id }) if id == self.task_id => {
                        return Err(AutomationError::Cancelled);
                    }
                    Ok(other) => {
                        debug!(task_id = %self.task_id, ?other, "Ignoring unrelated signal while paused");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(task_id = %self.task_id, missed = n, "Upload rendezvous lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(AutomationError::Cancelled);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FormField;

    async fn queued_task(queue: &TaskQueue) -> Uuid {
        queue
            .enqueue("https://form", vec![FormField::new("#upload", "")])
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn matching_upload_resolves() {
        let (queue, _rx) = TaskQueue::new();
        let id = queued_task(&queue).await;
        let rendezvous = FileRendezvous::open(&queue, id, "#upload");

        queue.file_uploaded(id, "#upload", "/tmp/cv.pdf").await;
        let path = rendezvous
            .wait(&CancelToken::new(), Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(path, PathBuf::from("/tmp/cv.pdf"));
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_upload_keeps_waiting() {
        let (queue, _rx) = TaskQueue::new();
        let id = queued_task(&queue).await;
        let cancel = CancelToken::new();
        let wait = FileRendezvous::open(&queue, id, "#upload").wait(&cancel, Duration::from_secs(300));
        tokio::pin!(wait);

        queue.file_uploaded(id, "#other", "/tmp/a").await;
        assert!(
            tokio::time::timeout(Duration::from_secs(1), &mut wait)
                .await
                .is_err()
        );

        queue.file_uploaded(id, "#upload", "/tmp/b").await;
        assert_eq!(wait.await.unwrap(), PathBuf::from("/tmp/b"));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let (queue, _rx) = TaskQueue::new();
        let id = queued_task(&queue).await;
        let err = FileRendezvous::open(&queue, id, "#upload")
            .wait(&CancelToken::new(), Duration::from_secs(300))
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::UploadTimeout { ref selector, .. } if selector == "#upload"));
        assert_eq!(err.to_string(), "Timed out waiting for file upload");
    }

    #[tokio::test]
    async fn deletion_cancels_wait() {
        let (queue, _rx) = TaskQueue::new();
        let id = queued_task(&queue).await;
        let rendezvous = FileRendezvous::open(&queue, id, "#upload");

        queue.delete(id).await;
        let err = rendezvous
            .wait(&CancelToken::new(), Duration::from_secs(300))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn tripped_token_cancels_wait() {
        let (queue, _rx) = TaskQueue::new();
        let id = queued_task(&queue).await;
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = FileRendezvous::open(&queue, id, "#upload")
            .wait(&cancel, Duration::from_secs(300))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
