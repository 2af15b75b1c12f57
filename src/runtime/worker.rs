//! Bounded-channel worker plumbing.
//!
//! Each pipeline stage is a task reading from a bounded mpsc channel and
//! writing to the next stage's channel. Shutdown is cooperative: a
//! [`CancellationToken`] is observed between items, and closing the input
//! channel drains-and-exits. There is no mid-item cancellation; I/O timeouts
//! live inside the stages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default bound for stage queues.
pub const DEFAULT_QUEUE_SIZE: usize = 512;

/// A running pipeline stage.
///
/// Tracks liveness for the supervisor: `running` flips to false when the
/// task exits for any reason, which is the supervisor's cue to rebuild the
/// stage from its resource description.
pub struct WorkerHandle {
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    pub fn running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Request a cooperative stop; the task finishes its current item.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Spawn a stage task with liveness tracking.
///
/// `work` receives the cancellation token and runs until completion or
/// cancellation; the handle's `running` bit clears when it returns.
pub fn spawn<F, Fut>(name: &'static str, work: F) -> WorkerHandle
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let cancel = CancellationToken::new();

    let task_running = running.clone();
    let task_cancel = cancel.clone();
    let join = tokio::spawn(async move {
        debug!(worker = name, "worker started");
        work(task_cancel).await;
        task_running.store(false, Ordering::Relaxed);
        debug!(worker = name, "worker exited");
    });

    WorkerHandle {
        running,
        cancel,
        join,
    }
}

/// Worker-facing send with half-full warning and full-drop semantics.
///
/// Streaming producers cannot block on a slow consumer, so a full queue
/// drops the item (and says so once per item at warn level). Returns whether
/// the item was enqueued.
pub fn offer<T>(queue: &mpsc::Sender<T>, item: T, stage: &'static str) -> bool {
    let capacity = queue.max_capacity();
    if queue.capacity() < capacity / 2 {
        warn!(stage, "queue over half full");
    }

    match queue.try_send(item) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(stage, "queue full, dropping item");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(stage, "queue closed");
            false
        }
    }
}

/// Polling-producer send: waits up to `timeout`, then drops.
pub async fn offer_patient<T>(
    queue: &mpsc::Sender<T>,
    item: T,
    timeout: std::time::Duration,
    stage: &'static str,
) -> bool {
    match tokio::time::timeout(timeout, queue.send(item)).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => {
            debug!(stage, "queue closed");
            false
        }
        Err(_) => {
            warn!(stage, "queue send timed out, dropping item");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn handle_tracks_liveness() {
        let handle = spawn("test", |cancel| async move {
            cancel.cancelled().await;
        });
        assert!(handle.running());
        handle.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.running());
    }

    #[tokio::test]
    async fn offer_drops_when_full() {
        let (tx, mut rx) = mpsc::channel::<u32>(1);
        assert!(offer(&tx, 1, "test"));
        assert!(!offer(&tx, 2, "test"));
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn offer_patient_times_out() {
        let (tx, _rx) = mpsc::channel::<u32>(1);
        assert!(offer_patient(&tx, 1, Duration::from_millis(10), "test").await);
        // Queue now full and nobody is draining.
        assert!(!offer_patient(&tx, 2, Duration::from_millis(10), "test").await);
    }
}
