//! Deferred blob deletion.
//!
//! Deletions are queued and run by a background worker so that request
//! handlers return immediately. Each job waits for its own due time, so an
//! immediate deletion never queues behind a grace period. The worker runs
//! under a supervisor that restarts it if it panics; failed deletions are
//! logged.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::storage::{FileStorage, StorageError};

/// Counts a job as pending until it is dropped, whichever way it ends
#[derive(Debug)]
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn new(pending: &Arc<AtomicUsize>) -> Self {
        pending.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(pending))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct CleanupJob {
    key: String,
    due: Instant,
    _pending: PendingGuard,
}

/// Handle for scheduling deletions
#[derive(Clone)]
pub struct CleanupQueue {
    tx: mpsc::UnboundedSender<CleanupJob>,
    pending: Arc<AtomicUsize>,
}

impl CleanupQueue {
    /// Spawn the supervised worker. The returned handle completes once every
    /// queue handle has been dropped and the backlog is drained.
    ///
    /// When `shutdown` fires, remaining jobs are run without waiting for
    /// their grace period.
    pub fn start(storage: Arc<FileStorage>, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let rx = Arc::new(Mutex::new(rx));

        let supervisor = tokio::spawn(async move {
            let jobs = TaskTracker::new();
            loop {
                let worker = tokio::spawn(run_worker(
                    Arc::clone(&rx),
                    Arc::clone(&storage),
                    jobs.clone(),
                    shutdown.clone(),
                ));
                match worker.await {
                    Ok(()) => break,
                    Err(e) if e.is_panic() => {
                        error!(error = %e, "Cleanup worker panicked, restarting");
                    }
                    Err(e) => {
                        warn!(error = %e, "Cleanup worker stopped");
                        break;
                    }
                }
            }
            jobs.close();
            jobs.wait().await;
            debug!("Cleanup queue closed");
        });

        (Self { tx, pending }, supervisor)
    }

    /// Delete `key` after `delay`
    pub fn schedule(&self, key: impl Into<String>, delay: Duration) {
        let job = CleanupJob {
            key: key.into(),
            due: Instant::now() + delay,
            _pending: PendingGuard::new(&self.pending),
        };
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
            warn!(key = %job.key, "Cleanup queue closed, blob left in storage");
        }
    }

    /// Delete `key` as soon as possible
    pub fn schedule_now(&self, key: impl Into<String>) {
        self.schedule(key, Duration::ZERO);
    }

    /// Jobs queued or in progress
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

async fn run_worker(
    rx: Arc<Mutex<mpsc::UnboundedReceiver<CleanupJob>>>,
    storage: Arc<FileStorage>,
    jobs: TaskTracker,
    shutdown: CancellationToken,
) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            return;
        };
        jobs.spawn(delete_when_due(job, Arc::clone(&storage), shutdown.clone()));
    }
}

async fn delete_when_due(job: CleanupJob, storage: Arc<FileStorage>, shutdown: CancellationToken) {
    tokio::select! {
        () = tokio::time::sleep_until(job.due) => {}
        () = shutdown.cancelled() => {}
    }

    match storage.remove(&job.key).await {
        Ok(()) => info!(key = %job.key, "Deleted blob"),
        Err(StorageError::NotFound(_)) => debug!(key = %job.key, "Blob already gone"),
        Err(e) => warn!(key = %job.key, error = %e, "Failed to delete blob"),
    }
}
