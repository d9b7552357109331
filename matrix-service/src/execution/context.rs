// Job Execution Context
// Cancellation signals and the per-attempt context handed to work functions

use std::sync::Arc;
use tokio::sync::watch;

/// One-shot, cloneable cancellation flag.
///
/// All clones observe the same flag; once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only ends by cancellation
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Context for a single attempt of a job
#[derive(Debug, Clone)]
pub struct JobContext {
    /// 1-based attempt number
    pub attempt: u32,
    /// Whole-run cancellation (caller cancel or run deadline)
    run: CancelSignal,
    /// This attempt only (job deadline)
    job: CancelSignal,
}

impl JobContext {
    pub(crate) fn new(attempt: u32, run: CancelSignal, job: CancelSignal) -> Self {
        Self { attempt, run, job }
    }

    /// Context that is never cancelled, for driving work functions directly
    pub fn detached() -> Self {
        Self::new(1, CancelSignal::new(), CancelSignal::new())
    }

    /// Whether the job has been asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.run.is_cancelled() || self.job.is_cancelled()
    }

    /// Resolve once the job has been asked to stop.
    ///
    /// Work functions that block for long should race this against their
    /// own work and return `JobError::Cancelled` when it wins.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.run.cancelled() => {}
            _ = self.job.cancelled() => {}
        }
    }
}
