// Execution Events
// Progress reporting and event types for matrix runs

use crate::execution::models::JobStatus;

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during a matrix run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run started
    RunStarted {
        total_jobs: usize,
        max_parallel: usize,
    },

    /// Run completed (every job is terminal)
    RunCompleted {
        succeeded: usize,
        failed: usize,
        cancelled: usize,
        duration: Duration,
    },

    /// A job attempt started
    JobStarted {
        job_id: usize,
        job_name: String,
        attempt: u32,
    },

    /// A job attempt failed transiently and will run again
    JobRetrying {
        job_id: usize,
        job_name: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },

    /// A job reached succeeded or failed
    JobCompleted {
        job_id: usize,
        job_name: String,
        status: JobStatus,
        duration: Duration,
        error: Option<String>,
    },

    /// A job was cancelled, before or while running
    JobCancelled {
        job_id: usize,
        job_name: String,
        reason: String,
    },

    /// A job registered an artifact
    ArtifactRegistered {
        job_id: usize,
        name: String,
        bytes: usize,
    },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        job_id: Option<usize>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    /// Create a job completed event
    pub fn job_completed(
        job_id: usize,
        job_name: impl Into<String>,
        status: JobStatus,
        duration: Duration,
        error: Option<String>,
    ) -> Self {
        Self::JobCompleted {
            job_id,
            job_name: job_name.into(),
            status,
            duration,
            error,
        }
    }

    /// Create a job cancelled event
    pub fn job_cancelled(
        job_id: usize,
        job_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::JobCancelled {
            job_id,
            job_name: job_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>, job_id: Option<usize>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            job_id,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, job_id: Option<usize>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            job_id,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, job_id: Option<usize>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            job_id,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
