// Job execution models
// Job status lifecycle and per-job results

use crate::artifacts::Artifact;
use crate::error::JobError;
use crate::execution::matrix::JobSpec;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Succeeded, failed and cancelled are final
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of executing one job specification
#[derive(Debug, Clone)]
pub struct JobResult {
    pub spec: JobSpec,
    pub status: JobStatus,
    /// Wall-clock start of the first attempt
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Time spent from first attempt to terminal state
    pub duration: Duration,
    /// Attempts made (0 if the job never started)
    pub attempts: u32,
    /// Artifacts registered by the job
    pub artifacts: Vec<Artifact>,
    pub error: Option<JobError>,
}

impl JobResult {
    /// A job that has not started yet
    pub fn pending(spec: JobSpec) -> Self {
        Self {
            spec,
            status: JobStatus::Pending,
            started_at: None,
            finished_at: None,
            duration: Duration::ZERO,
            attempts: 0,
            artifacts: Vec::new(),
            error: None,
        }
    }

    /// A job cancelled before it ever ran
    pub fn cancelled_before_start(spec: JobSpec, reason: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Cancelled,
            finished_at: Some(Utc::now()),
            error: Some(JobError::Cancelled(reason.into())),
            ..Self::pending(spec)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    /// Names of the artifacts this job registered
    pub fn artifact_names(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.name.as_str()).collect()
    }
}
