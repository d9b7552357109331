// Run Summary
// Per-job outcome table built from the executor's results

use crate::execution::{JobResult, JobSpec, JobStatus};

use serde::Serialize;
use std::time::Duration;

/// One row of the run summary
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: usize,
    pub name: String,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub artifacts: Vec<String>,
}

impl JobSummary {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

impl From<&JobResult> for JobSummary {
    fn from(result: &JobResult) -> Self {
        Self {
            id: result.spec.id,
            name: result.spec.name(),
            spec: result.spec.clone(),
            status: result.status,
            attempts: result.attempts,
            duration_ms: u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
            error: result.error.as_ref().map(|e| e.to_string()),
            artifacts: result
                .artifact_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub name: String,
    pub prefix: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub artifacts: usize,
    pub jobs: Vec<JobSummary>,
}

impl RunSummary {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, results: &[JobResult]) -> Self {
        let mut jobs: Vec<JobSummary> = results.iter().map(JobSummary::from).collect();
        jobs.sort_by_key(|job| job.id);

        let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();
        let succeeded = count(JobStatus::Succeeded);
        let failed = count(JobStatus::Failed);
        let cancelled = count(JobStatus::Cancelled);
        let artifacts = jobs.iter().map(|j| j.artifacts.len()).sum();

        Self {
            name: name.into(),
            prefix: prefix.into(),
            total: jobs.len(),
            succeeded,
            failed,
            cancelled,
            artifacts,
            jobs,
        }
    }

    /// True only when every job succeeded
    pub fn is_success(&self) -> bool {
        self.succeeded == self.total
    }

    /// Longest single job; the run's wall clock is at least this long
    pub fn longest_job(&self) -> Duration {
        self.jobs
            .iter()
            .map(JobSummary::duration)
            .max()
            .unwrap_or_default()
    }
}
