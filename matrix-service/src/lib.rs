// Matrix Service Library
// Job-matrix expansion, bounded parallel execution and artifact collection

pub mod artifacts;
pub mod config;
pub mod error;
pub mod execution;
pub mod reporting;
pub mod runners;

// Re-export commonly used types
pub use error::{ConfigurationError, JobError, RegistryError, ServiceError, ServiceResult};

// Re-export configuration types
pub use config::{RunConfig, RunPlan};

// Re-export artifact types
pub use artifacts::{
    Artifact, ArtifactKind, ArtifactOutput, ArtifactRegistry, Clock, ManualClock, RegistryConfig,
    SystemClock,
};

// Re-export execution types
pub use execution::{
    Axis, CancelSignal, ExecutionEvent, ExecutorConfig, JobContext, JobExecutor, JobResult,
    JobSpec, JobStatus, MatrixBuilder, MatrixExpander, ProgressSender, RetryPolicy, RunHandle,
};

// Re-export reporting types
pub use reporting::{ReportFormat, RunSummary, SummaryReporter};

// Re-export runner types
pub use runners::{work_fn, JobWork, ReportWork};
