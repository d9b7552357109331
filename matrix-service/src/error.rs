// Service error types
// Configuration, job failure and artifact registry errors

use std::time::Duration;
use thiserror::Error;

/// Invalid matrix, executor or registry configuration.
///
/// Detected before any job starts; a run that hits one of these never
/// dispatches work.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("matrix must define at least one axis")]
    NoAxes,

    #[error("axis name must not be empty")]
    EmptyAxisName,

    #[error("axis '{0}' has no labels")]
    EmptyAxis(String),

    #[error("axis '{0}' is defined more than once")]
    DuplicateAxis(String),

    #[error("axis '{axis}' contains label '{label}' more than once")]
    DuplicateLabel { axis: String, label: String },

    #[error("matrix expands to more than {0} jobs")]
    MatrixTooLarge(usize),

    #[error("axis '{axis}' has an unsupported label value: {reason}")]
    InvalidLabel { axis: String, reason: String },

    #[error(
        "maxParallel must be between 1 and {max} (got {0})",
        max = tokio::sync::Semaphore::MAX_PERMITS
    )]
    InvalidParallelism(i64),

    #[error("artifact prefix must not be empty")]
    EmptyPrefix,

    #[error("at least one artifact kind must be configured")]
    NoArtifactKinds,

    #[error("invalid artifact kind '{0}': kinds are lowercase alphanumeric identifiers")]
    InvalidArtifactKind(String),

    #[error("retry multiplier must be >= 1.0 (got {0})")]
    InvalidRetryMultiplier(f64),

    #[error("failed to read configuration file '{path}': {message}")]
    Io { path: String, message: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Artifact registry errors, returned to the registering job only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("artifact '{name}' is already registered with different content")]
    Duplicate { name: String },

    #[error("artifact '{0}' not found")]
    NotFound(String),

    #[error("artifact kind '{0}' is not configured for this run")]
    UnknownKind(String),

    #[error("artifact name '{name}' is already used by job {existing_job}")]
    NameCollision { name: String, existing_job: usize },

    #[error("artifact registry has been archived")]
    Closed,
}

/// Why a single job did not succeed.
///
/// Recorded in the job's result; never propagated to sibling jobs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The work function reported a permanent failure
    #[error("{0}")]
    Failed(String),

    /// The work function reported a failure worth retrying
    #[error("transient failure: {0}")]
    Transient(String),

    /// The job exceeded its deadline
    #[error("job timed out after {0:?}")]
    Timeout(Duration),

    /// The job was cancelled before reaching another terminal state
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The work function panicked
    #[error("work function panicked: {0}")]
    Panicked(String),

    /// Registering a produced artifact failed
    #[error("artifact registration failed: {0}")]
    Artifact(#[from] RegistryError),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Whether the retry policy may run the job again after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Transient(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, JobError::Timeout(_))
    }
}

/// Umbrella error for callers that drive a whole run
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
