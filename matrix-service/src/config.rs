// Run Configuration
// YAML description of a matrix run: axes, artifact naming/retention and execution policy

use crate::artifacts::{ArtifactKind, RegistryConfig};
use crate::error::ConfigurationError;
use crate::execution::{Axis, ExecutorConfig, JobSpec, MatrixExpander, RetryPolicy};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

fn default_run_name() -> String {
    "matrix".to_string()
}

fn default_retention_days() -> u32 {
    30
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// Top-level run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default = "default_run_name")]
    pub name: String,

    /// Artifact name prefix
    pub prefix: String,

    /// Axis name -> labels, in declaration order
    pub matrix: serde_yaml::Mapping,

    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ArtifactsConfig {
    #[serde(default = "ArtifactKind::defaults")]
    pub kinds: Vec<ArtifactKind>,

    #[serde(default = "default_retention_days")]
    pub retention_in_days: u32,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            kinds: ArtifactKind::defaults(),
            retention_in_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Defaults to the number of jobs
    pub max_parallel: Option<i64>,

    #[serde(default)]
    pub fail_fast: bool,

    pub job_timeout_in_minutes: Option<u32>,

    pub run_timeout_in_minutes: Option<u32>,

    pub cancel_timeout_in_seconds: Option<u32>,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Everything needed to start a run, validated
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub name: String,
    pub axes: Vec<Axis>,
    pub jobs: Vec<JobSpec>,
    pub executor: ExecutorConfig,
    pub registry: RegistryConfig,
}

impl RunConfig {
    /// Parse a run configuration from YAML
    pub fn parse(content: &str) -> Result<Self, ConfigurationError> {
        serde_yaml::from_str(content).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    /// Read and parse a run configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Axes in declaration order
    pub fn axes(&self) -> Result<Vec<Axis>, ConfigurationError> {
        self.matrix
            .iter()
            .map(|(key, value)| {
                let name = match key {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    _ => {
                        return Err(ConfigurationError::Parse(
                            "matrix axis names must be strings".to_string(),
                        ))
                    }
                };
                Axis::from_yaml(name, value)
            })
            .collect()
    }

    pub fn executor_config(&self, job_count: usize) -> Result<ExecutorConfig, ConfigurationError> {
        let exec = &self.execution;

        let max_parallel = match exec.max_parallel {
            Some(n) if n < 1 => return Err(ConfigurationError::InvalidParallelism(n)),
            // More workers than jobs never helps, and keeps the semaphore in range
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX).min(job_count.max(1)),
            None => job_count.max(1),
        };

        let mut config = ExecutorConfig::default()
            .with_max_parallel(max_parallel)
            .with_fail_fast(exec.fail_fast)
            .with_retry(RetryPolicy {
                max_retries: exec.retry.max_retries,
                initial_backoff: Duration::from_millis(exec.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(exec.retry.max_backoff_ms),
                multiplier: exec.retry.multiplier,
            });

        if let Some(minutes) = exec.job_timeout_in_minutes {
            config = config.with_job_timeout(Duration::from_secs(u64::from(minutes) * 60));
        }
        if let Some(minutes) = exec.run_timeout_in_minutes {
            config = config.with_run_timeout(Duration::from_secs(u64::from(minutes) * 60));
        }
        if let Some(seconds) = exec.cancel_timeout_in_seconds {
            config = config.with_cancel_grace(Duration::from_secs(u64::from(seconds)));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn registry_config(&self) -> Result<RegistryConfig, ConfigurationError> {
        let config = RegistryConfig::new(self.prefix.clone())
            .with_kinds(self.artifacts.kinds.clone())
            .with_retention(Duration::from_secs(
                u64::from(self.artifacts.retention_in_days) * SECONDS_PER_DAY,
            ));
        config.validate()?;
        Ok(config)
    }

    /// Validate everything and expand the matrix
    pub fn plan(&self) -> Result<RunPlan, ConfigurationError> {
        let axes = self.axes()?;
        let jobs = MatrixExpander::expand(&axes)?;
        let executor = self.executor_config(jobs.len())?;
        let registry = self.registry_config()?;

        Ok(RunPlan {
            name: self.name.clone(),
            axes,
            jobs,
            executor,
            registry,
        })
    }
}
