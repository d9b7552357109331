// Artifact Registry
// Stores job artifacts under canonical names and enforces retention

use crate::artifacts::clock::{Clock, SystemClock};
use crate::artifacts::naming::{artifact_name, ArtifactKind};
use crate::error::{ConfigurationError, RegistryError};
use crate::execution::matrix::JobSpec;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Default retention: 30 days
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Configuration for an artifact registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Name prefix shared by every artifact of the run
    pub prefix: String,
    /// Kinds jobs are allowed to produce
    pub kinds: Vec<ArtifactKind>,
    /// How long an artifact stays accessible after creation
    pub retention: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prefix: "build".to_string(),
            kinds: ArtifactKind::defaults(),
            retention: DEFAULT_RETENTION,
        }
    }
}

impl RegistryConfig {
    /// Configuration for `prefix`, stored lowercase like the names it starts
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().to_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_kinds(mut self, kinds: Vec<ArtifactKind>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.prefix.trim().is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }
        if self.kinds.is_empty() {
            return Err(ConfigurationError::NoArtifactKinds);
        }
        Ok(())
    }
}

/// A payload produced by a job, before it is registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactOutput {
    pub kind: ArtifactKind,
    pub content: Vec<u8>,
}

impl ArtifactOutput {
    pub fn new(kind: ArtifactKind, content: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(ArtifactKind::text(), content.into())
    }

    pub fn json(value: &serde_json::Value) -> Self {
        let content = serde_json::to_vec_pretty(value).unwrap_or_else(|_| b"null".to_vec());
        Self::new(ArtifactKind::json(), content)
    }

    pub fn markdown(content: impl Into<String>) -> Self {
        Self::new(ArtifactKind::markdown(), content.into())
    }
}

/// A registered artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Canonical name
    pub name: String,
    pub kind: ArtifactKind,
    /// Producing job
    pub job: JobSpec,
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// Content as UTF-8, if it is valid UTF-8
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    /// Whether `now - created_at >= retention`
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        match (now - self.created_at).to_std() {
            Ok(age) => age >= retention,
            // Negative age: created "after" now
            Err(_) => false,
        }
    }
}

/// Size of live registry storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub artifacts: usize,
    pub bytes: usize,
}

#[derive(Default)]
struct RegistryState {
    /// Artifacts by canonical name
    artifacts: HashMap<String, Artifact>,
    /// (job, kind) -> canonical name
    keys: HashMap<(JobSpec, ArtifactKind), String>,
    closed: bool,
}

impl RegistryState {
    fn evict(&mut self, name: &str) -> Option<Artifact> {
        let artifact = self.artifacts.remove(name)?;
        self.keys.remove(&(artifact.job.clone(), artifact.kind.clone()));
        Some(artifact)
    }
}

/// Shared store for the artifacts of one run.
///
/// Every mutation goes through `register`, `sweep` or `archive`, each of
/// which holds the write lock for its whole duration.
pub struct ArtifactRegistry {
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<RegistryState>,
}

impl ArtifactRegistry {
    /// Create a registry using the system clock
    pub fn new(config: RegistryConfig) -> Result<Self, ConfigurationError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a registry with a custom clock
    pub fn with_clock(
        config: RegistryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let config = RegistryConfig {
            prefix: config.prefix.to_lowercase(),
            ..config
        };
        Ok(Self {
            config,
            clock,
            state: RwLock::new(RegistryState::default()),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    pub fn retention(&self) -> Duration {
        self.config.retention
    }

    /// Canonical name an artifact of this kind would get for `spec`
    pub fn name_for(&self, spec: &JobSpec, kind: &ArtifactKind) -> String {
        artifact_name(&self.config.prefix, spec, kind)
    }

    /// Register an artifact for `(spec, kind)`.
    ///
    /// Registering identical content for a key twice returns the existing
    /// artifact; different content fails with `RegistryError::Duplicate`.
    pub async fn register(
        &self,
        spec: &JobSpec,
        kind: &ArtifactKind,
        content: Vec<u8>,
    ) -> Result<Artifact, RegistryError> {
        if !self.config.kinds.contains(kind) {
            return Err(RegistryError::UnknownKind(kind.to_string()));
        }

        let name = self.name_for(spec, kind);
        let now = self.clock.now();
        let mut state = self.state.write().await;

        if state.closed {
            return Err(RegistryError::Closed);
        }

        // Expired but not yet swept entries no longer count
        let expired = state
            .artifacts
            .get(&name)
            .is_some_and(|a| a.is_expired(now, self.config.retention));
        if expired {
            state.evict(&name);
        }

        let key = (spec.clone(), kind.clone());
        if let Some(existing_name) = state.keys.get(&key) {
            let existing = &state.artifacts[existing_name];
            if existing.content == content {
                tracing::debug!(artifact = %name, "artifact already registered with identical content");
                return Ok(existing.clone());
            }
            return Err(RegistryError::Duplicate { name });
        }

        if let Some(other) = state.artifacts.get(&name) {
            return Err(RegistryError::NameCollision {
                name,
                existing_job: other.job.id,
            });
        }

        let artifact = Artifact {
            name: name.clone(),
            kind: kind.clone(),
            job: spec.clone(),
            content,
            created_at: now,
        };

        tracing::debug!(
            artifact = %name,
            job = spec.id,
            bytes = artifact.size(),
            "registered artifact"
        );

        state.keys.insert(key, name.clone());
        state.artifacts.insert(name, artifact.clone());
        Ok(artifact)
    }

    /// Look up an artifact by canonical name (case-insensitive)
    pub async fn get(&self, name: &str) -> Result<Artifact, RegistryError> {
        let now = self.clock.now();
        let state = self.state.read().await;
        state
            .artifacts
            .get(&name.to_lowercase())
            .filter(|a| !a.is_expired(now, self.config.retention))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Evict every artifact whose age at `now` is at least the retention.
    ///
    /// Returns how many artifacts were evicted.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write().await;
        let expired: Vec<String> = state
            .artifacts
            .values()
            .filter(|a| a.is_expired(now, self.config.retention))
            .map(|a| a.name.clone())
            .collect();

        for name in &expired {
            state.evict(name);
        }

        if !expired.is_empty() {
            tracing::info!(evicted = expired.len(), "swept expired artifacts");
        }
        expired.len()
    }

    /// Live artifacts whose name starts with `prefix` (case-insensitive), oldest first
    pub async fn list_by_prefix(&self, prefix: &str) -> Vec<Artifact> {
        let prefix = prefix.to_lowercase();
        let now = self.clock.now();
        let state = self.state.read().await;
        let mut artifacts: Vec<Artifact> = state
            .artifacts
            .values()
            .filter(|a| a.name.starts_with(&prefix))
            .filter(|a| !a.is_expired(now, self.config.retention))
            .cloned()
            .collect();
        sort_by_creation(&mut artifacts);
        artifacts
    }

    /// Live artifacts produced by one job, oldest first
    pub async fn list_for_job(&self, spec: &JobSpec) -> Vec<Artifact> {
        let now = self.clock.now();
        let state = self.state.read().await;
        let mut artifacts: Vec<Artifact> = state
            .artifacts
            .values()
            .filter(|a| &a.job == spec && !a.is_expired(now, self.config.retention))
            .cloned()
            .collect();
        sort_by_creation(&mut artifacts);
        artifacts
    }

    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.read().await;
        RegistryStats {
            artifacts: state.artifacts.len(),
            bytes: state.artifacts.values().map(Artifact::size).sum(),
        }
    }

    /// Tear the registry down at the end of a run.
    ///
    /// Returns the live artifacts, oldest first. Later registrations fail
    /// with `RegistryError::Closed`.
    pub async fn archive(&self) -> Vec<Artifact> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.closed = true;
        state.keys.clear();
        let mut artifacts: Vec<Artifact> = state
            .artifacts
            .drain()
            .map(|(_, a)| a)
            .filter(|a| !a.is_expired(now, self.config.retention))
            .collect();
        sort_by_creation(&mut artifacts);
        artifacts
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    /// Sweep on a fixed interval until the registry is archived
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if registry.is_closed().await {
                    break;
                }
                registry.sweep(registry.clock.now()).await;
            }
        })
    }
}

fn sort_by_creation(artifacts: &mut [Artifact]) {
    artifacts.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.name.cmp(&b.name))
    });
}
