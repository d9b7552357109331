// Artifacts Module
// Artifact naming, storage and retention

pub mod clock;
pub mod naming;
pub mod registry;

// Re-export key types
pub use clock::{Clock, ManualClock, SystemClock};
pub use naming::{artifact_name, ArtifactKind};
pub use registry::{
    Artifact, ArtifactOutput, ArtifactRegistry, RegistryConfig, RegistryStats, DEFAULT_RETENTION,
};
