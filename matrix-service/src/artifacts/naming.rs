// Artifact naming
// Artifact kinds and the canonical `<prefix>-<labels...>-<kind>` name

use crate::error::ConfigurationError;
use crate::execution::matrix::JobSpec;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of artifact a job produces (`text`, `json`, `md`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactKind(String);

impl ArtifactKind {
    pub const TEXT: &'static str = "text";
    pub const JSON: &'static str = "json";
    pub const MARKDOWN: &'static str = "md";

    /// Create a kind, normalizing to lowercase.
    ///
    /// Kinds end up inside artifact names, so only ASCII alphanumerics,
    /// `_` and `.` are accepted.
    pub fn new(kind: impl AsRef<str>) -> Result<Self, ConfigurationError> {
        let kind = kind.as_ref().trim().to_ascii_lowercase();
        let valid = !kind.is_empty()
            && kind
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if !valid {
            return Err(ConfigurationError::InvalidArtifactKind(kind));
        }
        Ok(Self(kind))
    }

    pub fn text() -> Self {
        Self(Self::TEXT.to_string())
    }

    pub fn json() -> Self {
        Self(Self::JSON.to_string())
    }

    pub fn markdown() -> Self {
        Self(Self::MARKDOWN.to_string())
    }

    /// The default kinds: text, json, md
    pub fn defaults() -> Vec<Self> {
        vec![Self::text(), Self::json(), Self::markdown()]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File extension used when exporting artifacts to disk
    pub fn extension(&self) -> &str {
        match self.0.as_str() {
            Self::TEXT => "txt",
            other => other,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ArtifactKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ArtifactKind {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArtifactKind> for String {
    fn from(kind: ArtifactKind) -> Self {
        kind.0
    }
}

/// Canonical artifact name: `<prefix>-<label1>-...-<labelN>-<kind>`, lowercase
pub fn artifact_name(prefix: &str, spec: &JobSpec, kind: &ArtifactKind) -> String {
    let mut parts = Vec::with_capacity(spec.assignments.len() + 2);
    parts.push(prefix);
    parts.extend(spec.labels());
    parts.push(kind.as_str());
    parts.join("-").to_lowercase()
}
