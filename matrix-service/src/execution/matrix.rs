// Matrix Expansion
// Expands named axes into the full cross product of job specifications

use crate::error::ConfigurationError;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Upper bound on the number of jobs a matrix may expand to
pub const MAX_JOBS: usize = 1 << 20;

/// A named, ordered set of labels (e.g. `os = [ubuntu, windows, macos]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    /// Axis name
    pub name: String,
    /// Labels in declaration order
    pub labels: Vec<String>,
}

impl Axis {
    pub fn new<I, S>(name: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Build an axis from a YAML value.
    ///
    /// Sequences of scalars become labels in order; a lone scalar becomes a
    /// single-label axis. Numbers and booleans are rendered as strings so
    /// `node: [18, 20]` behaves like `node: ["18", "20"]`.
    pub fn from_yaml(
        name: impl Into<String>,
        value: &serde_yaml::Value,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        let labels = match value {
            serde_yaml::Value::Sequence(seq) => seq
                .iter()
                .map(|v| Self::yaml_label(&name, v))
                .collect::<Result<Vec<_>, _>>()?,
            other => vec![Self::yaml_label(&name, other)?],
        };
        Ok(Self { name, labels })
    }

    fn yaml_label(axis: &str, value: &serde_yaml::Value) -> Result<String, ConfigurationError> {
        match value {
            serde_yaml::Value::String(s) => Ok(s.clone()),
            serde_yaml::Value::Number(n) => Ok(n.to_string()),
            serde_yaml::Value::Bool(b) => Ok(b.to_string()),
            serde_yaml::Value::Null => Err(ConfigurationError::InvalidLabel {
                axis: axis.to_string(),
                reason: "null is not a label".to_string(),
            }),
            serde_yaml::Value::Sequence(_) | serde_yaml::Value::Mapping(_) => {
                Err(ConfigurationError::InvalidLabel {
                    axis: axis.to_string(),
                    reason: "labels must be scalars".to_string(),
                })
            }
            serde_yaml::Value::Tagged(tagged) => Self::yaml_label(axis, &tagged.value),
        }
    }

    /// Check the axis invariants: a name, at least one label, no repeats
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::EmptyAxisName);
        }
        if self.labels.is_empty() {
            return Err(ConfigurationError::EmptyAxis(self.name.clone()));
        }

        // Artifact names are lowercase, so labels must be unique ignoring case
        let mut seen = HashSet::new();
        for label in &self.labels {
            if !seen.insert(label.to_lowercase()) {
                return Err(ConfigurationError::DuplicateLabel {
                    axis: self.name.clone(),
                    label: label.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// One axis assignment inside a job specification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisValue {
    pub axis: String,
    pub label: String,
}

/// One point in the matrix: exactly one label per axis.
///
/// `id` is the position in expansion order and is stable across runs with
/// identical axes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: usize,
    pub assignments: Vec<AxisValue>,
}

impl JobSpec {
    /// Labels in axis order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.assignments.iter().map(|a| a.label.as_str())
    }

    /// Label assigned to the given axis
    pub fn label(&self, axis: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|a| a.axis == axis)
            .map(|a| a.label.as_str())
    }

    /// Hyphen-joined labels, e.g. `ubuntu-16.x`
    pub fn name(&self) -> String {
        self.labels().collect::<Vec<_>>().join("-")
    }
}

impl fmt::Display for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .assignments
            .iter()
            .map(|a| format!("{}={}", a.axis, a.label))
            .collect();
        write!(f, "#{} ({})", self.id, parts.join(", "))
    }
}

/// Matrix expander
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand axes into their full cross product.
    ///
    /// Order is lexicographic over axis order, then label order: the last
    /// axis varies fastest.
    pub fn expand(axes: &[Axis]) -> Result<Vec<JobSpec>, ConfigurationError> {
        Self::validate(axes)?;

        let total = Self::job_count(axes)?;
        let mut specs = Vec::with_capacity(total);
        let mut cursor = vec![0usize; axes.len()];

        for id in 0..total {
            specs.push(JobSpec {
                id,
                assignments: axes
                    .iter()
                    .zip(&cursor)
                    .map(|(axis, &i)| AxisValue {
                        axis: axis.name.clone(),
                        label: axis.labels[i].clone(),
                    })
                    .collect(),
            });

            // Advance the odometer from the last axis
            for (pos, axis) in axes.iter().enumerate().rev() {
                cursor[pos] += 1;
                if cursor[pos] < axis.labels.len() {
                    break;
                }
                cursor[pos] = 0;
            }
        }

        Ok(specs)
    }

    /// Validate axis definitions without expanding them
    pub fn validate(axes: &[Axis]) -> Result<(), ConfigurationError> {
        if axes.is_empty() {
            return Err(ConfigurationError::NoAxes);
        }

        let mut names = HashSet::new();
        for axis in axes {
            axis.validate()?;
            if !names.insert(axis.name.as_str()) {
                return Err(ConfigurationError::DuplicateAxis(axis.name.clone()));
            }
        }
        Self::job_count(axes)?;
        Ok(())
    }

    /// Number of jobs the axes expand to, at most [`MAX_JOBS`]
    pub fn job_count(axes: &[Axis]) -> Result<usize, ConfigurationError> {
        axes.iter()
            .try_fold(1usize, |total, axis| total.checked_mul(axis.len()))
            .filter(|&total| total <= MAX_JOBS)
            .ok_or(ConfigurationError::MatrixTooLarge(MAX_JOBS))
    }
}

/// Builder for creating matrix axes programmatically
#[derive(Debug, Default)]
pub struct MatrixBuilder {
    axes: Vec<Axis>,
}

impl MatrixBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an axis
    pub fn axis<I, S>(mut self, name: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.axes.push(Axis::new(name, labels));
        self
    }

    /// Axes in insertion order
    pub fn build(self) -> Vec<Axis> {
        self.axes
    }

    /// Build and expand in one step
    pub fn expand(self) -> Result<Vec<JobSpec>, ConfigurationError> {
        MatrixExpander::expand(&self.axes)
    }
}
