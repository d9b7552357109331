// Report Runner
// Simulated build job producing a text report, JSON metadata and a Markdown summary

use crate::artifacts::{ArtifactKind, ArtifactOutput};
use crate::error::JobError;
use crate::execution::context::JobContext;
use crate::execution::matrix::JobSpec;
use crate::runners::JobWork;

use std::collections::HashSet;
use std::time::Duration;

/// Work function that "builds" each matrix entry and reports on it.
///
/// Payloads only depend on the run name and the job specification, so a
/// retried job re-registers identical content.
#[derive(Debug, Clone)]
pub struct ReportWork {
    run_name: String,
    kinds: Vec<ArtifactKind>,
    build_time: Duration,
    failing_jobs: HashSet<String>,
}

impl ReportWork {
    pub fn new(run_name: impl Into<String>, kinds: Vec<ArtifactKind>) -> Self {
        Self {
            run_name: run_name.into(),
            kinds,
            build_time: Duration::ZERO,
            failing_jobs: HashSet::new(),
        }
    }

    /// Sleep this long per job to simulate build work
    pub fn with_build_time(mut self, build_time: Duration) -> Self {
        self.build_time = build_time;
        self
    }

    /// Make the job whose hyphen-joined labels equal `job_name` fail
    pub fn fail_on(mut self, job_name: impl Into<String>) -> Self {
        self.failing_jobs.insert(job_name.into().to_lowercase());
        self
    }

    fn text_report(&self, spec: &JobSpec) -> String {
        let mut report = format!(
            "Build report\nrun: {}\njob: {}\n",
            self.run_name,
            spec.name()
        );
        for assignment in &spec.assignments {
            report.push_str(&format!("{}: {}\n", assignment.axis, assignment.label));
        }
        report.push_str("status: succeeded\n");
        report
    }

    fn json_report(&self, spec: &JobSpec) -> serde_json::Value {
        let matrix: serde_json::Map<String, serde_json::Value> = spec
            .assignments
            .iter()
            .map(|a| (a.axis.clone(), serde_json::Value::String(a.label.clone())))
            .collect();

        serde_json::json!({
            "run": self.run_name,
            "job": spec.id,
            "name": spec.name(),
            "matrix": matrix,
            "status": "succeeded",
        })
    }

    fn markdown_report(&self, spec: &JobSpec) -> String {
        let mut md = format!("# Build report: {}\n\n", spec.name());
        md.push_str(&format!("Run `{}`, job #{}\n\n", self.run_name, spec.id));
        md.push_str("| Axis | Value |\n|------|-------|\n");
        for assignment in &spec.assignments {
            md.push_str(&format!("| {} | {} |\n", assignment.axis, assignment.label));
        }
        md.push_str("\n**Status:** succeeded\n");
        md
    }

    fn output_for(&self, spec: &JobSpec, kind: &ArtifactKind) -> ArtifactOutput {
        match kind.as_str() {
            ArtifactKind::JSON => ArtifactOutput::json(&self.json_report(spec)),
            ArtifactKind::MARKDOWN => ArtifactOutput::markdown(self.markdown_report(spec)),
            // Any other configured kind gets the plain report
            _ => ArtifactOutput::new(kind.clone(), self.text_report(spec)),
        }
    }
}

#[async_trait::async_trait]
impl JobWork for ReportWork {
    async fn run(
        &self,
        spec: &JobSpec,
        ctx: JobContext,
    ) -> Result<Vec<ArtifactOutput>, JobError> {
        if !self.build_time.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.build_time) => {}
                _ = ctx.cancelled() => {
                    return Err(JobError::Cancelled(format!("build of {} interrupted", spec.name())));
                }
            }
        }

        if self.failing_jobs.contains(&spec.name().to_lowercase()) {
            return Err(JobError::failed(format!("build of {} failed", spec.name())));
        }

        Ok(self
            .kinds
            .iter()
            .map(|kind| self.output_for(spec, kind))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::context::CancelSignal;
    use crate::execution::matrix::MatrixBuilder;

    fn spec() -> JobSpec {
        MatrixBuilder::new()
            .axis("os", ["ubuntu"])
            .axis("version", ["16.x"])
            .expand()
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_produces_one_output_per_kind() {
        let work = ReportWork::new("build", ArtifactKind::defaults());
        let outputs = work.run(&spec(), JobContext::detached()).await.unwrap();

        let kinds: Vec<_> = outputs.iter().map(|o| o.kind.as_str()).collect();
        assert_eq!(kinds, vec!["text", "json", "md"]);

        let text = String::from_utf8(outputs[0].content.clone()).unwrap();
        assert!(text.contains("os: ubuntu"));
        assert!(text.contains("version: 16.x"));

        let json: serde_json::Value = serde_json::from_slice(&outputs[1].content).unwrap();
        assert_eq!(json["matrix"]["os"], "ubuntu");
        assert_eq!(json["name"], "ubuntu-16.x");

        let md = String::from_utf8(outputs[2].content.clone()).unwrap();
        assert!(md.starts_with("# Build report: ubuntu-16.x"));
        assert!(md.contains("| version | 16.x |"));
    }

    #[tokio::test]
    async fn test_output_is_deterministic() {
        let work = ReportWork::new("build", ArtifactKind::defaults());
        let first = work.run(&spec(), JobContext::detached()).await.unwrap();
        let second = work.run(&spec(), JobContext::detached()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_configured_failure() {
        let work = ReportWork::new("build", ArtifactKind::defaults()).fail_on("Ubuntu-16.x");
        let err = work.run(&spec(), JobContext::detached()).await.unwrap_err();
        assert_eq!(err, JobError::failed("build of ubuntu-16.x failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_time_observes_cancellation() {
        let work = ReportWork::new("build", ArtifactKind::defaults())
            .with_build_time(Duration::from_secs(60));
        let run = CancelSignal::new();
        run.cancel();
        let ctx = JobContext::new(1, run, CancelSignal::new());

        let err = work.run(&spec(), ctx).await.unwrap_err();
        assert!(matches!(err, JobError::Cancelled(_)));
    }
}
