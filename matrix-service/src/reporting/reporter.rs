// Summary Reporter
// Renders a run summary as terminal text, JSON or Markdown

use crate::execution::JobStatus;
use crate::reporting::summary::RunSummary;

use std::fmt;

/// Output format for run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Human-readable terminal output
    #[default]
    Terminal,
    /// Machine-readable JSON document
    Json,
    /// Markdown table (job summaries, PR comments)
    Markdown,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Terminal => write!(f, "terminal"),
            ReportFormat::Json => write!(f, "json"),
            ReportFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "terminal" | "text" | "console" => Ok(ReportFormat::Terminal),
            "json" => Ok(ReportFormat::Json),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            _ => Err(format!(
                "Unknown report format '{}'. Valid formats: terminal, json, markdown",
                s
            )),
        }
    }
}

/// Generates run summaries in the supported formats
pub struct SummaryReporter;

impl SummaryReporter {
    /// Generate a report in the specified format
    pub fn report(summary: &RunSummary, format: ReportFormat) -> String {
        match format {
            ReportFormat::Terminal => Self::to_terminal(summary),
            ReportFormat::Json => Self::to_json(summary),
            ReportFormat::Markdown => Self::to_markdown(summary),
        }
    }

    pub fn to_json(summary: &RunSummary) -> String {
        // RunSummary only holds strings, numbers and maps
        serde_json::to_string_pretty(summary).unwrap_or_else(|e| {
            serde_json::json!({ "error": e.to_string() }).to_string()
        })
    }

    /// Generate human-readable terminal output
    pub fn to_terminal(summary: &RunSummary) -> String {
        let mut out = String::new();

        out.push_str(&format!("\nMatrix Run: {} ({})\n", summary.name, summary.prefix));
        out.push_str(&"=".repeat(60));
        out.push('\n');

        for job in &summary.jobs {
            let symbol = match job.status {
                JobStatus::Succeeded => "+",
                JobStatus::Failed => "x",
                JobStatus::Cancelled => "-",
                JobStatus::Pending | JobStatus::Running => "?",
            };

            out.push_str(&format!(
                "  [{}] {:<9} ({:.2}s) #{} {}",
                symbol,
                job.status.to_string().to_uppercase(),
                job.duration().as_secs_f64(),
                job.id,
                job.name,
            ));
            if job.attempts > 1 {
                out.push_str(&format!(" [{} attempts]", job.attempts));
            }
            out.push('\n');

            if let Some(ref error) = job.error {
                out.push_str(&format!("       {}\n", error));
            }
            for artifact in &job.artifacts {
                out.push_str(&format!("       -> {}\n", artifact));
            }
        }

        out.push_str(&"-".repeat(60));
        out.push('\n');

        if summary.is_success() {
            out.push_str(&format!(
                "  All {} jobs succeeded, {} artifacts\n",
                summary.total, summary.artifacts
            ));
        } else {
            out.push_str(&format!(
                "  {} succeeded, {} failed, {} cancelled of {} jobs\n",
                summary.succeeded, summary.failed, summary.cancelled, summary.total
            ));
        }

        out.push('\n');
        out
    }

    pub fn to_markdown(summary: &RunSummary) -> String {
        let mut md = String::new();
        md.push_str(&format!("## Matrix run `{}`\n\n", summary.name));
        md.push_str(&format!(
            "**{}** succeeded, **{}** failed, **{}** cancelled of {} jobs (prefix `{}`)\n\n",
            summary.succeeded, summary.failed, summary.cancelled, summary.total, summary.prefix
        ));

        md.push_str("| # | Job | Status | Attempts | Duration | Artifacts |\n");
        md.push_str("|---|-----|--------|----------|----------|-----------|\n");
        for job in &summary.jobs {
            let status = match &job.error {
                Some(error) => format!("{} ({})", job.status, md_escape(error)),
                None => job.status.to_string(),
            };
            let artifacts = if job.artifacts.is_empty() {
                "-".to_string()
            } else {
                job.artifacts
                    .iter()
                    .map(|a| format!("`{}`", a))
                    .collect::<Vec<_>>()
                    .join("<br>")
            };
            md.push_str(&format!(
                "| {} | {} | {} | {} | {:.2}s | {} |\n",
                job.id,
                md_escape(&job.name),
                status,
                job.attempts,
                job.duration().as_secs_f64(),
                artifacts
            ));
        }

        md
    }
}

/// Escape characters that would break a Markdown table cell
fn md_escape(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::execution::{JobResult, MatrixBuilder};
    use std::time::Duration;

    fn make_summary() -> RunSummary {
        let specs = MatrixBuilder::new()
            .axis("os", ["ubuntu", "windows", "macos"])
            .axis("version", ["16.x"])
            .expand()
            .unwrap();

        let mut ok = JobResult::pending(specs[0].clone());
        ok.status = JobStatus::Succeeded;
        ok.attempts = 1;
        ok.duration = Duration::from_millis(150);

        let mut failed = JobResult::pending(specs[1].clone());
        failed.status = JobStatus::Failed;
        failed.attempts = 3;
        failed.duration = Duration::from_millis(300);
        failed.error = Some(JobError::transient("connection | reset"));

        let cancelled = JobResult::cancelled_before_start(specs[2].clone(), "run cancelled");

        RunSummary::new("build", "build-a90bca4", &[ok, failed, cancelled])
    }

    #[test]
    fn test_terminal_output() {
        let terminal = SummaryReporter::to_terminal(&make_summary());

        assert!(terminal.contains("Matrix Run: build (build-a90bca4)"));
        assert!(terminal.contains("[+] SUCCEEDED"));
        assert!(terminal.contains("[x] FAILED"));
        assert!(terminal.contains("[-] CANCELLED"));
        assert!(terminal.contains("#1 windows-16.x [3 attempts]"));
        assert!(terminal.contains("1 succeeded, 1 failed, 1 cancelled of 3 jobs"));
    }

    #[test]
    fn test_terminal_all_succeeded() {
        let specs = MatrixBuilder::new().axis("os", ["a", "b"]).expand().unwrap();
        let results: Vec<_> = specs
            .into_iter()
            .map(|spec| {
                let mut r = JobResult::pending(spec);
                r.status = JobStatus::Succeeded;
                r
            })
            .collect();
        let terminal = SummaryReporter::to_terminal(&RunSummary::new("r", "p", &results));
        assert!(terminal.contains("All 2 jobs succeeded"));
    }

    #[test]
    fn test_json_output() {
        let json = SummaryReporter::to_json(&make_summary());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["name"], "build");
        assert_eq!(value["total"], 3);
        assert_eq!(value["failed"], 1);
        assert_eq!(value["jobs"][0]["status"], "succeeded");
        assert_eq!(value["jobs"][1]["attempts"], 3);
        assert_eq!(value["jobs"][2]["status"], "cancelled");
        assert!(value["jobs"][0].get("error").is_none());
    }

    #[test]
    fn test_markdown_output() {
        let md = SummaryReporter::to_markdown(&make_summary());

        assert!(md.starts_with("## Matrix run `build`"));
        assert!(md.contains("| # | Job | Status |"));
        assert!(md.contains("| 0 | ubuntu-16.x | succeeded | 1 |"));
        assert!(md.contains("connection \\| reset"));
    }

    #[test]
    fn test_report_format_parsing() {
        assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!("MD".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert_eq!(
            "terminal".parse::<ReportFormat>().unwrap(),
            ReportFormat::Terminal
        );
        assert!("xml".parse::<ReportFormat>().is_err());
        assert_eq!(ReportFormat::Markdown.to_string(), "markdown");
    }

    #[test]
    fn test_report_dispatches_correctly() {
        let summary = make_summary();

        assert!(SummaryReporter::report(&summary, ReportFormat::Json).starts_with('{'));
        assert!(SummaryReporter::report(&summary, ReportFormat::Markdown).starts_with("## "));
        assert!(SummaryReporter::report(&summary, ReportFormat::Terminal).contains("Matrix Run:"));
    }
}
