// Reporting Module
// Run summaries and their rendered formats

pub mod reporter;
pub mod summary;

// Re-export key types
pub use reporter::{ReportFormat, SummaryReporter};
pub use summary::{JobSummary, RunSummary};
