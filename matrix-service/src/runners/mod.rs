// Runners Module
// Work functions executed once per job specification

pub mod report;

// Re-export key types
pub use report::ReportWork;

use crate::artifacts::ArtifactOutput;
use crate::error::JobError;
use crate::execution::context::JobContext;
use crate::execution::matrix::JobSpec;

use std::future::Future;

/// The unit of work run for every job in the matrix.
///
/// Returns the artifacts the job produced, or the reason it failed.
/// Implementations should watch `ctx.cancelled()` during long waits.
#[async_trait::async_trait]
pub trait JobWork: Send + Sync + 'static {
    async fn run(&self, spec: &JobSpec, ctx: JobContext)
        -> Result<Vec<ArtifactOutput>, JobError>;
}

/// Adapter turning an async closure into a [`JobWork`]
pub struct FnWork<F> {
    f: F,
}

/// Wrap an async closure as a work function
pub fn work_fn<F, Fut>(f: F) -> FnWork<F>
where
    F: Fn(JobSpec, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<ArtifactOutput>, JobError>> + Send + 'static,
{
    FnWork { f }
}

#[async_trait::async_trait]
impl<F, Fut> JobWork for FnWork<F>
where
    F: Fn(JobSpec, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<ArtifactOutput>, JobError>> + Send + 'static,
{
    async fn run(
        &self,
        spec: &JobSpec,
        ctx: JobContext,
    ) -> Result<Vec<ArtifactOutput>, JobError> {
        (self.f)(spec.clone(), ctx).await
    }
}
