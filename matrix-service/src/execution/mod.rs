// Execution Engine Module
// Matrix expansion, bounded parallel execution, retries and progress events

pub mod context;
pub mod events;
pub mod executor;
pub mod matrix;
pub mod models;
pub mod retry;

// Re-export key types
pub use context::{CancelSignal, JobContext};
pub use events::{ExecutionEvent, ProgressSender};
pub use executor::{ExecutorConfig, JobExecutor, RunHandle};
pub use matrix::{Axis, AxisValue, JobSpec, MatrixBuilder, MatrixExpander};
pub use models::{JobResult, JobStatus};
pub use retry::RetryPolicy;
