// Job Executor
// Runs matrix jobs on a bounded worker pool with retries, deadlines and cancellation

use crate::artifacts::{Artifact, ArtifactOutput, ArtifactRegistry};
use crate::error::{ConfigurationError, JobError};
use crate::execution::context::{CancelSignal, JobContext};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::matrix::JobSpec;
use crate::execution::models::{JobResult, JobStatus};
use crate::execution::retry::RetryPolicy;
use crate::runners::JobWork;

use chrono::Utc;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_stream::Stream;
use tracing::Instrument;

/// How long a job may keep running after it has been told to stop
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

const CANCELLED_BY_CALLER: &str = "run cancelled";
const CANCELLED_BY_DEADLINE: &str = "run deadline exceeded";
const CANCELLED_BY_FAIL_FAST: &str = "fail-fast: a sibling job failed";

/// Configuration for matrix execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum jobs running at once (must be >= 1)
    pub max_parallel: usize,
    /// Stop starting queued jobs after the first failure
    pub fail_fast: bool,
    /// Deadline for each job attempt
    pub job_timeout: Option<Duration>,
    /// Deadline for the whole run
    pub run_timeout: Option<Duration>,
    /// Grace period between the cancellation signal and aborting the job
    pub cancel_grace: Duration,
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            fail_fast: false,
            job_timeout: None,
            run_timeout: None,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            retry: RetryPolicy::none(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_parallel == 0 || self.max_parallel > Semaphore::MAX_PERMITS {
            return Err(ConfigurationError::InvalidParallelism(
                i64::try_from(self.max_parallel).unwrap_or(i64::MAX),
            ));
        }
        self.retry.validate()
    }
}

/// Matrix job executor
pub struct JobExecutor {
    config: ExecutorConfig,
    registry: Option<Arc<ArtifactRegistry>>,
    event_tx: Option<ProgressSender>,
}

impl JobExecutor {
    /// Create an executor, rejecting invalid configuration up front
    pub fn new(config: ExecutorConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            config,
            registry: None,
            event_tx: None,
        })
    }

    /// Register job outputs in this registry.
    ///
    /// Without a registry, outputs returned by work functions are dropped.
    pub fn with_registry(mut self, registry: Arc<ArtifactRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Start running `specs`.
    ///
    /// Must be called within a tokio runtime. Results stream out of the
    /// returned handle in completion order.
    pub fn submit(&self, specs: Vec<JobSpec>, work: Arc<dyn JobWork>) -> RunHandle {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let cancel = CancelSignal::new();
        let state = Arc::new(Mutex::new(
            specs.iter().cloned().map(JobResult::pending).collect::<Vec<_>>(),
        ));

        let run = Arc::new(Run {
            config: self.config.clone(),
            registry: self.registry.clone(),
            event_tx: self.event_tx.clone(),
            work,
            cancel: cancel.clone(),
            deadline_hit: CancelSignal::new(),
            halt: CancelSignal::new(),
            state: Arc::clone(&state),
            results: results_tx,
        });

        let driver = tokio::spawn(run.drive(specs));

        RunHandle {
            results: results_rx,
            state,
            cancel,
            driver,
        }
    }

    /// Run `specs` to completion and return the final results in spec order
    pub async fn run(&self, specs: Vec<JobSpec>, work: Arc<dyn JobWork>) -> Vec<JobResult> {
        self.submit(specs, work).wait().await
    }
}

/// Handle to a running matrix.
///
/// As a [`Stream`] it yields each [`JobResult`] when the job reaches a
/// terminal state, in completion order. Correlate results by `spec`, not
/// by position.
pub struct RunHandle {
    results: mpsc::UnboundedReceiver<JobResult>,
    state: Arc<Mutex<Vec<JobResult>>>,
    cancel: CancelSignal,
    driver: JoinHandle<()>,
}

impl RunHandle {
    /// Cancel the run: queued jobs are cancelled, running jobs are signalled
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A clone of the run's cancellation signal, for cancelling from elsewhere
    pub fn canceller(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Next completed job, or `None` once every job is terminal
    pub async fn next_result(&mut self) -> Option<JobResult> {
        self.results.recv().await
    }

    /// Current state of every job, including pending and running ones
    pub async fn snapshot(&self) -> Vec<JobResult> {
        self.state.lock().await.clone()
    }

    /// Wait for the run to finish; results are ordered by job spec id
    pub async fn wait(self) -> Vec<JobResult> {
        let RunHandle {
            mut results,
            state,
            driver,
            ..
        } = self;

        while results.recv().await.is_some() {}
        let driver_error = driver.await.err();

        let mut finished = state.lock().await.clone();
        if let Some(e) = driver_error {
            tracing::error!(error = %e, "matrix run driver failed");
            fail_unfinished(&mut finished, &format!("executor failed: {e}"));
        }
        finished.sort_by_key(|r| r.spec.id);
        finished
    }
}

impl Stream for RunHandle {
    type Item = JobResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.results.poll_recv(cx)
    }
}

enum Interrupt {
    Timeout(Duration),
    Cancelled,
}

/// Shared state of one run, owned by the driver and its job tasks
struct Run {
    config: ExecutorConfig,
    registry: Option<Arc<ArtifactRegistry>>,
    event_tx: Option<ProgressSender>,
    work: Arc<dyn JobWork>,
    /// Caller cancellation or run deadline
    cancel: CancelSignal,
    /// Set when the run deadline fired
    deadline_hit: CancelSignal,
    /// Fail-fast: stop dispatching, leave running jobs alone
    halt: CancelSignal,
    state: Arc<Mutex<Vec<JobResult>>>,
    results: mpsc::UnboundedSender<JobResult>,
}

impl Run {
    async fn drive(self: Arc<Self>, specs: Vec<JobSpec>) {
        let start = Instant::now();
        let total_jobs = specs.len();

        tracing::info!(
            total_jobs,
            max_parallel = self.config.max_parallel,
            fail_fast = self.config.fail_fast,
            "starting matrix run"
        );
        self.event_tx.send_event(ExecutionEvent::RunStarted {
            total_jobs,
            max_parallel: self.config.max_parallel,
        });

        let deadline_watch = self.config.run_timeout.map(|timeout| {
            let run = Arc::clone(&self);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!(?timeout, "run deadline exceeded, cancelling remaining jobs");
                run.event_tx.send_event(ExecutionEvent::warning(
                    format!("run deadline of {timeout:?} exceeded, cancelling remaining jobs"),
                    None,
                ));
                run.deadline_hit.cancel();
                run.cancel.cancel();
            })
        });

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let mut jobs = JoinSet::new();
        let mut queue = specs.into_iter().enumerate();
        let mut undispatched = Vec::new();

        while let Some((slot, spec)) = queue.next() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                _ = self.halt.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                undispatched.push((slot, spec));
                break;
            };

            let span = tracing::info_span!("job", id = spec.id, name = %spec.name());
            let run = Arc::clone(&self);
            jobs.spawn(
                async move {
                    let _permit = permit;
                    run.run_job(slot, spec).await;
                }
                .instrument(span),
            );
        }
        undispatched.extend(queue);

        if !undispatched.is_empty() {
            let reason = self.stop_reason();
            tracing::info!(
                cancelled = undispatched.len(),
                reason,
                "cancelling queued jobs"
            );
            for (slot, spec) in undispatched {
                self.event_tx
                    .send_event(ExecutionEvent::job_cancelled(spec.id, spec.name(), reason));
                self.finish(slot, JobResult::cancelled_before_start(spec, reason))
                    .await;
            }
        }

        while let Some(joined) = jobs.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "job task failed");
                self.event_tx
                    .send_event(ExecutionEvent::error(format!("job task failed: {e}"), None));
            }
        }

        if let Some(watch) = deadline_watch {
            watch.abort();
        }

        let (succeeded, failed, cancelled) = {
            let state = self.state.lock().await;
            let count = |status: JobStatus| state.iter().filter(|r| r.status == status).count();
            (
                count(JobStatus::Succeeded),
                count(JobStatus::Failed),
                count(JobStatus::Cancelled),
            )
        };
        let duration = start.elapsed();

        tracing::info!(
            succeeded,
            failed,
            cancelled,
            duration_ms = duration.as_millis() as u64,
            "matrix run completed"
        );
        self.event_tx.send_event(ExecutionEvent::RunCompleted {
            succeeded,
            failed,
            cancelled,
            duration,
        });
    }

    /// Reason queued jobs are being cancelled
    fn stop_reason(&self) -> &'static str {
        if self.deadline_hit.is_cancelled() {
            CANCELLED_BY_DEADLINE
        } else if self.cancel.is_cancelled() {
            CANCELLED_BY_CALLER
        } else {
            CANCELLED_BY_FAIL_FAST
        }
    }

    async fn run_job(self: Arc<Self>, slot: usize, spec: JobSpec) {
        let job_name = spec.name();

        // Cancelled between dispatch and start
        if self.cancel.is_cancelled() {
            let reason = self.stop_reason();
            self.event_tx
                .send_event(ExecutionEvent::job_cancelled(spec.id, &job_name, reason));
            self.finish(slot, JobResult::cancelled_before_start(spec, reason))
                .await;
            return;
        }

        let start = Instant::now();
        let started_at = Utc::now();
        {
            let mut state = self.state.lock().await;
            state[slot].status = JobStatus::Running;
            state[slot].started_at = Some(started_at);
        }

        let mut attempt = 0;
        let mut registered = Vec::new();
        let outcome = loop {
            attempt += 1;
            tracing::debug!(attempt, "starting job attempt");
            self.state.lock().await[slot].attempts = attempt;
            self.event_tx.send_event(ExecutionEvent::JobStarted {
                job_id: spec.id,
                job_name: job_name.clone(),
                attempt,
            });

            let result = match self.run_attempt(&spec, attempt).await {
                Ok(outputs) => self.register_outputs(&spec, outputs, &mut registered).await,
                Err(e) => Err(e),
            };

            match result {
                Err(err)
                    if err.is_transient()
                        && self.config.retry.allows_retry(attempt)
                        && !self.cancel.is_cancelled() =>
                {
                    let delay = self.config.retry.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        max_retries = self.config.retry.max_retries,
                        ?delay,
                        error = %err,
                        "job attempt failed, retrying"
                    );
                    self.event_tx.send_event(ExecutionEvent::JobRetrying {
                        job_id: spec.id,
                        job_name: job_name.clone(),
                        attempt,
                        delay,
                        error: err.to_string(),
                    });

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            break Err(JobError::Cancelled(self.stop_reason().to_string()));
                        }
                    }
                }
                other => break other,
            }
        };

        let duration = start.elapsed();
        let (status, error) = match outcome {
            Ok(()) => (JobStatus::Succeeded, None),
            Err(e @ JobError::Cancelled(_)) => (JobStatus::Cancelled, Some(e)),
            Err(e) => (JobStatus::Failed, Some(e)),
        };

        match status {
            JobStatus::Cancelled => {
                let reason = error.as_ref().map(|e| e.to_string()).unwrap_or_default();
                tracing::info!(attempt, %reason, "job cancelled");
                self.event_tx
                    .send_event(ExecutionEvent::job_cancelled(spec.id, &job_name, reason));
            }
            _ => {
                if let Some(err) = &error {
                    tracing::warn!(attempt, error = %err, "job failed");
                } else {
                    tracing::info!(
                        attempt,
                        artifacts = registered.len(),
                        duration_ms = duration.as_millis() as u64,
                        "job succeeded"
                    );
                }
                self.event_tx.send_event(ExecutionEvent::job_completed(
                    spec.id,
                    &job_name,
                    status,
                    duration,
                    error.as_ref().map(|e| e.to_string()),
                ));
            }
        }

        if status == JobStatus::Failed && self.config.fail_fast && !self.halt.is_cancelled() {
            tracing::info!("fail-fast enabled, no further jobs will start");
            self.event_tx.send_event(ExecutionEvent::warning(
                format!("{} failed, fail-fast: no further jobs will start", job_name),
                Some(spec.id),
            ));
            self.halt.cancel();
        }

        let result = JobResult {
            spec,
            status,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
            duration,
            attempts: attempt,
            artifacts: registered,
            error,
        };
        self.finish(slot, result).await;
    }

    /// Run one attempt of the work function under the job deadline
    async fn run_attempt(
        &self,
        spec: &JobSpec,
        attempt: u32,
    ) -> Result<Vec<ArtifactOutput>, JobError> {
        let job_cancel = CancelSignal::new();
        let ctx = JobContext::new(attempt, self.cancel.clone(), job_cancel.clone());
        let work = Arc::clone(&self.work);
        let owned = spec.clone();

        // Separate task so a panicking work function only takes down itself
        let mut handle =
            tokio::spawn(async move { work.run(&owned, ctx).await }.in_current_span());

        let interrupt = tokio::select! {
            joined = &mut handle => return Self::joined(joined),
            timeout = sleep_for(self.config.job_timeout) => Interrupt::Timeout(timeout),
            _ = self.cancel.cancelled() => Interrupt::Cancelled,
        };

        match interrupt {
            Interrupt::Timeout(timeout) => {
                tracing::warn!(?timeout, "job exceeded its deadline");
                job_cancel.cancel();
                if tokio::time::timeout(self.config.cancel_grace, &mut handle)
                    .await
                    .is_err()
                {
                    handle.abort();
                }
                Err(JobError::Timeout(timeout))
            }
            Interrupt::Cancelled => {
                // The work sees the run signal through its context
                match tokio::time::timeout(self.config.cancel_grace, &mut handle).await {
                    Ok(joined) => Self::joined(joined),
                    Err(_) => {
                        tracing::debug!("job ignored cancellation, aborting");
                        handle.abort();
                        Err(JobError::Cancelled(self.stop_reason().to_string()))
                    }
                }
            }
        }
    }

    fn joined(
        joined: Result<Result<Vec<ArtifactOutput>, JobError>, JoinError>,
    ) -> Result<Vec<ArtifactOutput>, JobError> {
        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(JobError::Panicked(message))
            }
            Err(_) => Err(JobError::Cancelled("work task aborted".to_string())),
        }
    }

    async fn register_outputs(
        &self,
        spec: &JobSpec,
        outputs: Vec<ArtifactOutput>,
        registered: &mut Vec<Artifact>,
    ) -> Result<(), JobError> {
        let Some(registry) = &self.registry else {
            if !outputs.is_empty() {
                tracing::debug!(
                    discarded = outputs.len(),
                    "no artifact registry attached, discarding job outputs"
                );
                self.event_tx.send_event(ExecutionEvent::info(
                    format!(
                        "no artifact registry attached, discarded {} output(s)",
                        outputs.len()
                    ),
                    Some(spec.id),
                ));
            }
            return Ok(());
        };

        for output in outputs {
            let artifact = registry.register(spec, &output.kind, output.content).await?;
            self.event_tx.send_event(ExecutionEvent::ArtifactRegistered {
                job_id: spec.id,
                name: artifact.name.clone(),
                bytes: artifact.size(),
            });
            if !registered.iter().any(|a: &Artifact| a.name == artifact.name) {
                registered.push(artifact);
            }
        }
        Ok(())
    }

    /// Record a terminal result and publish it
    async fn finish(&self, slot: usize, result: JobResult) {
        self.state.lock().await[slot] = result.clone();
        let _ = self.results.send(result);
    }
}

/// Give every job the driver never finished a terminal `Failed` status
fn fail_unfinished(results: &mut [JobResult], reason: &str) {
    for result in results.iter_mut().filter(|r| !r.status.is_terminal()) {
        result.status = JobStatus::Failed;
        result.finished_at = Some(Utc::now());
        result.error = Some(JobError::failed(reason));
    }
}

/// Sleep for `duration`, or forever when there is none; yields the duration
async fn sleep_for(duration: Option<Duration>) -> Duration {
    match duration {
        Some(duration) => {
            tokio::time::sleep(duration).await;
            duration
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactKind, RegistryConfig};
    use crate::execution::events::{progress_channel, LogLevel};
    use crate::execution::matrix::MatrixBuilder;
    use crate::runners::work_fn;

    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tokio_stream::StreamExt;

    fn nine_jobs() -> Vec<JobSpec> {
        MatrixBuilder::new()
            .axis("os", ["ubuntu", "windows", "macos"])
            .axis("version", ["16.x", "18.x", "20.x"])
            .expand()
            .unwrap()
    }

    fn executor(config: ExecutorConfig) -> JobExecutor {
        JobExecutor::new(config).unwrap()
    }

    fn sleeping_work(duration: Duration) -> Arc<dyn JobWork> {
        Arc::new(work_fn(move |_spec: JobSpec, ctx: JobContext| async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => Ok(Vec::new()),
                _ = ctx.cancelled() => Err(JobError::Cancelled("interrupted".to_string())),
            }
        }))
    }

    #[test]
    fn test_rejects_zero_parallelism() {
        let err = JobExecutor::new(ExecutorConfig::default().with_max_parallel(0)).err();
        assert_eq!(err, Some(ConfigurationError::InvalidParallelism(0)));
    }

    #[test]
    fn test_rejects_parallelism_beyond_semaphore_capacity() {
        let too_many = Semaphore::MAX_PERMITS + 1;
        let err = JobExecutor::new(ExecutorConfig::default().with_max_parallel(too_many)).err();
        assert_eq!(
            err,
            Some(ConfigurationError::InvalidParallelism(too_many as i64))
        );

        let at_limit = ExecutorConfig::default().with_max_parallel(Semaphore::MAX_PERMITS);
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_unfinished_jobs_fail_when_the_driver_dies() {
        let specs = nine_jobs();
        let mut results: Vec<_> = specs.iter().cloned().map(JobResult::pending).collect();
        results[0].status = JobStatus::Succeeded;
        results[1].status = JobStatus::Running;

        fail_unfinished(&mut results, "executor failed: boom");

        assert_eq!(results[0].status, JobStatus::Succeeded);
        assert!(results[0].error.is_none());
        assert!(results[1..].iter().all(|r| r.status == JobStatus::Failed));
        assert_eq!(
            results[1].error,
            Some(JobError::failed("executor failed: boom"))
        );
        assert!(results.iter().all(|r| r.status.is_terminal()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_max_parallel() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let work = {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            work_fn(move |_spec: JobSpec, _ctx: JobContext| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(Vec::new())
                }
            })
        };

        let results = executor(ExecutorConfig::default().with_max_parallel(3))
            .run(nine_jobs(), Arc::new(work))
            .await;

        assert_eq!(results.len(), 9);
        assert!(results.iter().all(JobResult::is_success));
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_parallelism_wall_clock() {
        let duration = Duration::from_secs(10);
        let start = Instant::now();

        let results = executor(ExecutorConfig::default().with_max_parallel(2))
            .run(nine_jobs(), sleeping_work(duration))
            .await;

        let elapsed = start.elapsed();
        assert!(results.iter().all(JobResult::is_success));
        // ceil(9 / 2) = 5 waves
        assert!(elapsed >= duration * 5, "elapsed {elapsed:?}");
        assert!(elapsed < duration * 6, "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let work = work_fn(|spec: JobSpec, _ctx: JobContext| async move {
            if spec.name() == "windows-18.x" {
                Err(JobError::failed("compiler exploded"))
            } else {
                Ok(Vec::new())
            }
        });

        let results = executor(ExecutorConfig::default().with_max_parallel(4))
            .run(nine_jobs(), Arc::new(work))
            .await;

        for result in &results {
            if result.spec.name() == "windows-18.x" {
                assert_eq!(result.status, JobStatus::Failed);
                assert_eq!(result.error, Some(JobError::failed("compiler exploded")));
            } else {
                assert_eq!(result.status, JobStatus::Succeeded, "{}", result.spec);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_cancels_only_queued_jobs() {
        let work = work_fn(|spec: JobSpec, _ctx: JobContext| async move {
            if spec.id == 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Err(JobError::failed("boom"))
            } else {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Vec::new())
            }
        });

        let config = ExecutorConfig::default()
            .with_max_parallel(2)
            .with_fail_fast(true);
        let results = executor(config).run(nine_jobs(), Arc::new(work)).await;

        assert_eq!(results[0].status, JobStatus::Failed);
        // Job 1 was already running and finishes normally
        assert_eq!(results[1].status, JobStatus::Succeeded);
        for result in &results[2..] {
            assert_eq!(result.status, JobStatus::Cancelled);
            assert_eq!(result.attempts, 0);
            assert_eq!(
                result.error,
                Some(JobError::Cancelled(CANCELLED_BY_FAIL_FAST.to_string()))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_stream_in_completion_order() {
        let work = work_fn(|spec: JobSpec, _ctx: JobContext| async move {
            // Later specs finish first
            tokio::time::sleep(Duration::from_secs(10 - spec.id as u64)).await;
            Ok(Vec::new())
        });

        let mut handle = executor(ExecutorConfig::default().with_max_parallel(9))
            .submit(nine_jobs(), Arc::new(work));

        let mut order = Vec::new();
        while let Some(result) = handle.next().await {
            order.push(result.spec.id);
        }
        assert_eq!(order, vec![8, 7, 6, 5, 4, 3, 2, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout_marks_failed() {
        let config = ExecutorConfig::default()
            .with_max_parallel(9)
            .with_job_timeout(Duration::from_secs(2))
            .with_cancel_grace(Duration::from_millis(100));

        let work = work_fn(|spec: JobSpec, _ctx: JobContext| async move {
            // Ignores cancellation entirely
            let secs = if spec.id == 4 { 60 } else { 1 };
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok(Vec::new())
        });

        let results = executor(config).run(nine_jobs(), Arc::new(work)).await;

        assert_eq!(results[4].status, JobStatus::Failed);
        assert_eq!(
            results[4].error,
            Some(JobError::Timeout(Duration::from_secs(2)))
        );
        assert!(results[4].error.as_ref().unwrap().is_timeout());
        assert_eq!(
            results.iter().filter(|r| r.is_success()).count(),
            8
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_cancels_queued_and_running_jobs() {
        let config = ExecutorConfig::default()
            .with_max_parallel(2)
            .with_run_timeout(Duration::from_secs(25));

        let results = executor(config)
            .run(nine_jobs(), sleeping_work(Duration::from_secs(10)))
            .await;

        // Waves finish at 10s and 20s; the third wave is interrupted at 25s
        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(&statuses[..4], &[JobStatus::Succeeded; 4]);
        assert_eq!(&statuses[4..6], &[JobStatus::Cancelled; 2]);
        for result in &results[6..] {
            assert_eq!(result.status, JobStatus::Cancelled);
            assert_eq!(result.attempts, 0);
            assert_eq!(
                result.error,
                Some(JobError::Cancelled(CANCELLED_BY_DEADLINE.to_string()))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation() {
        let mut handle = executor(ExecutorConfig::default().with_max_parallel(3))
            .submit(nine_jobs(), sleeping_work(Duration::from_secs(10)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let running = handle
            .snapshot()
            .await
            .iter()
            .filter(|r| r.status == JobStatus::Running)
            .count();
        assert_eq!(running, 3);

        handle.cancel();
        let mut seen = 0;
        while let Some(result) = handle.next_result().await {
            assert_eq!(result.status, JobStatus::Cancelled);
            seen += 1;
        }
        assert_eq!(seen, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncooperative_job_is_aborted_after_grace() {
        let config = ExecutorConfig::default()
            .with_max_parallel(1)
            .with_cancel_grace(Duration::from_secs(1));
        let work = work_fn(|_spec: JobSpec, _ctx: JobContext| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        });

        let handle = executor(config).submit(nine_jobs(), Arc::new(work));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let cancelled_at = Instant::now();
        handle.cancel();

        let results = handle.wait().await;
        assert!(cancelled_at.elapsed() <= Duration::from_secs(2));
        assert!(results.iter().all(|r| r.status == JobStatus::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let work = {
            let calls = Arc::clone(&calls);
            work_fn(move |_spec: JobSpec, ctx: JobContext| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if ctx.attempt < 3 {
                        Err(JobError::transient("runner went away"))
                    } else {
                        Ok(Vec::new())
                    }
                }
            })
        };

        let specs = MatrixBuilder::new().axis("os", ["ubuntu"]).expand().unwrap();
        let config = ExecutorConfig::default().with_retry(RetryPolicy::with_retries(3));
        let results = executor(config).run(specs, Arc::new(work)).await;

        assert_eq!(results[0].status, JobStatus::Succeeded);
        assert_eq!(results[0].attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let work = work_fn(|_spec: JobSpec, _ctx: JobContext| async move {
            Err::<Vec<ArtifactOutput>, _>(JobError::transient("still flaky"))
        });

        let specs = MatrixBuilder::new().axis("os", ["ubuntu"]).expand().unwrap();
        let config = ExecutorConfig::default().with_retry(RetryPolicy::with_retries(2));
        let results = executor(config).run(specs, Arc::new(work)).await;

        assert_eq!(results[0].status, JobStatus::Failed);
        assert_eq!(results[0].attempts, 3);
        assert_eq!(results[0].error, Some(JobError::transient("still flaky")));
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let work = work_fn(|_spec: JobSpec, _ctx: JobContext| async move {
            Err::<Vec<ArtifactOutput>, _>(JobError::failed("bad config"))
        });

        let specs = MatrixBuilder::new().axis("os", ["ubuntu"]).expand().unwrap();
        let config = ExecutorConfig::default().with_retry(RetryPolicy::with_retries(5));
        let results = executor(config).run(specs, Arc::new(work)).await;

        assert_eq!(results[0].attempts, 1);
        assert_eq!(results[0].status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_panicking_work_is_isolated() {
        let work = work_fn(|spec: JobSpec, _ctx: JobContext| async move {
            if spec.id == 2 {
                panic!("work function bug");
            }
            Ok(Vec::new())
        });

        let results = executor(ExecutorConfig::default().with_max_parallel(3))
            .run(nine_jobs(), Arc::new(work))
            .await;

        assert_eq!(
            results[2].error,
            Some(JobError::Panicked("work function bug".to_string()))
        );
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 8);
    }

    #[tokio::test]
    async fn test_outputs_are_registered() {
        let registry = Arc::new(
            ArtifactRegistry::new(RegistryConfig::new("build-a90bca4")).unwrap(),
        );
        let work = work_fn(|spec: JobSpec, _ctx: JobContext| async move {
            Ok(vec![
                ArtifactOutput::text(spec.name()),
                ArtifactOutput::markdown(format!("# {}", spec.name())),
            ])
        });

        let results = executor(ExecutorConfig::default())
            .with_registry(Arc::clone(&registry))
            .run(nine_jobs(), Arc::new(work))
            .await;

        assert_eq!(
            results[0].artifact_names(),
            vec!["build-a90bca4-ubuntu-16.x-text", "build-a90bca4-ubuntu-16.x-md"]
        );
        assert_eq!(registry.stats().await.artifacts, 18);
    }

    #[tokio::test]
    async fn test_registry_error_fails_only_that_job() {
        let registry = Arc::new(
            ArtifactRegistry::new(
                RegistryConfig::new("build").with_kinds(vec![ArtifactKind::text()]),
            )
            .unwrap(),
        );
        let work = work_fn(|spec: JobSpec, _ctx: JobContext| async move {
            if spec.id == 5 {
                Ok(vec![ArtifactOutput::json(&serde_json::json!({}))])
            } else {
                Ok(vec![ArtifactOutput::text("ok")])
            }
        });

        let results = executor(ExecutorConfig::default())
            .with_registry(registry)
            .run(nine_jobs(), Arc::new(work))
            .await;

        assert_eq!(results[5].status, JobStatus::Failed);
        assert!(matches!(results[5].error, Some(JobError::Artifact(_))));
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 8);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let (tx, mut rx) = progress_channel();
        let specs = MatrixBuilder::new()
            .axis("os", ["ubuntu", "macos"])
            .expand()
            .unwrap();

        executor(ExecutorConfig::default())
            .with_progress(tx)
            .run(specs, sleeping_work(Duration::from_millis(1)))
            .await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert!(matches!(
            events.first(),
            Some(ExecutionEvent::RunStarted { total_jobs: 2, .. })
        ));
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::RunCompleted {
                succeeded: 2,
                failed: 0,
                cancelled: 0,
                ..
            })
        ));
        let completed = events
            .iter()
            .filter(|e| matches!(e, ExecutionEvent::JobCompleted { .. }))
            .count();
        assert_eq!(completed, 2);
    }

    #[tokio::test]
    async fn test_log_events_for_fail_fast_and_discarded_outputs() {
        let (tx, mut rx) = progress_channel();
        let specs = MatrixBuilder::new()
            .axis("os", ["ubuntu", "windows", "macos"])
            .expand()
            .unwrap();

        let work = work_fn(|spec: JobSpec, _ctx: JobContext| async move {
            if spec.name() == "ubuntu" {
                Ok(vec![ArtifactOutput::text("report")])
            } else {
                Err(JobError::failed("broken"))
            }
        });

        executor(
            ExecutorConfig::default()
                .with_max_parallel(1)
                .with_fail_fast(true),
        )
        .with_progress(tx)
        .run(specs, Arc::new(work))
        .await;

        let mut logs = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::Log {
                level,
                message,
                job_id,
            } = event
            {
                logs.push((level, message, job_id));
            }
        }

        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].0, LogLevel::Info);
        assert!(logs[0].1.contains("discarded 1 output"));
        assert_eq!(logs[0].2, Some(0));
        assert_eq!(logs[1].0, LogLevel::Warning);
        assert!(logs[1].1.contains("windows failed, fail-fast"));
        assert_eq!(logs[1].2, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_event_for_run_deadline() {
        let (tx, mut rx) = progress_channel();

        executor(
            ExecutorConfig::default()
                .with_max_parallel(1)
                .with_run_timeout(Duration::from_secs(5)),
        )
        .with_progress(tx)
        .run(nine_jobs(), sleeping_work(Duration::from_secs(10)))
        .await;

        let mut warned = false;
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::Log {
                level: LogLevel::Warning,
                message,
                job_id: None,
            } = event
            {
                warned |= message.contains("run deadline");
            }
        }
        assert!(warned);
    }

    #[tokio::test]
    async fn test_empty_submission_completes() {
        let results = executor(ExecutorConfig::default())
            .run(Vec::new(), sleeping_work(Duration::from_millis(1)))
            .await;
        assert!(results.is_empty());
    }
}
