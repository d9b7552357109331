use crate::output;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;

use matrix_service::execution::events::{progress_channel, LogLevel};
use matrix_service::{
    Artifact, ArtifactRegistry, ExecutionEvent, JobExecutor, JobStatus, ReportFormat, ReportWork,
    RunConfig, RunSummary, SummaryReporter,
};

/// How often expired artifacts are evicted while the run is in progress
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run every job of a matrix and collect its artifacts
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the matrix YAML file
    pub config: PathBuf,

    /// Maximum number of jobs running at once (overrides execution.maxParallel)
    #[arg(long, short = 'j', value_name = "N")]
    pub max_parallel: Option<i64>,

    /// Stop starting new jobs after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Simulated build time per job, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 0)]
    pub simulate_ms: u64,

    /// Make a job fail, by its hyphen-joined labels (can be repeated, e.g. windows-18.x)
    #[arg(long = "fail", value_name = "JOB")]
    pub fail: Vec<String>,

    /// Summary format: terminal, json or markdown
    #[arg(long, short = 'f', default_value_t = ReportFormat::Terminal)]
    pub format: ReportFormat,

    /// Write every collected artifact to DIR/<name>.<ext>
    #[arg(long, short = 'o', value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let config_path = &args.config;

    if !config_path.exists() {
        color_eyre::eyre::bail!("Matrix file not found: {}", config_path.display());
    }

    output::status("Loading", &format!("{}", config_path.display()));
    let mut config = RunConfig::from_file(config_path).map_err(|e| eyre!("{}", e))?;

    if let Some(n) = args.max_parallel {
        config.execution.max_parallel = Some(n);
    }
    if args.fail_fast {
        config.execution.fail_fast = true;
    }

    let plan = config
        .plan()
        .map_err(|e| eyre!("Invalid matrix: {}", e))?;

    output::info(&format!(
        "Matrix '{}': {} jobs, {} artifact kinds, prefix '{}'",
        plan.name,
        plan.jobs.len(),
        plan.registry.kinds.len(),
        plan.registry.prefix
    ));

    let registry = Arc::new(ArtifactRegistry::new(plan.registry.clone())?);
    let sweeper = registry.spawn_sweeper(SWEEP_INTERVAL);

    let mut work = ReportWork::new(plan.name.clone(), plan.registry.kinds.clone())
        .with_build_time(Duration::from_millis(args.simulate_ms));
    for job in &args.fail {
        work = work.fail_on(job.clone());
    }

    let (tx, mut rx) = progress_channel();
    let executor = JobExecutor::new(plan.executor.clone())?
        .with_registry(Arc::clone(&registry))
        .with_progress(tx);

    let handle = executor.submit(plan.jobs.clone(), Arc::new(work));
    // The progress channel closes once the run and the executor are gone
    drop(executor);

    let canceller = handle.canceller();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::warning("Interrupted, cancelling run");
            canceller.cancel();
        }
    });

    while let Some(event) = rx.recv().await {
        print_event(&event);
    }

    let results = handle.wait().await;
    ctrl_c.abort();
    sweeper.abort();

    let summary = RunSummary::new(&plan.name, &plan.registry.prefix, &results);
    print!("{}", SummaryReporter::report(&summary, args.format));

    if let Some(dir) = &args.output_dir {
        let artifacts = registry.list_by_prefix(&plan.registry.prefix).await;
        export_artifacts(dir, &artifacts).await?;
        output::status(
            "Exported",
            &format!("{} artifact(s) to {}", artifacts.len(), dir.display()),
        );
    }

    let archived = registry.archive().await;
    tracing::debug!(artifacts = archived.len(), "registry archived");

    if !summary.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted {
            total_jobs,
            max_parallel,
        } => {
            println!();
            output::header(&format!(
                "Running {} jobs ({} at a time)",
                total_jobs, max_parallel
            ));
        }

        ExecutionEvent::JobStarted {
            job_id,
            job_name,
            attempt,
        } => {
            let detail = if *attempt > 1 {
                format!("#{} attempt {}", job_id, attempt)
            } else {
                format!("#{}", job_id)
            };
            output::job_line("\x1b[36m>\x1b[0m", job_name, &detail);
        }

        ExecutionEvent::JobRetrying {
            job_name,
            attempt,
            delay,
            error,
            ..
        } => {
            output::warning(&format!(
                "  {} attempt {} failed ({}), retrying in {:.1}s",
                job_name,
                attempt,
                error,
                delay.as_secs_f64()
            ));
        }

        ExecutionEvent::JobCompleted {
            job_name,
            status,
            duration,
            error,
            ..
        } => {
            let (symbol, color_fn): (&str, fn(&str)) = if *status == JobStatus::Succeeded {
                ("\x1b[32m\u{2713}\x1b[0m", output::dim_success)
            } else {
                ("\x1b[31m\u{2717}\x1b[0m", output::dim_failure)
            };
            output::job_line(
                symbol,
                job_name,
                &format!("{} ({:.2}s)", status, duration.as_secs_f64()),
            );
            if let Some(error) = error {
                color_fn(&format!("        {}", error));
            }
        }

        ExecutionEvent::JobCancelled {
            job_name, reason, ..
        } => {
            output::job_line("\x1b[33m-\x1b[0m", job_name, &format!("cancelled: {}", reason));
        }

        ExecutionEvent::ArtifactRegistered { name, bytes, .. } => {
            output::dim(&format!("        + {} ({} bytes)", name, bytes));
        }

        ExecutionEvent::RunCompleted {
            succeeded,
            failed,
            cancelled,
            duration,
        } => {
            println!();
            if *failed == 0 && *cancelled == 0 {
                output::success(&format!(
                    "{} jobs succeeded in {:.2}s",
                    succeeded,
                    duration.as_secs_f64()
                ));
            } else {
                output::failure(&format!(
                    "{} succeeded, {} failed, {} cancelled after {:.2}s",
                    succeeded,
                    failed,
                    cancelled,
                    duration.as_secs_f64()
                ));
            }
        }

        ExecutionEvent::Log {
            level, message, ..
        } => match level {
            LogLevel::Debug => output::dim(message),
            LogLevel::Info => output::info(message),
            LogLevel::Warning => output::warning(message),
            LogLevel::Error => output::error(message),
        },
    }
}

async fn export_artifacts(dir: &Path, artifacts: &[Artifact]) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .wrap_err_with(|| format!("Failed to create {}", dir.display()))?;

    for artifact in artifacts {
        let path = dir.join(format!("{}.{}", artifact.name, artifact.kind.extension()));
        tokio::fs::write(&path, &artifact.content)
            .await
            .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}
