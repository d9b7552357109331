use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use matrix_service::{MatrixExpander, RunConfig};

/// Validate a matrix configuration file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the matrix YAML file
    pub config: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let config_path = &args.config;

    if !config_path.exists() {
        color_eyre::eyre::bail!("Matrix file not found: {}", config_path.display());
    }

    output::status("Validating", &format!("{}", config_path.display()));

    let config = match RunConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };
    output::check("YAML syntax valid");

    let (axes, job_count) = match config.axes().and_then(|axes| {
        MatrixExpander::validate(&axes)?;
        let job_count = MatrixExpander::job_count(&axes)?;
        Ok((axes, job_count))
    }) {
        Ok(counted) => counted,
        Err(e) => {
            output::error(&format!("Matrix: {}", e));
            std::process::exit(1);
        }
    };
    output::check(&format!(
        "Matrix: {} axes, {} jobs",
        axes.len(),
        job_count
    ));

    match config.registry_config() {
        Ok(registry) => output::check(&format!(
            "Artifacts: prefix '{}', kinds [{}], retained {} days",
            registry.prefix,
            registry
                .kinds
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            config.artifacts.retention_in_days
        )),
        Err(e) => {
            output::error(&format!("Artifacts: {}", e));
            std::process::exit(1);
        }
    }

    match config.executor_config(job_count) {
        Ok(executor) => {
            let mut detail = format!("Execution: maxParallel {}", executor.max_parallel);
            if executor.fail_fast {
                detail.push_str(", fail-fast");
            }
            if executor.retry.max_retries > 0 {
                detail.push_str(&format!(", {} retries", executor.retry.max_retries));
            }
            output::check(&detail);
        }
        Err(e) => {
            output::error(&format!("Execution: {}", e));
            std::process::exit(1);
        }
    }

    output::success(&format!("'{}' is valid", config.name));
    Ok(())
}
