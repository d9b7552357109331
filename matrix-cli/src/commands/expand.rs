use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use matrix_service::artifacts::artifact_name;
use matrix_service::RunConfig;

/// Print the job specifications and artifact names of a matrix
#[derive(Args, Debug)]
pub struct ExpandArgs {
    /// Path to the matrix YAML file
    pub config: PathBuf,

    /// Print job names only, one per line
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

pub fn execute(args: ExpandArgs) -> Result<()> {
    let config = RunConfig::from_file(&args.config)
        .map_err(|e| color_eyre::eyre::eyre!("{}", e))?;
    let plan = config
        .plan()
        .map_err(|e| color_eyre::eyre::eyre!("Invalid matrix: {}", e))?;

    if args.quiet {
        for job in &plan.jobs {
            println!("{}", job.name());
        }
        return Ok(());
    }

    output::header(&format!(
        "Matrix '{}': {} jobs across {} axes",
        plan.name,
        plan.jobs.len(),
        plan.axes.len()
    ));

    for job in &plan.jobs {
        println!("  {}", job);
        for kind in &plan.registry.kinds {
            output::dim(&format!(
                "      {}",
                artifact_name(&plan.registry.prefix, job, kind)
            ));
        }
    }

    println!();
    output::dim(&format!(
        "  {} artifact(s) expected",
        plan.jobs.len() * plan.registry.kinds.len()
    ));
    Ok(())
}
