mod commands {
    pub mod expand;
    pub mod run;
    pub mod validate;
}
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "matrix")]
#[command(about = "Expand job matrices, run them in parallel and collect their artifacts")]
#[command(version)]
struct Cli {
    /// Log library activity at debug level (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the job specifications and artifact names of a matrix
    Expand(commands::expand::ExpandArgs),

    /// Validate a matrix configuration file
    Validate(commands::validate::ValidateArgs),

    /// Run every job of a matrix and collect its artifacts
    Run(commands::run::RunArgs),
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Expand(args) => commands::expand::execute(args),
        Commands::Validate(args) => commands::validate::execute(args),
        Commands::Run(args) => commands::run::execute(args).await,
    }
}
