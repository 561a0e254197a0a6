//! velo - cached task runner.

#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use velo::commands;
use velo::engine::executor::TaskError;

#[derive(Parser)]
#[command(name = "velo")]
#[command(author, version, about = "Content-addressable build cache runner")]
struct Cli {
    /// Enable verbose diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline task with caching
    Run {
        /// Task name from the pipeline
        task: String,

        /// Target package name or path
        #[arg(short, long)]
        package: Option<String>,
    },
    /// Remove the local cache directory
    Clean,
    /// Write a starter velocity.json
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let result = match cli.command {
        Commands::Run { task, package } => commands::run(&task, package.as_deref()).await,
        Commands::Clean => commands::clean(),
        Commands::Init => commands::init(),
    };

    if let Err(err) = result {
        eprintln!("velo: {err:#}");
        // A failed task exits with the command's own exit code.
        let code = err
            .downcast_ref::<TaskError>()
            .and_then(TaskError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
