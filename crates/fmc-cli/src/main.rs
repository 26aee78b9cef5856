//! Manufacturing cell CLI tool.

use clap::{Parser, Subcommand};
use fmc_core::{ProcessRequest, RunKind};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "fmc")]
#[command(about = "Manufacturing cell scheduler CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an operation queue document
    Validate {
        /// Path to the queue document (JSON)
        path: PathBuf,
    },
    /// Build an operation queue document from process quantities
    Encode {
        /// Operator name embedded in the run identifier
        #[arg(long, env = "USER", default_value = "admin")]
        user: String,
        /// Run mode: real-run, full-sim or quick-sim
        #[arg(long, default_value = "real-run")]
        mode: RunKind,
        /// Process to queue, as NAME=QUANTITY[:PRIORITY]
        #[arg(long = "process", short, required = true, value_parser = commands::encode::parse_request)]
        processes: Vec<ProcessRequest>,
        /// Write the document here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Run a queue document against simulated workers
    Simulate {
        /// Path to the queue document (JSON)
        path: PathBuf,
        /// Cell configuration file
        #[arg(long, env = "FMC_CONFIG")]
        config: Option<PathBuf>,
        /// Run mode announced on the bus
        #[arg(long, default_value = "quick-sim")]
        mode: RunKind,
        /// Poll interval in milliseconds, overriding the configuration
        #[arg(long)]
        poll_ms: Option<u64>,
        /// Give up after this many seconds
        #[arg(long, default_value = "600")]
        timeout_secs: u64,
    },
    /// Validate a cell configuration file
    CheckConfig {
        /// Path to the configuration file
        #[arg(default_value = "cell.kdl")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Encode {
            user,
            mode,
            processes,
            output,
        } => {
            commands::encode::encode(&user, mode, &processes, output.as_deref())?;
        }
        Commands::Simulate {
            path,
            config,
            mode,
            poll_ms,
            timeout_secs,
        } => {
            commands::simulate::simulate(&path, config.as_deref(), mode, poll_ms, timeout_secs)
                .await?;
        }
        Commands::CheckConfig { path } => {
            commands::check_config(&path)?;
        }
    }

    Ok(())
}
