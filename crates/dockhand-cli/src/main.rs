//! dockhand CLI tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dockhand_core::ResourceId;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "dockhand")]
#[command(about = "Run CI tasks in containers", long_about = None)]
struct Cli {
    /// Worker configuration file
    #[arg(long, env = "DOCKHAND_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single task fetched from the coordinator
    Agent {
        /// Task ID
        task_id: ResourceId,
    },
    /// Run a pipeline file on the local Docker daemon
    Run {
        /// Path to the pipeline file
        #[arg(default_value = "pipeline.kdl")]
        path: PathBuf,
        /// Subject submitting the pipeline
        #[arg(long)]
        owner: Option<String>,
    },
    /// Validate a pipeline or worker configuration file
    Validate {
        /// Path to the file
        path: PathBuf,
        /// Validate as a worker configuration
        #[arg(long)]
        worker: bool,
    },
    /// Print the cache key of a task
    CacheKey {
        #[arg(long)]
        image: String,
        #[arg(long, default_value = "")]
        source: String,
        #[arg(long, default_value = "")]
        directory: String,
    },
    /// Prune unused containers, images, volumes and networks
    Prune,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Agent { task_id } => {
            let config = commands::load_config(cli.config.as_deref())?;
            let code = commands::agent::run_task(config, task_id).await?;
            std::process::exit(code);
        }
        Commands::Run { path, owner } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::run::run_local(config, &path, owner).await?;
        }
        Commands::Validate { path, worker } => {
            commands::validate(&path, worker)?;
        }
        Commands::CacheKey {
            image,
            source,
            directory,
        } => {
            commands::cache_key(&image, &source, &directory)?;
        }
        Commands::Prune => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::prune(&config).await?;
        }
    }

    Ok(())
}
