use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "atlantis")]
#[command(version, about = "Pull-request driven terraform automation")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate an atlantis.yaml (and optionally the server repo config)
    Validate {
        /// Directory containing atlantis.yaml
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Path to the server-side repo config file
        #[arg(long)]
        server_config: Option<PathBuf>,

        /// Repo ID to resolve server policies against, e.g. github.com/owner/repo
        #[arg(long)]
        repo_id: Option<String>,
    },
    /// Show which projects an autoplan over the given files would select
    Projects {
        /// Repo checkout to evaluate
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Modified files, relative to the repo root
        #[arg(required = true)]
        modified: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Validate {
            dir,
            server_config,
            repo_id,
        } => cmd::validate::run(&dir, server_config.as_deref(), repo_id.as_deref()),
        Commands::Projects { dir, modified } => cmd::projects::run(&dir, &modified),
    }
}
