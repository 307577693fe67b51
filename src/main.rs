use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

use shiptag::config::AppConfig;

#[derive(Parser)]
#[command(name = "shiptag")]
#[command(version, about = "App Store release reconciler")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log every mutation instead of performing it.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Path to an env file with credentials and coordinates.
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit the latest eligible beta build for App Store review
    Deploy,
    /// Tag and announce builds that reached the store
    ReleaseSync,
    /// Run both reconcilers (deploy, then release-sync)
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = AppConfig::from_env(cli.env_file.as_deref())?;
    if cli.dry_run {
        config.dry_run = true;
    }

    let job = match cli.command {
        Commands::Deploy => cmd::Job::Deploy,
        Commands::ReleaseSync => cmd::Job::ReleaseSync,
        Commands::Run => cmd::Job::Both,
    };
    cmd::run_reconciliation(config, job).await
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
