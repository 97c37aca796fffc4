use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use forge_cli::load_config;
use forge_cli::logs_cmd;
use forge_cli::logs_cmd::LogsArgs;
use forge_cli::run_cmd;
use forge_cli::run_cmd::RunArgs;
use tracing_subscriber::EnvFilter;

/// Run commands as sessions and follow their output.
#[derive(Debug, Parser)]
#[command(name = "forge", version)]
struct Cli {
    /// Path to forge.toml. Defaults to $FORGE_HOME/forge.toml.
    #[arg(long = "config", value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a session and stream its output until it exits.
    Run(RunArgs),
    /// Show the persisted output of a finished session.
    Logs(LogsArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    setup_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Run(args) => run_cmd::run(args, &config).await,
        Command::Logs(args) => logs_cmd::run(args, &config).await,
    }
}

fn setup_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
