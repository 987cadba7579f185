use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(about = "Backfills Hacker News items into Redis and schedules embeddings for popular ones")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to a harvester.toml (overrides HARVESTER_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Env file applied before reading the environment (defaults to ./.env)
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the backfill loop, the scan loop and the workers until interrupted
    Run,
    /// Run a single backfill pass and exit
    BackfillOnce,
    /// Run a single full eligibility scan and exit
    ScanOnce,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }
}
