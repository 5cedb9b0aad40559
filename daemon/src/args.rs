use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Verbose logging
    #[arg(short, long, global = true, action(ArgAction::Count))]
    pub verbose: u8,
    /// Configuration file path
    #[arg(short, long, global = true, env = "PATCHGATE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Path to the sqlite database
    #[arg(long, global = true, env = "PATCHGATE_DB", default_value = "patchgate.db")]
    pub db: String,
    #[command(subcommand)]
    pub subcommand: SubCommand,
}

#[derive(Debug, Subcommand)]
pub enum SubCommand {
    /// Run the polling loop until interrupted
    Run,
    /// Submit a build of the baseline branch
    Baseline(Baseline),
    /// Check patchwork for new series once
    Patchwork(Patchwork),
    /// Check on pending builds once
    Reconcile,
    /// Print what's known about baselines and pending builds
    Testinfo,
    /// Load and print the config
    CheckConfig,
}

#[derive(Debug, Parser)]
pub struct Baseline {
    /// Return right after submitting instead of waiting for the result
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Debug, Parser)]
pub struct Patchwork {
    /// Wait until the submitted builds are reconciled
    #[arg(long)]
    pub wait: bool,
}
