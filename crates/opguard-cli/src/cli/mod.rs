//! CLI for inspecting and exercising the opguard retry engine.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use opguard_core::config::{self, OpguardConfig};
use opguard_core::ErrorCategory;
use std::path::PathBuf;

use commands::{run_classify, run_policies, run_schedule, run_simulate, ClassifyArgs, SimulateArgs};

/// Top-level CLI for opguard.
#[derive(Debug, Parser)]
#[command(name = "opguard")]
#[command(about = "opguard: classify failures and inspect category retry policies", long_about = None)]
pub struct Cli {
    /// Use this config file instead of ~/.config/opguard/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Show the effective retry policy for each category.
    Policies {
        /// Only show this category.
        #[arg(long)]
        category: Option<ErrorCategory>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Classify a failure and print the resulting error record.
    Classify(ClassifyArgs),

    /// Print the backoff delays a category would wait between attempts.
    Schedule {
        /// Error category (network, auth, compliance, healthcare, data, validation, general).
        category: ErrorCategory,
        /// Draw jitter from a seeded generator; without it the upper bound is shown.
        #[arg(long)]
        seed: Option<u64>,
        /// Override the policy's max attempts.
        #[arg(long, value_name = "N")]
        max_attempts: Option<u32>,
    },

    /// Run an action that fails N times under a category policy, printing notifications.
    Simulate(SimulateArgs),
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = match &cli.config {
            Some(path) => config::load_from(path)?,
            None => config::load_or_init()?,
        };
        tracing::debug!("loaded config: {:?}", cfg);
        cli.command.run(cfg).await
    }

    async fn run(self, cfg: OpguardConfig) -> Result<()> {
        match self {
            CliCommand::Policies { category, json } => run_policies(&cfg, category, json)?,
            CliCommand::Classify(args) => run_classify(&args)?,
            CliCommand::Schedule {
                category,
                seed,
                max_attempts,
            } => run_schedule(&cfg, category, seed, max_attempts),
            CliCommand::Simulate(args) => run_simulate(cfg, &args).await?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
