//! Traffic splitting replay tool
//!
//! Feeds recorded measurement scenarios through the splitting controller and
//! prints every decision as a JSON line.

mod commands;
mod scenario;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{cmd_options, cmd_run};
use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario file and print each decision
    Run {
        /// Scenario file path (JSON)
        scenario: PathBuf,

        /// Override a controller option (key=value), may be repeated
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,

        /// Print only steps that produced an update
        #[arg(long)]
        only_updates: bool,
    },

    /// List controller options and their defaults
    Options,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable.
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            overrides,
            only_updates,
        } => {
            cmd_run(&scenario, &overrides, only_updates)?;
        }
        Commands::Options => {
            cmd_options()?;
        }
    }

    Ok(())
}
