//! missionpay CLI - Escrow-funded missions for paid agents
//!
//! # Quick Start
//!
//! ```bash
//! # Run paywalled agents locally and drive two missions through them
//! missionpay demo
//!
//! # Check a mission plan before funding it
//! missionpay plan demos/plan.json
//! ```
//!
//! Settings come from `MISSIONPAY_*` environment variables (a `.env` file is
//! read if present). Log verbosity follows `RUST_LOG`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use missionpay_coordinator::MissionConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod display;

/// missionpay - pay agents per task, hold the budget in escrow
#[derive(Parser)]
#[command(name = "missionpay")]
#[command(version)]
#[command(about = "Escrow-funded missions for independently operated, paid agents", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Payment network agents are paid on
    #[arg(long, global = true, env = "MISSIONPAY_NETWORK")]
    network: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve paywalled agents on local ports and run a sequential and a
    /// parallel mission through them
    Demo {
        /// Skip the client approval after the sequential mission
        #[arg(long)]
        no_approve: bool,
    },

    /// Validate a mission plan file and print its cost summary
    Plan {
        /// Path to a JSON mission plan
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("missionpay=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = MissionConfig::from_env();
    if let Some(network) = cli.network {
        config.network = network;
    }

    match cli.command {
        Commands::Demo { no_approve } => commands::demo::run(config, !no_approve).await,
        Commands::Plan { file } => commands::plan::run(&file),
    }
}
