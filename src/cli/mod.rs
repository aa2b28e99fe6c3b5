//! CLI module — command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`. The binary is
//! both the engine host (`run`) and the external driver (`send`, `fetch`,
//! `approve`, `resume`, `stop`, `status`).

pub mod driver;
pub mod engine_cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};

use roundtable::config::Config;
use roundtable::utils::logging::init_logging;

#[derive(Parser)]
#[command(name = "roundtable")]
#[command(version)]
#[command(about = "Multi-agent roundtable orchestrator with an approval gate and a polling bridge", long_about = None)]
struct Cli {
    /// Bridge base URL for driver commands (defaults to the configured one)
    #[arg(long, global = true)]
    bridge_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine: bridge server, monitor, and scheduler
    Run {
        /// Start a first cycle immediately with this goal
        #[arg(long)]
        goal: Option<String>,
    },
    /// Submit a goal to a running engine (driver side)
    Send {
        /// The goal text
        content: String,
    },
    /// Fetch the latest published output (non-destructive read)
    Fetch {
        /// Print the full envelope JSON instead of just the content
        #[arg(long)]
        json: bool,
    },
    /// Resolve a pending tool invocation
    Approve {
        /// Entry id carrying the invocation
        entry: u64,
        /// Invocation id
        invocation: String,
        /// Reject instead of approving
        #[arg(long)]
        deny: bool,
    },
    /// Continue a paused cycle (approvals never auto-resume)
    Resume,
    /// Ask the active cycle to stop at its next suspension point
    Stop,
    /// Show bridge and cycle status
    Status,
    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

/// Parse arguments and dispatch.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    init_logging(&config.logging);

    let bridge_url = cli
        .bridge_url
        .unwrap_or_else(|| config.bridge.base_url());

    match cli.command {
        Commands::Run { goal } => engine_cmd::execute(config, goal).await,
        Commands::Send { content } => driver::send(&bridge_url, &content).await,
        Commands::Fetch { json } => driver::fetch(&bridge_url, json).await,
        Commands::Approve {
            entry,
            invocation,
            deny,
        } => driver::approve(&bridge_url, entry, &invocation, !deny).await,
        Commands::Resume => driver::resume(&bridge_url).await,
        Commands::Stop => driver::stop(&bridge_url).await,
        Commands::Status => driver::status(&bridge_url).await,
        Commands::Init { force } => driver::init(force),
    }
}
