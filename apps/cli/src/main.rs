//! TubeSeg CLI - console front-end for the tube segmentation backend
//!
//! Provides a `tubeseg` command that connects to a running backend and drives
//! the segmentation editor from a line-oriented console.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tubeseg_core::ClientConfig;

/// TubeSeg - interactive tube segmentation
#[derive(Parser, Debug)]
#[command(name = "tubeseg", author, version, about = "TubeSeg - interactive tube segmentation")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend host (overrides BACKEND_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Backend port (overrides BACKEND_PORT)
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the backend and report whether it is reachable
    Check {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive segmentation console
    ///
    /// Reads commands from stdin, one per line. Type `help` for the list.
    Session,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = ClientConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.backend.host = host;
    }
    if let Some(port) = args.port {
        config.backend.port = port;
    }
    config.validate()?;

    match args.command {
        Command::Check { json } => commands::check::execute(&config, json).await,
        Command::Session => commands::session::execute(&config).await,
        Command::Config => commands::check::print_config(&config),
    }
}
