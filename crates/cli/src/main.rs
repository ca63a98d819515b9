//! Cortex CLI, the main entry point.
//!
//! Commands:
//! - `ask`     Answer one request and exit
//! - `chat`    Console loop (`exit` or `quit` to leave)
//! - `tools`   Print the merged tool catalogue and failed backends
//! - `serve`   Run the built-in tool server on stdio or TCP
//! - `doctor`  Validate config and try every backend

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "cortex",
    about = "Cortex: a reasoning agent over many tool servers",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $CORTEX_CONFIG, then ~/.cortex/config.toml)
    #[arg(short, long, global = true, env = "CORTEX_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single request
    Ask {
        /// The request; read from stdin when omitted
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Interactive console
    Chat,

    /// List the tools every configured backend offers
    Tools,

    /// Serve the built-in tools (calculator, ascii_values, exponential_sum)
    Serve {
        /// Listen on a TCP address instead of stdio, e.g. 127.0.0.1:8051
        #[arg(long)]
        tcp: Option<String>,
    },

    /// Diagnose configuration and backend health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr: stdout carries answers and, for `serve`, the protocol.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Ask { message } => commands::ask::run(config, message).await?,
        Commands::Chat => commands::chat::run(config).await?,
        Commands::Tools => commands::tools::run(config).await?,
        Commands::Serve { tcp } => commands::serve::run(tcp).await?,
        Commands::Doctor => commands::doctor::run(config).await?,
    }

    Ok(())
}
