//! Subcommands and the wiring they share.

pub mod ask;
pub mod chat;
pub mod doctor;
pub mod serve;
pub mod tools;

use std::path::Path;
use std::sync::Arc;

use cortex_agent::{LoopSettings, PromptPlanner, ReasoningLoop};
use cortex_config::AppConfig;
use cortex_dispatch::{Dispatcher, DispatcherSettings, TransportConnector};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    AppConfig::load(path).map_err(|e| format!("Failed to load config: {e}").into())
}

/// Connect to every enabled backend.
pub async fn connect(config: &AppConfig) -> Result<Dispatcher, Box<dyn std::error::Error>> {
    let descriptors = config.backend_descriptors()?;
    let dispatcher = Dispatcher::initialize(
        descriptors,
        Arc::new(TransportConnector),
        DispatcherSettings::from(&config.dispatcher),
    )
    .await?;

    for failure in dispatcher.failures() {
        warn!(backend = %failure.backend, error = %failure.error, "Backend unavailable");
    }
    Ok(dispatcher)
}

/// Build the reasoning loop with the configured planner.
pub fn build_loop(config: &AppConfig) -> Result<ReasoningLoop, Box<dyn std::error::Error>> {
    if !config.has_api_key() {
        print_api_key_help();
    }
    let provider = cortex_providers::build_from_config(&config.planner)?;
    let planner = PromptPlanner::from_config(provider, &config.planner, &config.agent);
    Ok(ReasoningLoop::new(
        Arc::new(planner),
        LoopSettings::from_config(config),
    ))
}

/// A token cancelled on Ctrl+C. Abort the handle once the request is done.
pub fn cancel_on_ctrl_c() -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    (token, handle)
}

fn print_api_key_help() {
    eprintln!();
    eprintln!("  No API key configured for the planner.");
    eprintln!("  Set one of CORTEX_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY,");
    eprintln!("  or add api_key under [planner] in:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
}
