//! `cortex tools`: print the merged catalogue.

use std::path::Path;

use super::{CmdResult, connect, load_config};

pub async fn run(config_path: Option<&Path>) -> CmdResult {
    let config = load_config(config_path)?;
    let dispatcher = connect(&config).await?;

    let tools = dispatcher.list_tools();
    let width = tools.iter().map(|t| t.name.len()).max().unwrap_or(4).max(4);

    println!("{:<width$}  {:<12}  DESCRIPTION", "TOOL", "BACKEND");
    for tool in tools {
        println!(
            "{:<width$}  {:<12}  {}",
            tool.name,
            tool.backend.to_string(),
            tool.description
        );
    }

    if !dispatcher.failures().is_empty() {
        println!();
        println!("Unavailable backends:");
        for failure in dispatcher.failures() {
            println!("  {failure}");
        }
    }

    dispatcher.shutdown().await;
    Ok(())
}
