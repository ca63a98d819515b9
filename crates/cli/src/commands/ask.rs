//! `cortex ask`: answer one request and exit.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};

use super::{CmdResult, build_loop, cancel_on_ctrl_c, connect, load_config};

pub async fn run(config_path: Option<&Path>, message: Option<String>) -> CmdResult {
    let config = load_config(config_path)?;
    let agent = build_loop(&config)?;

    let request = match message {
        Some(message) => message,
        None => {
            eprint!("What do you want to solve today? > ");
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            lines.next_line().await?.unwrap_or_default()
        }
    };
    if request.trim().is_empty() {
        return Err("Empty request".into());
    }

    let dispatcher = connect(&config).await?;
    let (cancel, watcher) = cancel_on_ctrl_c();
    let outcome = agent.run_with_cancel(&request, &dispatcher, cancel).await;
    watcher.abort();
    dispatcher.shutdown().await;

    println!("{}", outcome?);
    Ok(())
}
