//! `cortex chat`: one request per console line.

use std::io::Write;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};

use super::{CmdResult, build_loop, cancel_on_ctrl_c, connect, load_config};

pub async fn run(config_path: Option<&Path>) -> CmdResult {
    let config = load_config(config_path)?;
    let agent = build_loop(&config)?;
    let dispatcher = connect(&config).await?;

    println!();
    println!("  Cortex: interactive mode");
    println!();
    println!("  Model:     {}", config.planner.model);
    println!(
        "  Tools:     {} from {} backend(s)",
        dispatcher.list_tools().len(),
        dispatcher.ready_backends().len()
    );
    if !dispatcher.failures().is_empty() {
        println!("  Offline:   {}", dispatcher.failures().len());
    }
    println!();
    println!("  Type 'exit' or 'quit' to leave.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        if matches!(request.to_ascii_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        let (cancel, watcher) = cancel_on_ctrl_c();
        let outcome = agent.run_with_cancel(request, &dispatcher, cancel).await;
        watcher.abort();

        match outcome {
            Ok(answer) => {
                println!();
                for line in answer.lines() {
                    println!("  Cortex > {line}");
                }
                println!();
            }
            Err(e) => eprintln!("  [{e}]"),
        }
    }

    dispatcher.shutdown().await;
    println!();
    println!("  Goodbye.");
    Ok(())
}
