//! `cortex doctor`: diagnose configuration and backends.

use std::path::Path;

use cortex_config::AppConfig;
use cortex_core::backend::ConnectionState;
use cortex_dispatch::{BackendConnection, TransportConnector};

use super::CmdResult;

pub async fn run(config_path: Option<&Path>) -> CmdResult {
    println!("Cortex doctor");
    println!("=============\n");

    let mut issues = 0;

    let config = match AppConfig::load(config_path) {
        Ok(config) => {
            println!("  [ok]   Config valid");
            config
        }
        Err(e) => {
            println!("  [fail] Config invalid: {e}");
            println!("\n  1 issue found.");
            return Ok(());
        }
    };

    match cortex_providers::build_from_config(&config.planner) {
        Ok(provider) => println!(
            "  [ok]   Planner: {} / {}",
            provider.name(),
            config.planner.model
        ),
        Err(e) => {
            println!("  [fail] Planner: {e}");
            issues += 1;
        }
    }

    match config.backend_descriptors() {
        Err(e) => {
            println!("  [fail] Backends: {e}");
            issues += 1;
        }
        Ok(descriptors) => {
            let timeout = config.dispatcher.connect_timeout();
            for descriptor in descriptors {
                let target = descriptor.transport.target();
                let conn = BackendConnection::new(descriptor)
                    .establish(&TransportConnector, timeout)
                    .await;

                if conn.state() == ConnectionState::Ready {
                    println!(
                        "  [ok]   Backend {} ({target}): {} tool(s)",
                        conn.id(),
                        conn.tools().len()
                    );
                } else {
                    let reason = conn
                        .error()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "not ready".into());
                    println!("  [fail] Backend {} ({target}): {reason}", conn.id());
                    issues += 1;
                }
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "Closing doctor probe failed");
                }
            }
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }
    Ok(())
}
