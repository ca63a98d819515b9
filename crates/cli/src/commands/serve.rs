//! `cortex serve`: host the built-in tools for other agents.

use cortex_tools::{ToolServer, default_registry};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::CmdResult;

pub async fn run(tcp: Option<String>) -> CmdResult {
    let server = ToolServer::new(default_registry());

    match tcp {
        None => server.serve_stdio().await?,
        Some(addr) => {
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|e| format!("Failed to bind {addr}: {e}"))?;

            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    trigger.cancel();
                }
            });

            server.serve_tcp(listener, shutdown).await?;
        }
    }
    Ok(())
}
