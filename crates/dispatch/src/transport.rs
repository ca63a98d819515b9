//! Byte-stream transports: a local subprocess (pipe) or a TCP connection (stream).

use std::process::Stdio;

use cortex_core::backend::{BackendId, TransportSpec};
use cortex_core::error::BackendError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::peer::{BoxedReader, BoxedWriter};

/// An opened transport, ready to carry JSON-RPC frames.
pub struct Transport {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    /// The spawned process, for pipe transports. Killed on drop.
    pub child: Option<Child>,
}

impl Transport {
    pub async fn open(backend: &BackendId, endpoint: &TransportSpec) -> Result<Self, BackendError> {
        match endpoint {
            TransportSpec::Pipe {
                command,
                args,
                env,
                cwd,
            } => {
                let mut cmd = Command::new(command);
                cmd.args(args).envs(env);
                if let Some(cwd) = cwd {
                    cmd.current_dir(cwd);
                }
                spawn_pipe(backend, cmd)
            }
            TransportSpec::Stream { host, port } => connect_stream(backend, host, *port).await,
        }
    }
}

fn spawn_pipe(backend: &BackendId, mut cmd: Command) -> Result<Transport, BackendError> {
    let spawn_error = |reason: String| BackendError::Spawn {
        backend: backend.clone(),
        reason,
    };

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(e.to_string()))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| spawn_error("child has no stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| spawn_error("child has no stdout".into()))?;

    if let Some(stderr) = child.stderr.take() {
        let backend = backend.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "backend_stderr", "[{}] {}", backend, line.trim_end());
            }
        });
    }

    info!(backend = %backend, pid = ?child.id(), "Spawned backend process");
    Ok(Transport {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        child: Some(child),
    })
}

async fn connect_stream(
    backend: &BackendId,
    host: &str,
    port: u16,
) -> Result<Transport, BackendError> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| BackendError::Connect {
            backend: backend.clone(),
            reason: format!("{host}:{port}: {e}"),
        })?;
    // Frames are small and latency-bound.
    let _ = stream.set_nodelay(true);

    info!(backend = %backend, %host, port, "Connected to backend");
    let (read, write) = stream.into_split();
    Ok(Transport {
        reader: Box::new(read),
        writer: Box::new(write),
        child: None,
    })
}
