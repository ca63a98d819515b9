//! Client side of the newline-delimited JSON-RPC protocol.
//!
//! One [`RpcPeer`] multiplexes any number of concurrent requests over a
//! single byte stream: every request gets a fresh numeric id, a writer lock
//! serializes outgoing frames, and a reader task routes each response to the
//! `oneshot` channel registered under its id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cortex_core::backend::BackendId;
use cortex_core::error::BackendError;
use cortex_core::rpc::{RequestId, RpcFrame, RpcRequest, RpcResponse};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

type Reply = Result<Value, BackendError>;

#[derive(Default)]
struct Pending {
    calls: HashMap<u64, oneshot::Sender<Reply>>,
    /// Set once the stream is gone; no new calls are accepted after that.
    closed: Option<String>,
}

impl Pending {
    fn fail_all(&mut self, backend: &BackendId, reason: &str) {
        for (_, tx) in self.calls.drain() {
            let _ = tx.send(Err(BackendError::Transport {
                backend: backend.clone(),
                reason: reason.to_string(),
            }));
        }
    }
}

type SharedPending = Arc<Mutex<Pending>>;

fn lock(pending: &Mutex<Pending>) -> std::sync::MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes an abandoned request from the pending map, e.g. when the caller's
/// future is dropped by a timeout.
struct PendingSlot<'a> {
    pending: &'a Mutex<Pending>,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        lock(self.pending).calls.remove(&self.id);
    }
}

pub struct RpcPeer {
    backend: BackendId,
    writer: tokio::sync::Mutex<BoxedWriter>,
    pending: SharedPending,
    next_id: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RpcPeer {
    /// Start a peer over the given stream halves. Spawns the reader task.
    pub fn new(backend: BackendId, reader: BoxedReader, writer: BoxedWriter) -> Self {
        let pending: SharedPending = Arc::default();
        let task = tokio::spawn(read_loop(backend.clone(), reader, pending.clone()));

        Self {
            backend,
            writer: tokio::sync::Mutex::new(writer),
            pending,
            next_id: AtomicU64::new(1),
            reader: Mutex::new(Some(task)),
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.pending).closed.is_some()
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = lock(&self.pending);
            if pending.closed.is_some() {
                return Err(BackendError::Closed(self.backend.clone()));
            }
            pending.calls.insert(id, tx);
        }
        let _slot = PendingSlot {
            pending: &self.pending,
            id,
        };

        let frame = RpcRequest::new(RequestId::Number(id), method, params);
        debug!(backend = %self.backend, id, method, "Sending request");
        self.write_frame(&frame).await?;

        match rx.await {
            Ok(reply) => reply,
            Err(_) => Err(BackendError::Transport {
                backend: self.backend.clone(),
                reason: format!("connection dropped while waiting for '{method}'"),
            }),
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), BackendError> {
        if self.is_closed() {
            return Err(BackendError::Closed(self.backend.clone()));
        }
        self.write_frame(&RpcRequest::notification(method, params))
            .await
    }

    async fn write_frame(&self, frame: &RpcRequest) -> Result<(), BackendError> {
        let mut line = serde_json::to_vec(frame).map_err(|e| BackendError::Protocol {
            backend: self.backend.clone(),
            reason: e.to_string(),
        })?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;

        written.map_err(|e| BackendError::Transport {
            backend: self.backend.clone(),
            reason: format!("write failed: {e}"),
        })
    }

    /// Stop the reader, fail outstanding calls and shut the write half.
    /// Safe to call more than once.
    pub async fn close(&self) {
        {
            let mut pending = lock(&self.pending);
            if pending.closed.is_none() {
                pending.closed = Some("closed by client".into());
            }
            pending.fail_all(&self.backend, "connection closed");
        }

        let task = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            trace!(backend = %self.backend, error = %e, "Write half already gone");
        }
    }
}

impl Drop for RpcPeer {
    fn drop(&mut self) {
        if let Some(task) = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn read_loop(backend: BackendId, reader: BoxedReader, pending: SharedPending) {
    let mut lines = BufReader::new(reader).lines();

    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                route_frame(&backend, &line, &pending);
            }
            Ok(None) => break "backend closed the connection".to_string(),
            Err(e) => break format!("read failed: {e}"),
        }
    };

    debug!(backend = %backend, %reason, "Reader stopped");
    let mut pending = lock(&pending);
    if pending.closed.is_none() {
        pending.closed = Some(reason.clone());
    }
    pending.fail_all(&backend, &reason);
}

fn route_frame(backend: &BackendId, line: &str, pending: &Mutex<Pending>) {
    let frame: RpcFrame = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(backend = %backend, error = %e, "Ignoring malformed frame");
            return;
        }
    };

    match frame {
        RpcFrame::Response(RpcResponse {
            id: Some(RequestId::Number(id)),
            result,
            error,
            ..
        }) => {
            let Some(tx) = lock(pending).calls.remove(&id) else {
                debug!(backend = %backend, id, "Response for unknown or abandoned request");
                return;
            };
            let reply = match error {
                Some(err) => Err(BackendError::Remote {
                    backend: backend.clone(),
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(result.unwrap_or(Value::Null)),
            };
            let _ = tx.send(reply);
        }
        RpcFrame::Response(response) => {
            warn!(backend = %backend, id = ?response.id, "Response with an id this client never issues");
        }
        RpcFrame::Request(request) => {
            // Server-initiated traffic (logging, progress) is not acted upon.
            debug!(backend = %backend, method = %request.method, "Ignoring server message");
        }
    }
}
