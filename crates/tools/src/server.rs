//! Serves a [`ToolRegistry`] over the newline-delimited JSON-RPC protocol.
//!
//! The same handler runs on stdio (for pipe backends) and on a TCP listener
//! (for stream backends). Requests on one connection are handled
//! concurrently; responses are written as they complete.

use std::sync::Arc;

use cortex_core::error::ToolError;
use cortex_core::rpc::{
    CallToolParams, CallToolResult, Implementation, InitializeResult, JSONRPC_VERSION,
    ListToolsParams, ListToolsResult, PROTOCOL_VERSION, RpcError, RpcRequest, RpcResponse, codes,
    methods,
};
use cortex_core::tool::ToolRegistry;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ToolServer {
    registry: Arc<ToolRegistry>,
    info: Arc<Implementation>,
    page_size: Option<usize>,
}

impl ToolServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            info: Arc::new(Implementation {
                name: "cortex-tools".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            }),
            page_size: None,
        }
    }

    /// Name reported in the `initialize` reply.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.info = Arc::new(Implementation {
            name: name.into(),
            version: self.info.version.clone(),
        });
        self
    }

    /// Split `tools/list` into pages of at most `size` entries.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handle one request. Notifications produce no response.
    pub async fn handle(&self, request: RpcRequest) -> Option<RpcResponse> {
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "Notification received");
            return None;
        };

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(RpcResponse::failure(
                Some(id),
                RpcError::new(codes::INVALID_REQUEST, "jsonrpc must be \"2.0\""),
            ));
        }

        let params = request.params.unwrap_or(Value::Null);
        let outcome = match request.method.as_str() {
            methods::INITIALIZE => to_result(&InitializeResult {
                protocol_version: PROTOCOL_VERSION.into(),
                capabilities: json!({ "tools": {} }),
                server_info: (*self.info).clone(),
            }),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => self.list_tools(params),
            methods::TOOLS_CALL => self.call_tool(params).await,
            other => Err(RpcError::method_not_found(other)),
        };

        Some(match outcome {
            Ok(result) => RpcResponse::success(id, result),
            Err(error) => RpcResponse::failure(Some(id), error),
        })
    }

    fn list_tools(&self, params: Value) -> Result<Value, RpcError> {
        let params: ListToolsParams = if params.is_null() {
            ListToolsParams::default()
        } else {
            serde_json::from_value(params).map_err(RpcError::invalid_params)?
        };

        let all = self.registry.definitions();
        let start = match params.cursor.as_deref() {
            None => 0,
            Some(cursor) => cursor
                .parse::<usize>()
                .ok()
                .filter(|offset| *offset <= all.len())
                .ok_or_else(|| RpcError::invalid_params(format!("unknown cursor '{cursor}'")))?,
        };
        let end = match self.page_size {
            Some(size) => (start + size).min(all.len()),
            None => all.len(),
        };

        to_result(&ListToolsResult {
            tools: all[start..end].to_vec(),
            next_cursor: (end < all.len()).then(|| end.to_string()),
        })
    }

    async fn call_tool(&self, params: Value) -> Result<Value, RpcError> {
        let params: CallToolParams =
            serde_json::from_value(params).map_err(RpcError::invalid_params)?;
        let arguments = match params.arguments {
            Value::Null => json!({}),
            other => other,
        };

        debug!(tool = %params.name, "Executing tool");
        let reply = match self.registry.execute(&params.name, arguments).await {
            Ok(data) => CallToolResult::data(data),
            Err(ToolError::NotFound(name)) => {
                return Err(RpcError::invalid_params(format!("unknown tool '{name}'")));
            }
            Err(e) => {
                warn!(tool = %params.name, error = %e, "Tool reported a failure");
                CallToolResult::error(e.to_string())
            }
        };
        to_result(&reply)
    }

    /// Serve one connection until the peer closes its write half.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<RpcResponse>();
        let mut tx = Some(tx);
        let mut lines = BufReader::new(reader).lines();

        loop {
            tokio::select! {
                line = lines.next_line(), if tx.is_some() => match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        if let Some(tx) = &tx {
                            self.accept(&line, tx);
                        }
                    }
                    // Stop reading; finish answering what is in flight.
                    None => tx = None,
                },
                Some(response) = rx.recv() => write_response(&mut writer, &response).await?,
                else => break,
            }
        }

        writer.shutdown().await.ok();
        Ok(())
    }

    fn accept(&self, line: &str, tx: &mpsc::UnboundedSender<RpcResponse>) {
        let request: RpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Unparseable frame");
                let _ = tx.send(RpcResponse::failure(
                    None,
                    RpcError::new(codes::PARSE_ERROR, format!("Parse error: {e}")),
                ));
                return;
            }
        };

        let server = self.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = server.handle(request).await {
                let _ = tx.send(response);
            }
        });
    }

    /// Serve on this process's stdin/stdout.
    pub async fn serve_stdio(&self) -> std::io::Result<()> {
        info!(tools = self.registry.len(), "Serving tools on stdio");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Accept TCP connections until `shutdown` is cancelled.
    pub async fn serve_tcp(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> std::io::Result<()> {
        info!(
            addr = %listener.local_addr()?,
            tools = self.registry.len(),
            "Serving tools over TCP"
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };

            debug!(%peer, "Client connected");
            let server = self.clone();
            tokio::spawn(async move {
                let (read, write) = stream.into_split();
                if let Err(e) = server.serve(read, write).await {
                    warn!(%peer, error = %e, "Connection ended with an error");
                }
                debug!(%peer, "Client disconnected");
            });
        }

        info!("Tool server stopped");
        Ok(())
    }
}

fn to_result<T: serde::Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new(codes::INTERNAL_ERROR, e.to_string()))
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &RpcResponse,
) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}
