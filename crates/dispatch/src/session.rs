//! A handshaken MCP-style session with one backend.

use std::sync::Arc;

use async_trait::async_trait;
use cortex_core::backend::{
    BackendDescriptor, BackendId, BackendSession, Connector, RemoteTool, ToolReply,
};
use cortex_core::error::BackendError;
use cortex_core::rpc::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    ListToolsParams, ListToolsResult, PROTOCOL_VERSION, methods,
};
use serde_json::Value;
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::peer::RpcPeer;
use crate::transport::Transport;

/// Discovery gives up after this many pages, in case a backend keeps
/// handing out cursors.
const MAX_DISCOVERY_PAGES: usize = 64;

pub struct McpSession {
    backend: BackendId,
    peer: RpcPeer,
    child: tokio::sync::Mutex<Option<Child>>,
    server: Implementation,
}

impl McpSession {
    /// Run the `initialize` handshake over an opened transport.
    pub async fn start(backend: BackendId, transport: Transport) -> Result<Self, BackendError> {
        let peer = RpcPeer::new(backend.clone(), transport.reader, transport.writer);
        let child = tokio::sync::Mutex::new(transport.child);

        let handshake_error = |reason: String| BackendError::Handshake {
            backend: backend.clone(),
            reason,
        };

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: Implementation {
                name: "cortex".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };
        let params = serde_json::to_value(params).map_err(|e| handshake_error(e.to_string()))?;

        let result = match peer.request(methods::INITIALIZE, Some(params)).await {
            Ok(result) => result,
            Err(e) => {
                peer.close().await;
                return Err(handshake_error(e.to_string()));
            }
        };
        let init: InitializeResult = match serde_json::from_value(result) {
            Ok(init) => init,
            Err(e) => {
                peer.close().await;
                return Err(handshake_error(format!("bad initialize result: {e}")));
            }
        };

        if init.protocol_version != PROTOCOL_VERSION {
            warn!(
                backend = %backend,
                theirs = %init.protocol_version,
                ours = PROTOCOL_VERSION,
                "Protocol version mismatch, continuing"
            );
        }

        peer.notify(methods::INITIALIZED, None).await?;

        info!(
            backend = %backend,
            server = %init.server_info.name,
            version = %init.server_info.version,
            "Backend handshake complete"
        );

        Ok(Self {
            backend,
            peer,
            child,
            server: init.server_info,
        })
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server
    }

    fn protocol_error(&self, reason: String) -> BackendError {
        BackendError::Protocol {
            backend: self.backend.clone(),
            reason,
        }
    }
}

#[async_trait]
impl BackendSession for McpSession {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, BackendError> {
        let mut tools = Vec::new();
        let mut cursor = None;

        for _ in 0..MAX_DISCOVERY_PAGES {
            let params = serde_json::to_value(ListToolsParams {
                cursor: cursor.take(),
            })
            .map_err(|e| self.protocol_error(e.to_string()))?;

            let result = self.peer.request(methods::TOOLS_LIST, Some(params)).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| self.protocol_error(format!("bad tools/list result: {e}")))?;

            debug!(backend = %self.backend, count = page.tools.len(), "Discovered tool page");
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }

        Err(self.protocol_error(format!(
            "tools/list still paginating after {MAX_DISCOVERY_PAGES} pages"
        )))
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolReply, BackendError> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })
        .map_err(|e| self.protocol_error(e.to_string()))?;

        let result = self.peer.request(methods::TOOLS_CALL, Some(params)).await?;
        let reply: CallToolResult = serde_json::from_value(result)
            .map_err(|e| self.protocol_error(format!("bad tools/call result: {e}")))?;

        Ok(reply.into_reply())
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.peer.close().await;

        let mut child = self.child.lock().await;
        if let Some(mut process) = child.take() {
            process.kill().await.map_err(|e| BackendError::Transport {
                backend: self.backend.clone(),
                reason: format!("failed to stop process: {e}"),
            })?;
            debug!(backend = %self.backend, "Backend process stopped");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.peer.is_closed()
    }
}

/// Opens real transports and runs the handshake.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransportConnector;

#[async_trait]
impl Connector for TransportConnector {
    async fn connect(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Arc<dyn BackendSession>, BackendError> {
        let transport = Transport::open(&descriptor.id, &descriptor.transport).await?;
        let session = McpSession::start(descriptor.id.clone(), transport).await?;
        Ok(Arc::new(session))
    }
}
