//! One live link to a backend and its lifecycle.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use cortex_core::backend::{
    BackendDescriptor, BackendId, BackendSession, ConnectionState, Connector, RemoteTool,
    ToolReply,
};
use cortex_core::error::BackendError;
use serde_json::Value;
use tracing::{debug, info, warn};

/// A backend connection, owned exclusively by the dispatcher.
///
/// `Unconnected → Connecting → {Ready | Failed} → Closed`. The tool list is
/// captured once during [`establish`](Self::establish) and never refreshed.
pub struct BackendConnection {
    descriptor: BackendDescriptor,
    state: RwLock<ConnectionState>,
    session: Option<Arc<dyn BackendSession>>,
    tools: Vec<RemoteTool>,
    error: Option<BackendError>,
}

impl BackendConnection {
    pub fn new(descriptor: BackendDescriptor) -> Self {
        Self {
            descriptor,
            state: RwLock::new(ConnectionState::Unconnected),
            session: None,
            tools: Vec::new(),
            error: None,
        }
    }

    /// Connect, handshake and discover tools, all within `timeout`.
    pub async fn establish(mut self, connector: &dyn Connector, timeout: Duration) -> Self {
        self.set_state(ConnectionState::Connecting);
        debug!(
            backend = %self.descriptor.id,
            transport = %self.descriptor.transport.kind(),
            target = %self.descriptor.transport.target(),
            "Connecting to backend"
        );

        let attempt = async {
            let session = connector.connect(&self.descriptor).await?;
            match session.list_tools().await {
                Ok(tools) => Ok((session, tools)),
                Err(e) => {
                    let _ = session.close().await;
                    Err(e)
                }
            }
        };

        let outcome = match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                backend: self.descriptor.id.clone(),
                operation: "connect".into(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok((session, tools)) => {
                info!(
                    backend = %self.descriptor.id,
                    tools = tools.len(),
                    "Backend ready"
                );
                self.session = Some(session);
                self.tools = tools;
                self.set_state(ConnectionState::Ready);
            }
            Err(e) => {
                warn!(backend = %self.descriptor.id, error = %e, "Backend failed to come up");
                self.error = Some(e);
                self.set_state(ConnectionState::Failed);
            }
        }
        self
    }

    pub fn id(&self) -> &BackendId {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    /// Current state. A Ready connection whose transport has since gone
    /// away reports Failed.
    pub fn state(&self) -> ConnectionState {
        let state = *self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &self.session {
            Some(session) if state == ConnectionState::Ready && session.is_closed() => {
                ConnectionState::Failed
            }
            _ => state,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Tools discovered at connect time (empty unless Ready).
    pub fn tools(&self) -> &[RemoteTool] {
        &self.tools
    }

    /// Why the connection failed, if it did.
    pub fn error(&self) -> Option<&BackendError> {
        self.error.as_ref()
    }

    /// Forward a call. Only Ready connections accept calls.
    pub async fn call(&self, remote_name: &str, arguments: Value) -> Result<ToolReply, BackendError> {
        match (&self.session, self.state()) {
            (Some(session), state) if state.accepts_calls() => {
                session.call_tool(remote_name, arguments).await
            }
            _ => Err(BackendError::Closed(self.descriptor.id.clone())),
        }
    }

    /// Close the session (if any) and move to Closed. Idempotent.
    pub async fn close(&self) -> Result<(), BackendError> {
        let previous = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, ConnectionState::Closed)
        };

        match (&self.session, previous) {
            (Some(session), ConnectionState::Ready) => session.close().await,
            _ => Ok(()),
        }
    }
}
