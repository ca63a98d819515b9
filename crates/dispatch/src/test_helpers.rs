//! Scripted backends for dispatcher tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cortex_core::backend::{
    BackendDescriptor, BackendId, BackendSession, Connector, RemoteTool, ToolReply,
};
use cortex_core::error::BackendError;
use serde_json::{Value, json};

/// How a scripted tool responds.
#[derive(Debug, Clone)]
pub enum Behavior {
    Reply(ToolReply),
    /// Never answers.
    Hang,
    /// The transport breaks mid-call.
    Break,
}

/// A backend whose handshake, discovery and replies are scripted.
///
/// Clones share counters, so a test can keep one handle and give another
/// to the connector.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    tools: Vec<RemoteTool>,
    behaviors: HashMap<String, Behavior>,
    hang_on_connect: bool,
    fail_discovery: bool,
    calls: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl ScriptedBackend {
    pub fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: names
                .iter()
                .map(|name| RemoteTool {
                    name: name.to_string(),
                    description: Some(format!("Scripted {name}")),
                    input_schema: json!({"type": "object"}),
                    output_schema: None,
                })
                .collect(),
            ..Self::default()
        }
    }

    /// A backend that never finishes connecting.
    pub fn hanging() -> Self {
        Self {
            hang_on_connect: true,
            ..Self::default()
        }
    }

    /// A backend that connects but fails `tools/list`.
    pub fn broken_discovery() -> Self {
        Self {
            fail_discovery: true,
            ..Self::default()
        }
    }

    pub fn on(mut self, tool: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(tool.to_string(), behavior);
        self
    }

    /// Backend-local tool names called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate the backend going away after the handshake.
    pub fn drop_connection(&self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

struct ScriptedSession {
    id: BackendId,
    script: ScriptedBackend,
    closed: AtomicBool,
}

#[async_trait]
impl BackendSession for ScriptedSession {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, BackendError> {
        if self.script.fail_discovery {
            return Err(BackendError::Protocol {
                backend: self.id.clone(),
                reason: "bad tools/list result".into(),
            });
        }
        Ok(self.script.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolReply, BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed(self.id.clone()));
        }
        if self.script.dropped.load(Ordering::SeqCst) {
            return Err(BackendError::Transport {
                backend: self.id.clone(),
                reason: "backend closed the connection".into(),
            });
        }
        self.script.calls.lock().unwrap().push(name.to_string());

        match self.script.behaviors.get(name) {
            Some(Behavior::Reply(reply)) => Ok(reply.clone()),
            Some(Behavior::Hang) => std::future::pending().await,
            Some(Behavior::Break) => Err(BackendError::Transport {
                backend: self.id.clone(),
                reason: "broken pipe".into(),
            }),
            None => Ok(ToolReply::Data(json!({
                "backend": self.id.as_str(),
                "tool": name,
                "arguments": arguments,
            }))),
        }
    }

    async fn close(&self) -> Result<(), BackendError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.script.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.script.dropped.load(Ordering::SeqCst)
    }
}

/// Hands out scripted sessions by backend id; unknown ids fail to connect.
#[derive(Default)]
pub struct ScriptedConnector {
    backends: HashMap<String, ScriptedBackend>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, id: &str, backend: ScriptedBackend) -> Self {
        self.backends.insert(id.to_string(), backend);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Arc<dyn BackendSession>, BackendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let Some(script) = self.backends.get(descriptor.id.as_str()) else {
            return Err(BackendError::Connect {
                backend: descriptor.id.clone(),
                reason: "connection refused".into(),
            });
        };
        if script.hang_on_connect {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(Arc::new(ScriptedSession {
            id: descriptor.id.clone(),
            script: script.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Stream descriptors for the given ids; the address is never dialled.
pub fn descriptors(ids: &[&str]) -> Vec<BackendDescriptor> {
    ids.iter()
        .map(|id| BackendDescriptor::stream(*id, "127.0.0.1", 9))
        .collect()
}
