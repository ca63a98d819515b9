//! Backend abstractions: the seam between the dispatcher and tool servers.
//!
//! A backend is an independently running process or endpoint that exposes
//! tools over some transport. The dispatcher never talks to a transport
//! directly: it asks a [`Connector`] for a [`BackendSession`], and the
//! session performs discovery and calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::BackendError;

/// Identifier of a configured backend (the `id` field of a config entry).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(pub String);

impl BackendId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BackendId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BackendId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of transports a backend can be reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// A local subprocess spoken to over its stdin/stdout.
    Pipe,
    /// A network byte stream (TCP).
    Stream,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipe => f.write_str("pipe"),
            Self::Stream => f.write_str("stream"),
        }
    }
}

/// Transport-specific connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum TransportSpec {
    Pipe {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    Stream { host: String, port: u16 },
}

impl TransportSpec {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Pipe { .. } => TransportKind::Pipe,
            Self::Stream { .. } => TransportKind::Stream,
        }
    }

    /// Human-readable target, used in logs and diagnostics.
    pub fn target(&self) -> String {
        match self {
            Self::Pipe { command, args, .. } if args.is_empty() => command.clone(),
            Self::Pipe { command, args, .. } => format!("{} {}", command, args.join(" ")),
            Self::Stream { host, port } => format!("{host}:{port}"),
        }
    }
}

/// One configured backend. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub id: BackendId,
    #[serde(flatten)]
    pub transport: TransportSpec,
}

impl BackendDescriptor {
    pub fn new(id: impl Into<BackendId>, transport: TransportSpec) -> Self {
        Self {
            id: id.into(),
            transport,
        }
    }

    /// Convenience constructor for a subprocess backend.
    pub fn pipe(
        id: impl Into<BackendId>,
        command: impl Into<String>,
        args: impl IntoIterator<Item = String>,
    ) -> Self {
        Self::new(
            id,
            TransportSpec::Pipe {
                command: command.into(),
                args: args.into_iter().collect(),
                env: BTreeMap::new(),
                cwd: None,
            },
        )
    }

    /// Convenience constructor for a TCP backend.
    pub fn stream(id: impl Into<BackendId>, host: impl Into<String>, port: u16) -> Self {
        Self::new(
            id,
            TransportSpec::Stream {
                host: host.into(),
                port,
            },
        )
    }
}

/// Lifecycle of a backend connection.
///
/// `Unconnected → Connecting → {Ready | Failed} → Closed`. Only `Ready`
/// connections accept invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Ready,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn accepts_calls(self) -> bool {
        self == Self::Ready
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// What to do when two backends advertise the same tool name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// The first backend in descriptor order keeps the name.
    #[default]
    FirstRegistered,
    /// Every tool is exposed as `<backend>__<tool>`.
    Namespaced,
}

impl CollisionPolicy {
    /// The name a tool is exposed under in the merged namespace.
    pub fn exposed_name(self, backend: &BackendId, tool: &str) -> String {
        match self {
            Self::FirstRegistered => tool.to_string(),
            Self::Namespaced => format!("{backend}__{tool}"),
        }
    }
}

/// A tool as advertised by a backend during discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// The application-level reply of a backend to a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolReply {
    /// The tool ran and produced a payload.
    Data(serde_json::Value),
    /// The tool ran and reported a failure of its own.
    Failed(String),
}

/// A live, handshaken link to one backend.
///
/// Implementations must tolerate concurrent `call_tool`s, either by
/// multiplexing them on the transport or by serializing them.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// The tools this backend advertises.
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, BackendError>;

    /// Invoke one tool by its backend-local name.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolReply, BackendError>;

    /// Close the transport. Calling it more than once must be harmless.
    async fn close(&self) -> Result<(), BackendError>;

    /// Whether the transport is gone, either closed by us or dropped by the
    /// backend.
    fn is_closed(&self) -> bool;
}

/// Opens sessions to backends described by a [`BackendDescriptor`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Arc<dyn BackendSession>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_spec_target() {
        let pipe = BackendDescriptor::pipe("math", "cortex", vec!["serve".to_string()]);
        assert_eq!(pipe.transport.target(), "cortex serve");
        assert_eq!(pipe.transport.kind(), TransportKind::Pipe);

        let stream = BackendDescriptor::stream("sheets", "127.0.0.1", 8051);
        assert_eq!(stream.transport.target(), "127.0.0.1:8051");
        assert_eq!(stream.transport.kind(), TransportKind::Stream);
    }

    #[test]
    fn descriptor_serializes_with_transport_tag() {
        let stream = BackendDescriptor::stream("sheets", "localhost", 8051);
        let json = serde_json::to_value(&stream).unwrap();
        assert_eq!(json["id"], "sheets");
        assert_eq!(json["transport"], "stream");
        assert_eq!(json["port"], 8051);
    }

    #[test]
    fn remote_tool_defaults_schema() {
        let tool: RemoteTool = serde_json::from_value(serde_json::json!({
            "name": "send_email"
        }))
        .unwrap();
        assert_eq!(tool.name, "send_email");
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.output_schema.is_none());
    }

    #[test]
    fn namespaced_policy_prefixes_backend() {
        let id = BackendId::from("gmail");
        assert_eq!(
            CollisionPolicy::Namespaced.exposed_name(&id, "send_email"),
            "gmail__send_email"
        );
        assert_eq!(
            CollisionPolicy::default().exposed_name(&id, "send_email"),
            "send_email"
        );
    }

    #[test]
    fn only_ready_accepts_calls() {
        assert!(ConnectionState::Ready.accepts_calls());
        for state in [
            ConnectionState::Unconnected,
            ConnectionState::Connecting,
            ConnectionState::Failed,
            ConnectionState::Closed,
        ] {
            assert!(!state.accepts_calls(), "{state} must reject calls");
        }
    }
}
