//! Tool types: the uniform call contract shared by every backend.
//!
//! The agent side sees tools as [`ToolDescriptor`]s in one merged namespace
//! and exchanges [`ToolCall`]s for [`ToolResult`]s through a [`Dispatch`]
//! implementation. The server side hosts tools as [`Tool`] trait objects
//! collected in an explicit [`ToolRegistry`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::backend::{BackendId, RemoteTool};
use crate::error::ToolError;

/// A tool in the dispatcher's merged namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Globally unique name after merge.
    pub name: String,

    /// Description shown to the planner.
    #[serde(default)]
    pub description: String,

    /// JSON Schema of the arguments.
    pub input_schema: serde_json::Value,

    /// JSON Schema of the success payload, when the backend publishes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,

    /// The backend that owns this tool.
    pub backend: BackendId,

    /// The tool's name on its backend (differs from `name` when namespaced).
    pub remote_name: String,
}

impl ToolDescriptor {
    /// Build a descriptor for a tool discovered on `backend`.
    pub fn from_remote(backend: &BackendId, exposed_name: String, tool: RemoteTool) -> Self {
        Self {
            name: exposed_name,
            description: tool.description.unwrap_or_default(),
            input_schema: tool.input_schema,
            output_schema: tool.output_schema,
            backend: backend.clone(),
            remote_name: tool.name,
        }
    }
}

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON object
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Create a call with a fresh id.
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// Why a tool call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// The owning backend never became ready or has been closed.
    BackendUnavailable,
    /// The backend did not answer within the per-call bound.
    BackendTimeout,
    /// No ready backend advertises this name.
    ToolNotFound,
    /// The backend ran the tool and the tool reported a failure.
    ToolInvocationError,
    /// The transport broke or the backend spoke nonsense mid-call.
    Transport,
    /// The request was cancelled while the call was in flight.
    Cancelled,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BackendUnavailable => "backend_unavailable",
            Self::BackendTimeout => "backend_timeout",
            Self::ToolNotFound => "tool_not_found",
            Self::ToolInvocationError => "tool_invocation_error",
            Self::Transport => "transport",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Success payload or failure description of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success {
        data: serde_json::Value,
    },
    Error {
        kind: ToolErrorKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backend: Option<BackendId>,
    },
}

/// The result of a tool call. Immutable once produced.
///
/// Serializes to the wire contract `{"status": "success", "data": ...}` or
/// `{"status": "error", "kind": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The tool that was asked for
    pub tool_name: String,

    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, data: serde_json::Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Success { data },
        }
    }

    pub fn failure(
        call: &ToolCall,
        kind: ToolErrorKind,
        message: impl Into<String>,
        backend: Option<BackendId>,
    ) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Error {
                kind,
                message: message.into(),
                backend,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    /// The failure kind, if this result is a failure.
    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match &self.outcome {
            ToolOutcome::Success { .. } => None,
            ToolOutcome::Error { kind, .. } => Some(*kind),
        }
    }

    /// Text folded into the conversation history for the planner.
    pub fn observation(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { data } => match data {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            ToolOutcome::Error {
                kind,
                message,
                backend: Some(backend),
            } => format!("Error ({kind}, backend {backend}): {message}"),
            ToolOutcome::Error { kind, message, .. } => format!("Error ({kind}): {message}"),
        }
    }
}

/// The call-by-name surface the reasoning loop drives.
///
/// Implementations never fail: every outcome is an explicit `ToolResult`.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// The merged tool catalogue.
    fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// Execute one call.
    async fn invoke(&self, call: &ToolCall) -> ToolResult;
}

/// A tool hosted by a tool server.
///
/// Each handler declares its name, description and schemas up front; the
/// registry is built explicitly at startup.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the planner).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's arguments.
    fn input_schema(&self) -> serde_json::Value;

    /// JSON Schema describing the success payload.
    fn output_schema(&self) -> Option<serde_json::Value> {
        None
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError>;

    /// Convert this tool into its discovery entry.
    fn to_remote(&self) -> RemoteTool {
        RemoteTool {
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            input_schema: self.input_schema(),
            output_schema: self.output_schema(),
        }
    }
}

/// A registry of hosted tools, in registration order.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Discovery entries for every tool.
    pub fn definitions(&self) -> Vec<RemoteTool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.to_remote())
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(arguments).await
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
