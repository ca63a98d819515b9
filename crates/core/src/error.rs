//! Error types for the Cortex domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the dispatcher converts
//! backend errors into `ToolResult` data so they never unwind the loop.

use crate::backend::BackendId;
use thiserror::Error;

/// The top-level error type for Cortex operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Backend errors ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // --- Dispatcher errors ---
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    // --- Planner errors ---
    #[error("Planner error: {0}")]
    Planner(#[from] PlannerError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures of a single backend connection or call.
///
/// These never reach the reasoning loop as errors: the dispatcher turns
/// them into failed `ToolResult`s tagged with the backend id.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Failed to spawn backend {backend}: {reason}")]
    Spawn { backend: BackendId, reason: String },

    #[error("Cannot connect to backend {backend}: {reason}")]
    Connect { backend: BackendId, reason: String },

    #[error("Handshake with backend {backend} failed: {reason}")]
    Handshake { backend: BackendId, reason: String },

    #[error("Backend {backend} timed out after {timeout_ms}ms during {operation}")]
    Timeout {
        backend: BackendId,
        operation: String,
        timeout_ms: u64,
    },

    #[error("Transport error on backend {backend}: {reason}")]
    Transport { backend: BackendId, reason: String },

    #[error("Backend {backend} returned error {code}: {message}")]
    Remote {
        backend: BackendId,
        code: i64,
        message: String,
    },

    #[error("Protocol violation from backend {backend}: {reason}")]
    Protocol { backend: BackendId, reason: String },

    #[error("Backend {0} is closed")]
    Closed(BackendId),
}

impl BackendError {
    /// The backend this error originated from.
    pub fn backend(&self) -> &BackendId {
        match self {
            Self::Spawn { backend, .. }
            | Self::Connect { backend, .. }
            | Self::Handshake { backend, .. }
            | Self::Timeout { backend, .. }
            | Self::Transport { backend, .. }
            | Self::Remote { backend, .. }
            | Self::Protocol { backend, .. } => backend,
            Self::Closed(backend) => backend,
        }
    }
}

/// A backend that never became Ready, with the reason.
#[derive(Debug, Clone)]
pub struct BackendFailure {
    pub backend: BackendId,
    pub error: BackendError,
}

impl std::fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.backend, self.error)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No backends configured")]
    NoBackends,

    #[error("No backend became ready ({} failed): {}", .failures.len(), summarize(.failures))]
    NoBackendsReady { failures: Vec<BackendFailure> },
}

fn summarize(failures: &[BackendFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures of the decision collaborator. Fatal to the current request only.
#[derive(Debug, Clone, Error)]
pub enum PlannerError {
    #[error("Planner provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Planner returned an unparseable decision: {0}")]
    Unparseable(String),

    #[error("Planner decision is invalid: {0}")]
    InvalidDecision(String),

    #[error("Planner timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// Errors raised by tool handlers hosted in a tool server.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
