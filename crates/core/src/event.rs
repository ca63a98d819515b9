//! Domain event system: decoupled observation of the dispatcher and loop.
//!
//! Events are published when something interesting happens. Front-ends and
//! tests can subscribe without the core knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A backend finished its handshake and discovery
    BackendReady {
        backend: String,
        tools: usize,
        timestamp: DateTime<Utc>,
    },

    /// A backend could not be brought up
    BackendFailed {
        backend: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool call completed (successfully or not)
    ToolInvoked {
        tool_name: String,
        backend: Option<String>,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The planner produced a decision
    PlannerDecided {
        session_id: String,
        iteration: usize,
        action: String, // "answer" or the tool name
        timestamp: DateTime<Utc>,
    },

    /// A request left the reasoning loop
    RequestFinished {
        session_id: String,
        outcome: String,
        iterations: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
