//! The dispatcher: many backends behind one callable tool namespace.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use cortex_config::DispatcherConfig;
use cortex_core::backend::{
    BackendDescriptor, BackendId, CollisionPolicy, ConnectionState, Connector, ToolReply,
};
use cortex_core::error::{BackendError, BackendFailure, DispatchError};
use cortex_core::event::{DomainEvent, EventBus};
use cortex_core::tool::{Dispatch, ToolCall, ToolDescriptor, ToolErrorKind, ToolResult};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connection::BackendConnection;

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Bound on connect + handshake + discovery, per backend.
    pub connect_timeout: Duration,
    /// Bound on one forwarded call.
    pub call_timeout: Duration,
    pub collision_policy: CollisionPolicy,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from(&DispatcherConfig::default())
    }
}

impl From<&DispatcherConfig> for DispatcherSettings {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            call_timeout: config.call_timeout(),
            collision_policy: config.collision_policy,
        }
    }
}

/// Where a merged name is forwarded to.
#[derive(Debug, Clone)]
struct Route {
    connection: usize,
    remote_name: String,
}

/// Owns every backend connection and the merged name map.
///
/// The name map is fixed after [`initialize`](Self::initialize); only
/// [`shutdown`](Self::shutdown) changes connection state afterwards.
pub struct Dispatcher {
    connections: Vec<BackendConnection>,
    catalogue: Vec<ToolDescriptor>,
    routes: HashMap<String, Route>,
    failures: Vec<BackendFailure>,
    settings: DispatcherSettings,
    events: Option<Arc<EventBus>>,
    shut_down: AtomicBool,
}

impl Dispatcher {
    /// Connect to every backend concurrently and merge their tools.
    ///
    /// Individual failures are recorded and tolerated. Fails only when the
    /// descriptor set is empty or no backend became ready.
    pub async fn initialize(
        descriptors: Vec<BackendDescriptor>,
        connector: Arc<dyn Connector>,
        settings: DispatcherSettings,
    ) -> Result<Self, DispatchError> {
        Self::initialize_with_events(descriptors, connector, settings, None).await
    }

    /// Like [`initialize`](Self::initialize), publishing backend and
    /// invocation events to `events`.
    pub async fn initialize_with_events(
        descriptors: Vec<BackendDescriptor>,
        connector: Arc<dyn Connector>,
        settings: DispatcherSettings,
        events: Option<Arc<EventBus>>,
    ) -> Result<Self, DispatchError> {
        if descriptors.is_empty() {
            return Err(DispatchError::NoBackends);
        }

        info!(backends = descriptors.len(), "Initializing dispatcher");
        let attempts = descriptors.into_iter().map(|descriptor| {
            BackendConnection::new(descriptor)
                .establish(connector.as_ref(), settings.connect_timeout)
        });
        let connections = join_all(attempts).await;

        let mut failures = Vec::new();
        for conn in &connections {
            match (conn.state(), conn.error()) {
                (ConnectionState::Ready, _) => {
                    publish(&events, DomainEvent::BackendReady {
                        backend: conn.id().to_string(),
                        tools: conn.tools().len(),
                        timestamp: Utc::now(),
                    });
                }
                (_, error) => {
                    let error = error
                        .cloned()
                        .unwrap_or_else(|| BackendError::Closed(conn.id().clone()));
                    publish(&events, DomainEvent::BackendFailed {
                        backend: conn.id().to_string(),
                        error_message: error.to_string(),
                        timestamp: Utc::now(),
                    });
                    failures.push(BackendFailure {
                        backend: conn.id().clone(),
                        error,
                    });
                }
            }
        }

        if failures.len() == connections.len() {
            return Err(DispatchError::NoBackendsReady { failures });
        }

        let (catalogue, routes) = merge(&connections, settings.collision_policy);
        info!(
            ready = connections.len() - failures.len(),
            failed = failures.len(),
            tools = catalogue.len(),
            "Dispatcher ready"
        );

        Ok(Self {
            connections,
            catalogue,
            routes,
            failures,
            settings,
            events,
            shut_down: AtomicBool::new(false),
        })
    }

    /// The merged catalogue of every Ready backend, in descriptor order then
    /// discovery order.
    pub fn list_tools(&self) -> &[ToolDescriptor] {
        &self.catalogue
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.catalogue.iter().find(|t| t.name == name)
    }

    /// Backends that never became Ready, with the reason.
    pub fn failures(&self) -> &[BackendFailure] {
        &self.failures
    }

    pub fn ready_backends(&self) -> Vec<&BackendId> {
        self.connections
            .iter()
            .filter(|c| c.state() == ConnectionState::Ready)
            .map(BackendConnection::id)
            .collect()
    }

    pub fn backend_state(&self, id: &BackendId) -> Option<ConnectionState> {
        self.connections
            .iter()
            .find(|c| c.id() == id)
            .map(BackendConnection::state)
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Execute one call. Every outcome, including failures, is a `ToolResult`.
    pub async fn invoke(&self, call: &ToolCall) -> ToolResult {
        let Some(route) = self.routes.get(&call.name) else {
            debug!(tool = %call.name, "Unknown tool requested");
            return ToolResult::failure(
                call,
                ToolErrorKind::ToolNotFound,
                format!("No tool named '{}' is available", call.name),
                None,
            );
        };

        let conn = &self.connections[route.connection];
        let backend = conn.id().clone();
        let arguments = match &call.arguments {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.settings.call_timeout, conn.call(&route.remote_name, arguments))
                .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(ToolReply::Data(data))) => ToolResult::success(call, data),
            Ok(Ok(ToolReply::Failed(message))) => ToolResult::failure(
                call,
                ToolErrorKind::ToolInvocationError,
                message,
                Some(backend.clone()),
            ),
            Ok(Err(error)) => {
                ToolResult::failure(call, error_kind(&error), error.to_string(), Some(backend.clone()))
            }
            Err(_) => ToolResult::failure(
                call,
                ToolErrorKind::BackendTimeout,
                format!(
                    "Backend {backend} did not reply within {}ms",
                    self.settings.call_timeout.as_millis()
                ),
                Some(backend.clone()),
            ),
        };

        match result.error_kind() {
            None => debug!(tool = %call.name, backend = %backend, duration_ms, "Tool call succeeded"),
            Some(kind) => warn!(
                tool = %call.name,
                backend = %backend,
                %kind,
                duration_ms,
                "Tool call failed"
            ),
        }
        publish(&self.events, DomainEvent::ToolInvoked {
            tool_name: call.name.clone(),
            backend: Some(backend.to_string()),
            success: result.is_success(),
            duration_ms,
            timestamp: Utc::now(),
        });

        result
    }

    /// Invoke several calls concurrently. Results are in input order.
    pub async fn invoke_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.invoke(call))).await
    }

    /// Close every connection. Close failures are logged, never raised.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let closes = self.connections.iter().map(|conn| async move {
            if let Err(e) = conn.close().await {
                warn!(backend = %conn.id(), error = %e, "Error while closing backend");
            }
        });
        join_all(closes).await;
        info!("Dispatcher shut down");
    }
}

fn publish(events: &Option<Arc<EventBus>>, event: DomainEvent) {
    if let Some(bus) = events {
        bus.publish(event);
    }
}

fn error_kind(error: &BackendError) -> ToolErrorKind {
    match error {
        BackendError::Remote { .. } => ToolErrorKind::ToolInvocationError,
        BackendError::Timeout { .. } => ToolErrorKind::BackendTimeout,
        BackendError::Transport { .. } | BackendError::Protocol { .. } => ToolErrorKind::Transport,
        BackendError::Closed(_)
        | BackendError::Spawn { .. }
        | BackendError::Connect { .. }
        | BackendError::Handshake { .. } => ToolErrorKind::BackendUnavailable,
    }
}

/// Build the merged catalogue and name map from Ready connections.
fn merge(
    connections: &[BackendConnection],
    policy: CollisionPolicy,
) -> (Vec<ToolDescriptor>, HashMap<String, Route>) {
    let mut catalogue = Vec::new();
    let mut routes: HashMap<String, Route> = HashMap::new();

    for (index, conn) in connections.iter().enumerate() {
        if conn.state() != ConnectionState::Ready {
            continue;
        }
        for tool in conn.tools() {
            let exposed = policy.exposed_name(conn.id(), &tool.name);
            if let Some(existing) = routes.get(&exposed) {
                warn!(
                    tool = %exposed,
                    kept = %connections[existing.connection].id(),
                    dropped = %conn.id(),
                    "Duplicate tool name, keeping the first registration"
                );
                continue;
            }
            routes.insert(
                exposed.clone(),
                Route {
                    connection: index,
                    remote_name: tool.name.clone(),
                },
            );
            catalogue.push(ToolDescriptor::from_remote(conn.id(), exposed, tool.clone()));
        }
    }

    (catalogue, routes)
}

#[async_trait]
impl Dispatch for Dispatcher {
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.catalogue.clone()
    }

    async fn invoke(&self, call: &ToolCall) -> ToolResult {
        Dispatcher::invoke(self, call).await
    }
}
