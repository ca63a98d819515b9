//! # Cortex Core
//!
//! Domain types, traits, and error definitions for the Cortex tool-dispatching
//! agent. This crate does no I/O; it defines the domain model that all other
//! crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is defined as a trait here ([`Dispatch`], [`Connector`],
//! [`BackendSession`], [`Planner`], [`Provider`], [`Tool`]). Implementations
//! live in their respective crates, and tests swap in scripted doubles.

pub mod backend;
pub mod error;
pub mod event;
pub mod message;
pub mod planner;
pub mod provider;
pub mod rpc;
pub mod step;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use backend::{
    BackendDescriptor, BackendId, BackendSession, CollisionPolicy, ConnectionState, Connector,
    RemoteTool, ToolReply, TransportKind, TransportSpec,
};
pub use error::{
    BackendError, BackendFailure, DispatchError, Error, PlannerError, ProviderError, Result,
    ToolError,
};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, Role};
pub use planner::{Decision, Planner, PlanningRequest};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use step::{ConversationStep, StepAction};
pub use tool::{
    Dispatch, Tool, ToolCall, ToolDescriptor, ToolErrorKind, ToolOutcome, ToolRegistry,
    ToolResult,
};
