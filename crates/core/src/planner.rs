//! Planner trait: the decision collaborator consulted every iteration.
//!
//! A planner sees the original request, the history so far and the tool
//! catalogue, and either answers or asks for exactly one tool call.

use async_trait::async_trait;

use crate::error::PlannerError;
use crate::step::ConversationStep;
use crate::tool::{ToolCall, ToolDescriptor};

/// Everything the planner is shown for one decision.
#[derive(Debug, Clone, Copy)]
pub struct PlanningRequest<'a> {
    pub request: &'a str,
    pub history: &'a [ConversationStep],
    pub tools: &'a [ToolDescriptor],
    /// 1-based iteration about to be decided.
    pub iteration: usize,
    pub max_iterations: usize,
}

/// The planner's choice for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Stop and answer. The text may still carry the final-answer marker.
    FinalAnswer(String),
    /// Invoke one tool and come back.
    Act(ToolCall),
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn decide(&self, request: &PlanningRequest<'_>) -> Result<Decision, PlannerError>;
}
