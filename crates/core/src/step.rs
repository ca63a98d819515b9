//! Conversation steps: the append-only history of one request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::{ToolCall, ToolResult};

/// What the loop did in one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// The planner answered; this is the terminal step.
    Answer { text: String },
    /// The planner asked for a tool and the dispatcher replied.
    Invoke { call: ToolCall, result: ToolResult },
}

/// One iteration of the reasoning loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStep {
    /// 1-based iteration this step belongs to.
    pub iteration: usize,
    pub action: StepAction,
    /// The text folded into history for the planner.
    pub observation: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationStep {
    pub fn answer(iteration: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            iteration,
            observation: text.clone(),
            action: StepAction::Answer { text },
            timestamp: Utc::now(),
        }
    }

    pub fn invoke(iteration: usize, call: ToolCall, result: ToolResult) -> Self {
        Self {
            iteration,
            observation: result.observation(),
            action: StepAction::Invoke { call, result },
            timestamp: Utc::now(),
        }
    }

    pub fn is_invoke(&self) -> bool {
        matches!(self.action, StepAction::Invoke { .. })
    }

    /// The tool call and its result, for invoke steps.
    pub fn invocation(&self) -> Option<(&ToolCall, &ToolResult)> {
        match &self.action {
            StepAction::Invoke { call, result } => Some((call, result)),
            StepAction::Answer { .. } => None,
        }
    }
}
