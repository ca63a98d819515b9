//! Per-request working state.

use chrono::{DateTime, Utc};
use cortex_core::step::ConversationStep;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One request's history. Created by the loop, discarded after the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub request: String,
    /// Append-only, in iteration order.
    pub steps: Vec<ConversationStep>,
    /// Tool invocations so far; bounded by the iteration budget.
    pub iterations: usize,
    pub finished: bool,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request: request.into(),
            steps: Vec::new(),
            iterations: 0,
            finished: false,
            started_at: Utc::now(),
        }
    }

    pub fn push(&mut self, step: ConversationStep) {
        self.steps.push(step);
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Number of tool invocations recorded so far.
    pub fn invocations(&self) -> usize {
        self.steps.iter().filter(|s| s.is_invoke()).count()
    }

    /// The terminal answer step's text, if the planner answered.
    pub fn answer(&self) -> Option<&str> {
        self.steps.last().and_then(|step| match &step.action {
            cortex_core::step::StepAction::Answer { text } => Some(text.as_str()),
            cortex_core::step::StepAction::Invoke { .. } => None,
        })
    }
}
