//! The LLM-backed planner and its text protocol.
//!
//! The model is shown the tool catalogue and asked to reply with exactly one
//! of two line formats:
//!
//! ```text
//! FUNCTION_CALL: {"name": "calculator", "arguments": {"expression": "2 + 2"}}
//! FINAL_ANSWER: 4
//! ```
//!
//! The final-answer marker is configurable; the function-call prefix is not.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use cortex_config::{AgentConfig, PlannerConfig};
use cortex_core::error::PlannerError;
use cortex_core::message::Message;
use cortex_core::planner::{Decision, Planner, PlanningRequest};
use cortex_core::provider::{Provider, ProviderRequest};
use cortex_core::step::StepAction;
use cortex_core::tool::{ToolCall, ToolDescriptor};
use serde_json::Value;
use tracing::debug;

/// Prefix of a tool-call line.
pub const FUNCTION_CALL_PREFIX: &str = "FUNCTION_CALL:";

/// Default prefix of a final-answer line.
pub const DEFAULT_FINAL_ANSWER_MARKER: &str = "FINAL_ANSWER:";

/// Longest reply excerpt carried in an `Unparseable` error.
const EXCERPT_CHARS: usize = 200;

/// A [`Planner`] that asks a chat model what to do next.
pub struct PromptPlanner {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    marker: String,
}

impl PromptPlanner {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            marker: DEFAULT_FINAL_ANSWER_MARKER.into(),
        }
    }

    /// Build from the `[planner]` and `[agent]` config sections.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        planner: &PlannerConfig,
        agent: &AgentConfig,
    ) -> Self {
        Self {
            provider,
            model: planner.model.clone(),
            temperature: planner.temperature,
            max_tokens: Some(planner.max_tokens),
            marker: agent.final_answer_marker.clone(),
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Instructions plus the tool catalogue.
    pub fn system_prompt(&self, tools: &[ToolDescriptor]) -> String {
        let mut prompt = String::from(
            "You are a reasoning agent. Solve the user's request step by step, \
             calling at most one tool per reply.\n\nAvailable tools:\n",
        );

        if tools.is_empty() {
            prompt.push_str("(none)\n");
        }
        for (i, tool) in tools.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {}: {}", i + 1, tool.name, tool.description);
            let _ = writeln!(prompt, "   Input schema: {}", tool.input_schema);
            if let Some(output) = &tool.output_schema {
                let _ = writeln!(prompt, "   Output schema: {output}");
            }
        }

        let _ = write!(
            prompt,
            "\nReply with exactly one line in one of these formats:\n\
             {FUNCTION_CALL_PREFIX} {{\"name\": \"<tool name>\", \"arguments\": {{...}}}}\n\
             {marker} <your answer>\n\n\
             Use the tool results you are given. If a tool fails, try a different \
             approach. Answer as soon as you have enough information.",
            marker = self.marker,
        );
        prompt
    }

    /// System prompt, the request, then one assistant/user pair per tool hop.
    fn messages(&self, request: &PlanningRequest<'_>) -> Vec<Message> {
        let mut messages = vec![
            Message::system(self.system_prompt(request.tools)),
            Message::user(request.request),
        ];

        for step in request.history {
            if let StepAction::Invoke { call, .. } = &step.action {
                messages.push(Message::assistant(format!(
                    "{FUNCTION_CALL_PREFIX} {}",
                    serde_json::json!({ "name": call.name, "arguments": call.arguments })
                )));
                messages.push(Message::user(format!(
                    "Result of {}: {}",
                    call.name, step.observation
                )));
            }
        }

        messages.push(Message::user(format!(
            "Step {} of {}. What is your next step?",
            request.iteration, request.max_iterations
        )));
        messages
    }
}

#[async_trait]
impl Planner for PromptPlanner {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn decide(&self, request: &PlanningRequest<'_>) -> Result<Decision, PlannerError> {
        let response = self
            .provider
            .complete(ProviderRequest {
                model: self.model.clone(),
                messages: self.messages(request),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                stop: vec![],
            })
            .await?;

        let reply = response.message.content;
        debug!(
            iteration = request.iteration,
            model = %response.model,
            reply = %reply,
            "Planner replied"
        );
        parse_decision(&reply, &self.marker)
    }
}

/// Parse a model reply into a decision.
///
/// The first line that starts with either prefix wins. A final answer keeps
/// its marker and everything after it, so multi-line answers survive.
pub fn parse_decision(reply: &str, marker: &str) -> Result<Decision, PlannerError> {
    let mut rest = reply;
    while !rest.is_empty() {
        let (line, tail) = rest.split_once('\n').unwrap_or((rest, ""));
        let trimmed = line.trim_start().trim_start_matches('`');

        if let Some(payload) = trimmed.strip_prefix(FUNCTION_CALL_PREFIX) {
            return parse_call(payload.trim().trim_end_matches('`')).map(Decision::Act);
        }
        if !marker.is_empty() && trimmed.starts_with(marker) {
            let answer = rest.trim_start().trim_start_matches('`').trim_end();
            return Ok(Decision::FinalAnswer(answer.to_string()));
        }
        rest = tail;
    }

    Err(PlannerError::Unparseable(excerpt(reply)))
}

fn parse_call(payload: &str) -> Result<ToolCall, PlannerError> {
    let value: Value = serde_json::from_str(payload).map_err(|e| {
        PlannerError::InvalidDecision(format!("{FUNCTION_CALL_PREFIX} payload is not JSON: {e}"))
    })?;

    let name = value
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| PlannerError::InvalidDecision("tool call has no \"name\"".into()))?;

    let arguments = match value.get("arguments") {
        None | Some(Value::Null) => serde_json::json!({}),
        Some(Value::Object(map)) => Value::Object(map.clone()),
        // Some models stringify the arguments object.
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => {
                return Err(PlannerError::InvalidDecision(
                    "tool call \"arguments\" must be an object".into(),
                ));
            }
        },
        Some(_) => {
            return Err(PlannerError::InvalidDecision(
                "tool call \"arguments\" must be an object".into(),
            ));
        }
    };

    Ok(ToolCall::new(name.trim(), arguments))
}

/// Remove the leading final-answer marker and surrounding whitespace.
///
/// Later occurrences of the marker belong to the answer and are kept.
pub fn strip_final_marker(text: &str, marker: &str) -> String {
    let text = text.trim_start();
    text.strip_prefix(marker).unwrap_or(text).trim().to_string()
}

fn excerpt(reply: &str) -> String {
    let trimmed = reply.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    format!("{cut}...")
}
