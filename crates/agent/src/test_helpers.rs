//! Scripted doubles for loop and planner tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use cortex_core::backend::BackendId;
use cortex_core::error::{PlannerError, ProviderError};
use cortex_core::message::Message;
use cortex_core::planner::{Decision, Planner, PlanningRequest};
use cortex_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use cortex_core::tool::{Dispatch, ToolCall, ToolDescriptor, ToolErrorKind, ToolResult};

/// One scripted planner reply.
pub enum Script {
    Decide(Decision),
    Fail(PlannerError),
    /// Never answer.
    Hang,
}

/// A planner that replays a script and records what it was shown.
///
/// Returns `Unparseable` once the script runs out.
pub struct ScriptedPlanner {
    script: Mutex<VecDeque<Script>>,
    seen: Mutex<Vec<usize>>,
}

impl ScriptedPlanner {
    pub fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Number of consultations so far.
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// History length passed to each consultation.
    pub fn seen_history_lengths(&self) -> Vec<usize> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, request: &PlanningRequest<'_>) -> Result<Decision, PlannerError> {
        self.seen.lock().unwrap().push(request.history.len());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Script::Decide(decision)) => Ok(decision),
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Hang) => std::future::pending().await,
            None => Err(PlannerError::Unparseable("script exhausted".into())),
        }
    }
}

/// A scripted tool reply.
#[derive(Clone)]
pub enum Stub {
    Data(serde_json::Value),
    Fail(ToolErrorKind, String),
    Hang,
}

/// An in-memory [`Dispatch`] with per-tool reply queues.
pub struct FakeDispatch {
    tools: Vec<ToolDescriptor>,
    replies: Mutex<HashMap<String, VecDeque<Stub>>>,
    fallback: Option<Stub>,
    calls: Mutex<Vec<ToolCall>>,
}

impl FakeDispatch {
    pub fn new(names: &[&str]) -> Self {
        let backend = BackendId::from("fake");
        let tools = names
            .iter()
            .map(|name| ToolDescriptor {
                name: name.to_string(),
                description: format!("{name} tool"),
                input_schema: serde_json::json!({"type": "object"}),
                output_schema: None,
                backend: backend.clone(),
                remote_name: name.to_string(),
            })
            .collect();
        Self {
            tools,
            replies: Mutex::new(HashMap::new()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply for `tool`. Replies are used in order.
    pub fn on(self, tool: &str, stub: Stub) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(tool.to_string())
            .or_default()
            .push_back(stub);
        self
    }

    /// Reply used when a tool's queue is empty.
    pub fn fallback(mut self, stub: Stub) -> Self {
        self.fallback = Some(stub);
        self
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatch for FakeDispatch {
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.clone()
    }

    async fn invoke(&self, call: &ToolCall) -> ToolResult {
        if !self.tools.iter().any(|t| t.name == call.name) {
            return ToolResult::failure(
                call,
                ToolErrorKind::ToolNotFound,
                format!("unknown tool '{}'", call.name),
                None,
            );
        }
        self.calls.lock().unwrap().push(call.clone());

        let stub = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&call.name)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.fallback.clone());

        match stub {
            Some(Stub::Data(data)) => ToolResult::success(call, data),
            Some(Stub::Fail(kind, message)) => ToolResult::failure(call, kind, message, None),
            Some(Stub::Hang) => std::future::pending().await,
            None => ToolResult::success(call, serde_json::Value::Null),
        }
    }
}

/// A provider that replays canned completions and records requests.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::ApiError {
                status_code: 500,
                message: "no scripted reply left".into(),
            }))?;

        Ok(ProviderResponse {
            message: Message::assistant(reply),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model,
        })
    }
}
