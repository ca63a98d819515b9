//! End-to-end tests for the Cortex agent.
//!
//! These run the full pipeline: config, dispatcher, real tool servers (TCP
//! and the `cortex serve` binary over a pipe), the prompt planner and the
//! reasoning loop. Only the language model is scripted.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cortex_agent::{LoopSettings, PromptPlanner, ReasoningLoop, RunOutcome};
use cortex_config::AppConfig;
use cortex_core::backend::{BackendDescriptor, ConnectionState};
use cortex_core::error::ProviderError;
use cortex_core::message::Message;
use cortex_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use cortex_core::tool::ToolErrorKind;
use cortex_dispatch::{Dispatcher, DispatcherSettings, TransportConnector};
use cortex_tools::{ToolServer, default_registry};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// ── Scripted model ───────────────────────────────────────────────────────

/// Replays canned completions in order and keeps every request.
struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn repeating(reply: &str, times: usize) -> Self {
        Self::new(&vec![reply; times])
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_prompt(&self) -> Vec<Message> {
        self.requests.lock().unwrap().last().unwrap().messages.clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider exhausted");
        Ok(ProviderResponse {
            message: Message::assistant(reply),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "scripted".into(),
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

async fn spawn_tcp_server(name: &str) -> (u16, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let shutdown = CancellationToken::new();
    let server = ToolServer::new(default_registry()).with_name(name);
    let token = shutdown.clone();
    tokio::spawn(async move { server.serve_tcp(listener, token).await });
    (port, shutdown)
}

fn dead_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn settings() -> DispatcherSettings {
    DispatcherSettings {
        connect_timeout: Duration::from_secs(10),
        call_timeout: Duration::from_secs(10),
        ..DispatcherSettings::default()
    }
}

fn agent(provider: Arc<ScriptedProvider>) -> ReasoningLoop {
    let planner = PromptPlanner::new(provider, "scripted");
    ReasoningLoop::new(Arc::new(planner), LoopSettings::default())
}

// ── E2E: reasoning over a TCP tool server ────────────────────────────────

#[tokio::test]
async fn e2e_two_hop_request_over_tcp() {
    let (port, shutdown) = spawn_tcp_server("math").await;
    let dispatcher = Dispatcher::initialize(
        vec![BackendDescriptor::stream("math", "127.0.0.1", port)],
        Arc::new(TransportConnector),
        settings(),
    )
    .await
    .unwrap();

    let provider = Arc::new(ScriptedProvider::new(&[
        r#"FUNCTION_CALL: {"name": "ascii_values", "arguments": {"text": "INDIA"}}"#,
        r#"FUNCTION_CALL: {"name": "exponential_sum", "arguments": {"values": [73, 78, 68, 73, 65]}}"#,
        "The sum is computed.\nFINAL_ANSWER: about 7.59e33",
    ]));
    let agent = agent(provider.clone());

    let report = agent
        .run_session(
            "Find the ASCII values of INDIA and sum their exponentials",
            &dispatcher,
            CancellationToken::new(),
        )
        .await;

    assert_eq!(report.outcome, RunOutcome::Answered);
    assert_eq!(report.answer, "about 7.59e33");
    assert_eq!(report.session.invocations(), 2);
    assert!(report.session.steps[0].observation.contains("[73,78,68,73,65]"));
    assert!(report.session.steps[1].invocation().unwrap().1.is_success());

    // The model saw the catalogue and both observations.
    let prompt = provider.last_prompt();
    assert!(prompt[0].content.contains("exponential_sum"));
    assert!(prompt.iter().any(|m| m.content.contains("Result of exponential_sum")));

    dispatcher.shutdown().await;
    shutdown.cancel();
}

#[tokio::test]
async fn e2e_direct_answer_makes_no_tool_calls() {
    let (port, shutdown) = spawn_tcp_server("math").await;
    let dispatcher = Dispatcher::initialize(
        vec![BackendDescriptor::stream("math", "127.0.0.1", port)],
        Arc::new(TransportConnector),
        settings(),
    )
    .await
    .unwrap();

    let provider = Arc::new(ScriptedProvider::new(&["FINAL_ANSWER: 4"]));
    let answer = agent(provider.clone()).run("2+2?", &dispatcher).await.unwrap();

    assert_eq!(answer, "4");
    assert_eq!(provider.calls(), 1);

    dispatcher.shutdown().await;
    shutdown.cancel();
}

#[tokio::test]
async fn e2e_tool_failure_is_observed_and_recovered() {
    let (port, shutdown) = spawn_tcp_server("math").await;
    let dispatcher = Dispatcher::initialize(
        vec![BackendDescriptor::stream("math", "127.0.0.1", port)],
        Arc::new(TransportConnector),
        settings(),
    )
    .await
    .unwrap();

    let provider = Arc::new(ScriptedProvider::new(&[
        r#"FUNCTION_CALL: {"name": "calculator", "arguments": {"expression": "10 / 0"}}"#,
        r#"FUNCTION_CALL: {"name": "calculator", "arguments": {"expression": "10 / 4"}}"#,
        "FINAL_ANSWER: 2.5",
    ]));
    let report = agent(provider)
        .run_session("10 divided by 4?", &dispatcher, CancellationToken::new())
        .await;

    assert_eq!(report.answer, "2.5");
    let first = report.session.steps[0].invocation().unwrap().1;
    assert_eq!(first.error_kind(), Some(ToolErrorKind::ToolInvocationError));
    assert!(report.session.steps[1].invocation().unwrap().1.is_success());

    dispatcher.shutdown().await;
    shutdown.cancel();
}

#[tokio::test]
async fn e2e_budget_exhaustion_with_real_backend() {
    let (port, shutdown) = spawn_tcp_server("math").await;
    let dispatcher = Dispatcher::initialize(
        vec![BackendDescriptor::stream("math", "127.0.0.1", port)],
        Arc::new(TransportConnector),
        settings(),
    )
    .await
    .unwrap();

    let provider = Arc::new(ScriptedProvider::repeating(
        r#"FUNCTION_CALL: {"name": "calculator", "arguments": {"expression": "1 + 1"}}"#,
        8,
    ));
    let report = agent(provider.clone())
        .run_session("never done", &dispatcher, CancellationToken::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::BudgetExhausted);
    assert_eq!(report.answer, LoopSettings::default().fallback_answer);
    assert_eq!(report.session.invocations(), 8);
    assert_eq!(provider.calls(), 8);

    dispatcher.shutdown().await;
    shutdown.cancel();
}

// ── E2E: the `cortex serve` binary as a pipe backend ─────────────────────

#[tokio::test]
async fn e2e_pipe_backend_runs_the_serve_binary() {
    let dispatcher = Dispatcher::initialize(
        vec![BackendDescriptor::pipe(
            "local",
            env!("CARGO_BIN_EXE_cortex"),
            vec!["serve".to_string()],
        )],
        Arc::new(TransportConnector),
        settings(),
    )
    .await
    .unwrap();

    let names: Vec<_> = dispatcher.list_tools().iter().map(|t| t.name.clone()).collect();
    assert_eq!(names, vec!["calculator", "ascii_values", "exponential_sum"]);

    let provider = Arc::new(ScriptedProvider::new(&[
        r#"FUNCTION_CALL: {"name": "calculator", "arguments": {"expression": "2 ^ 10"}}"#,
        "FINAL_ANSWER: 1024",
    ]));
    let report = agent(provider)
        .run_session("2 to the 10th?", &dispatcher, CancellationToken::new())
        .await;

    assert_eq!(report.answer, "1024");
    assert!(report.session.steps[0].observation.contains("1024"));

    dispatcher.shutdown().await;
    dispatcher.shutdown().await;
}

// ── E2E: configuration drives the whole stack ────────────────────────────

#[tokio::test]
async fn e2e_config_file_with_one_dead_backend() {
    let (port, shutdown) = spawn_tcp_server("math").await;
    let dead = dead_port();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[agent]
max_iterations = 4

[dispatcher]
connect_timeout_secs = 5
collision_policy = "namespaced"

[[backends]]
id = "math"
transport = "stream"
host = "127.0.0.1"
port = {port}

[[backends]]
id = "sheets"
transport = "stream"
host = "127.0.0.1"
port = {dead}

[[backends]]
id = "disabled"
enabled = false
transport = "pipe"
command = "does-not-matter"
"#
    )
    .unwrap();

    let config = AppConfig::load_from(file.path()).unwrap();
    let dispatcher = Dispatcher::initialize(
        config.backend_descriptors().unwrap(),
        Arc::new(TransportConnector),
        DispatcherSettings::from(&config.dispatcher),
    )
    .await
    .unwrap();

    assert_eq!(dispatcher.failures().len(), 1);
    assert_eq!(
        dispatcher.backend_state(&"sheets".into()),
        Some(ConnectionState::Failed)
    );
    assert!(dispatcher.tool("math__calculator").is_some());

    let provider = Arc::new(ScriptedProvider::new(&[
        r#"FUNCTION_CALL: {"name": "sheets__append", "arguments": {"row": [1]}}"#,
        r#"FUNCTION_CALL: {"name": "math__calculator", "arguments": {"expression": "3 * 3"}}"#,
        "FINAL_ANSWER: 9",
    ]));
    let planner = PromptPlanner::from_config(provider, &config.planner, &config.agent);
    let agent = ReasoningLoop::new(Arc::new(planner), LoopSettings::from_config(&config));

    let report = agent
        .run_session("3 squared", &dispatcher, CancellationToken::new())
        .await;

    assert_eq!(report.answer, "9");
    let missing = report.session.steps[0].invocation().unwrap().1;
    assert_eq!(missing.error_kind(), Some(ToolErrorKind::ToolNotFound));
    assert!(report.session.steps[1].invocation().unwrap().1.is_success());

    dispatcher.shutdown().await;
    shutdown.cancel();
}

// ── E2E: the CLI binary ──────────────────────────────────────────────────

#[tokio::test]
async fn e2e_cli_tools_lists_the_catalogue() {
    let (port, shutdown) = spawn_tcp_server("math").await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[[backends]]
id = "math"
transport = "stream"
host = "127.0.0.1"
port = {port}
"#
    )
    .unwrap();

    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_cortex"))
        .arg("tools")
        .arg("--config")
        .arg(file.path())
        .output()
        .await
        .unwrap();

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("calculator"));
    assert!(stdout.contains("exponential_sum"));
    assert!(stdout.contains("math"));

    shutdown.cancel();
}

#[tokio::test]
async fn e2e_cli_rejects_invalid_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[[backends]]
id = "broken"
transport = "carrier-pigeon"
"#
    )
    .unwrap();

    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_cortex"))
        .arg("tools")
        .arg("--config")
        .arg(file.path())
        .output()
        .await
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to load config"));
}
