//! The reasoning loop implementation.
//!
//! Each request runs `decide → act → observe` until the planner answers,
//! the iteration budget runs out, the planner fails, or the request is
//! cancelled. Tool failures never end a request; they are folded into the
//! history as observations so the planner can recover.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cortex_config::AppConfig;
use cortex_core::error::PlannerError;
use cortex_core::event::{DomainEvent, EventBus};
use cortex_core::planner::{Decision, Planner, PlanningRequest};
use cortex_core::step::ConversationStep;
use cortex_core::tool::{Dispatch, ToolErrorKind, ToolResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::planner::strip_final_marker;
use crate::session::Session;

/// Loop policy, resolved once from configuration.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_iterations: usize,
    pub final_answer_marker: String,
    /// Returned when the budget runs out.
    pub fallback_answer: String,
    /// Returned when the planner fails or the request is cancelled.
    pub failure_answer: String,
    pub planner_timeout: Duration,
    /// Extra attempts after a failed planner consultation.
    pub planner_retries: u32,
    pub request_timeout: Option<Duration>,
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_iterations: config.agent.max_iterations,
            final_answer_marker: config.agent.final_answer_marker.clone(),
            fallback_answer: config.agent.fallback_answer.clone(),
            failure_answer: config.agent.failure_answer.clone(),
            planner_timeout: config.planner.timeout(),
            planner_retries: config.planner.max_retries,
            request_timeout: config.agent.request_timeout(),
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// How a request left the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Answered,
    BudgetExhausted,
    PlannerFailed,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::BudgetExhausted => "budget_exhausted",
            Self::PlannerFailed => "planner_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoopError {
    #[error("request cancelled")]
    Cancelled,

    #[error("request exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

/// The answer plus the full history of one request.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub answer: String,
    pub outcome: RunOutcome,
    pub session: Session,
}

/// Drives one request at a time against a [`Dispatch`] implementation.
pub struct ReasoningLoop {
    planner: Arc<dyn Planner>,
    settings: LoopSettings,
    events: Option<Arc<EventBus>>,
}

impl ReasoningLoop {
    pub fn new(planner: Arc<dyn Planner>, settings: LoopSettings) -> Self {
        Self {
            planner,
            settings,
            events: None,
        }
    }

    /// Publish `PlannerDecided` and `RequestFinished` events on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Answer one request.
    pub async fn run(&self, request: &str, dispatcher: &dyn Dispatch) -> Result<String, LoopError> {
        self.run_with_cancel(request, dispatcher, CancellationToken::new())
            .await
    }

    /// Answer one request, stopping early when `cancel` fires or the
    /// configured request deadline passes.
    pub async fn run_with_cancel(
        &self,
        request: &str,
        dispatcher: &dyn Dispatch,
        cancel: CancellationToken,
    ) -> Result<String, LoopError> {
        let scoped = cancel.child_token();
        let run = self.run_session(request, dispatcher, scoped.clone());
        tokio::pin!(run);

        let report = match self.settings.request_timeout {
            None => run.await,
            Some(limit) => {
                let finished = tokio::select! {
                    report = &mut run => Some(report),
                    _ = tokio::time::sleep(limit) => None,
                };
                match finished {
                    Some(report) => report,
                    None => {
                        warn!(timeout = ?limit, "Request deadline passed, cancelling");
                        scoped.cancel();
                        // The loop stops at its next suspension point.
                        let report = run.await;
                        if report.outcome == RunOutcome::Cancelled {
                            return Err(LoopError::DeadlineExceeded(limit));
                        }
                        report
                    }
                }
            }
        };

        match report.outcome {
            RunOutcome::Cancelled => Err(LoopError::Cancelled),
            _ => Ok(report.answer),
        }
    }

    /// Run one request and return its full history.
    pub async fn run_session(
        &self,
        request: &str,
        dispatcher: &dyn Dispatch,
        cancel: CancellationToken,
    ) -> RunReport {
        let mut session = Session::new(request);
        let tools = dispatcher.list_tools();
        let max_iterations = self.settings.max_iterations;

        info!(
            session = %session.id,
            planner = %self.planner.name(),
            tools = tools.len(),
            max_iterations,
            "Starting request"
        );

        let (outcome, answer) = loop {
            let iteration = session.iterations;
            if iteration >= max_iterations {
                warn!(session = %session.id, iterations = iteration, "Iteration budget exhausted");
                break (RunOutcome::BudgetExhausted, self.settings.fallback_answer.clone());
            }

            let planning = PlanningRequest {
                request,
                history: &session.steps,
                tools: &tools,
                iteration: iteration + 1,
                max_iterations,
            };
            debug!(session = %session.id, iteration = iteration + 1, "Consulting planner");

            let decided = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                decision = self.decide(&planning) => Some(decision),
            };

            let decision = match decided {
                None => {
                    info!(session = %session.id, "Request cancelled while planning");
                    break (RunOutcome::Cancelled, self.settings.failure_answer.clone());
                }
                Some(Ok(decision)) => decision,
                Some(Err(e)) => {
                    error!(session = %session.id, iteration = iteration + 1, error = %e, "Planner failed");
                    break (RunOutcome::PlannerFailed, self.settings.failure_answer.clone());
                }
            };

            match decision {
                Decision::FinalAnswer(text) => {
                    self.publish_decision(&session, iteration + 1, "answer");
                    let answer = strip_final_marker(&text, &self.settings.final_answer_marker);
                    session.push(ConversationStep::answer(iteration + 1, answer.clone()));
                    break (RunOutcome::Answered, answer);
                }
                Decision::Act(call) => {
                    session.iterations += 1;
                    let iteration = session.iterations;
                    self.publish_decision(&session, iteration, &call.name);
                    debug!(session = %session.id, iteration, tool = %call.name, "Invoking tool");

                    let invoked = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = dispatcher.invoke(&call) => Some(result),
                    };

                    let Some(result) = invoked else {
                        let result = ToolResult::failure(
                            &call,
                            ToolErrorKind::Cancelled,
                            "request cancelled while the call was in flight",
                            None,
                        );
                        session.push(ConversationStep::invoke(iteration, call, result));
                        info!(session = %session.id, iteration, "Request cancelled during a tool call");
                        break (RunOutcome::Cancelled, self.settings.failure_answer.clone());
                    };

                    if !result.is_success() {
                        debug!(
                            session = %session.id,
                            tool = %call.name,
                            observation = %result.observation(),
                            "Tool failed; the planner will see the error"
                        );
                    }
                    session.push(ConversationStep::invoke(iteration, call, result));
                }
            }
        };
        session.finish();

        info!(
            session = %session.id,
            outcome = %outcome,
            iterations = session.iterations,
            "Request finished"
        );
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::RequestFinished {
                session_id: session.id.clone(),
                outcome: outcome.as_str().into(),
                iterations: session.iterations,
                timestamp: Utc::now(),
            });
        }

        RunReport {
            answer,
            outcome,
            session,
        }
    }

    /// One planner consultation, bounded by the planner timeout and retried
    /// at most `planner_retries` extra times.
    async fn decide(&self, planning: &PlanningRequest<'_>) -> Result<Decision, PlannerError> {
        let timeout = self.settings.planner_timeout;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match tokio::time::timeout(timeout, self.planner.decide(planning)).await {
                Ok(Ok(decision)) => return Ok(decision),
                Ok(Err(e)) => e,
                Err(_) => PlannerError::Timeout {
                    timeout_secs: timeout.as_secs(),
                },
            };

            if attempt > self.settings.planner_retries {
                return Err(err);
            }
            warn!(
                iteration = planning.iteration,
                attempt,
                error = %err,
                "Planner attempt failed, retrying"
            );
        }
    }

    fn publish_decision(&self, session: &Session, iteration: usize, action: &str) {
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::PlannerDecided {
                session_id: session.id.clone(),
                iteration,
                action: action.into(),
                timestamp: Utc::now(),
            });
        }
    }
}
