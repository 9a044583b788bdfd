//! Conversation orchestrator.
//!
//! [`Agent::run_turn`] drives one user turn through the
//! `AwaitingUserInput → ModelTurn → (ToolExecution → ModelTurn)* → Settled`
//! cycle:
//!
//! 1. the user message is appended to the session history;
//! 2. the system prompt, the trailing history window and the tool catalog
//!    are sent to the model (non-streaming, tool calls cannot be parsed
//!    incrementally);
//! 3. structured tool calls win, then tool calls embedded in the text, and
//!    anything else is the final answer;
//! 4. tool calls run concurrently but their results are appended in call
//!    order, then the model is asked again.
//!
//! The number of model requests per turn is capped.  When the cap is hit
//! while the model still asks for tools, those calls are not executed and
//! the outcome is flagged with `limit_reached`.

use std::time::Instant;

use anyhow::Context as _;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_stream::StreamExt as _;
use tracing::{debug, info, warn};

use crate::config::{Config, ToolResultRole};
use crate::models::{ChatMessage, ModelProvider, ProviderResponse};
use crate::session::{Session, TurnState};
use crate::tools::parsing::scan_embedded_tool_calls;
use crate::tools::{function_defs, is_known_tool, ToolCall, ToolResult};
use crate::utils::truncate_str;

/// Default system prompt for coding sessions.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert coding assistant with access to tools \
for working in the user's project directory. Use write_file to create or modify files, \
read_file to inspect them, list_directory and find_files to explore the project, and \
run_command to execute shell commands such as builds, tests or scripts. Paths are relative \
to the project directory. Call tools when they help; once the task is done, reply with a \
short summary of what you did and the results.";

// ── Events ───────────────────────────────────────────────────

/// Progress notices for the operator.  Purely informational; the
/// orchestrator never waits on the receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ModelRequest { iteration: usize },
    /// Text the model sent alongside tool calls.
    AssistantNote(String),
    ToolStarted { name: String, arguments: Value },
    ToolFinished { name: String, success: bool, notice: String },
    /// An embedded call that was skipped.
    RejectedCall { fragment: String, reason: String },
    IterationLimit { max: usize },
    /// A streamed content delta (tool-less mode).
    Delta(String),
}

// ── Outcome ──────────────────────────────────────────────────

/// One tool execution within a turn.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub args_summary: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Final assistant message, as appended to history.
    pub reply: String,
    /// Model requests issued during the turn.
    pub iterations: usize,
    /// The request cap was hit while the model still wanted tools.
    pub limit_reached: bool,
    pub tool_calls: Vec<ToolCallRecord>,
}

// ── Settings ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub system_prompt: String,
    pub max_tool_iterations: usize,
    pub history_window: usize,
    /// Role tool results are appended under.
    pub tool_result_role: ToolResultRole,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tool_iterations: 5,
            history_window: 10,
            tool_result_role: ToolResultRole::Tool,
        }
    }
}

impl AgentSettings {
    /// Settings for `model` as configured in `cfg`.
    pub fn from_config(cfg: &Config, model: &str) -> Self {
        Self {
            system_prompt: cfg
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tool_iterations: cfg.max_tool_iterations,
            history_window: cfg.history_window,
            tool_result_role: cfg.tool_result_role_for(model),
        }
    }
}

/// What a single model response asked for.
enum Interpretation {
    Tools { note: String, calls: Vec<ToolCall> },
    Answer(String),
}

// ── Agent ────────────────────────────────────────────────────

pub struct Agent {
    session: Session,
    settings: AgentSettings,
    events: Option<UnboundedSender<AgentEvent>>,
}

impl Agent {
    pub fn new(session: Session, settings: AgentSettings) -> Self {
        Self {
            session,
            settings,
            events: None,
        }
    }

    /// Send [`AgentEvent`]s to `tx` while turns run.
    pub fn with_events(mut self, tx: UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// System prompt followed by the trailing history window.
    fn request_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.settings.history_window + 1);
        messages.push(ChatMessage::system(self.settings.system_prompt.clone()));
        messages.extend_from_slice(self.session.recent(self.settings.history_window));
        messages
    }

    /// Run one user turn to completion.
    ///
    /// A model or transport failure aborts the turn: the history is rolled
    /// back to where it was before `input` and the session stays usable.
    pub async fn run_turn(
        &mut self,
        input: &str,
        provider: &dyn ModelProvider,
    ) -> anyhow::Result<TurnOutcome> {
        let checkpoint = self.session.history().len();
        self.session.push(ChatMessage::user(input));
        self.session.counters_mut().turns += 1;
        if let Some(log) = self.session.log() {
            log.user(input).await;
        }

        let result = if self.session.tools_enabled() {
            self.tool_loop(provider).await
        } else {
            self.streamed_answer(provider).await
        };

        match result {
            Ok(outcome) => {
                self.session.set_state(TurnState::Settled);
                if let Some(log) = self.session.log() {
                    log.assistant(&outcome.reply).await;
                }
                info!(
                    session = %self.session.id(),
                    iterations = outcome.iterations,
                    tool_calls = outcome.tool_calls.len(),
                    limit_reached = outcome.limit_reached,
                    "turn settled"
                );
                self.session.set_state(TurnState::AwaitingUserInput);
                Ok(outcome)
            }
            Err(e) => {
                warn!(session = %self.session.id(), error = %e, "turn aborted");
                self.session.truncate_history(checkpoint);
                self.session.set_state(TurnState::AwaitingUserInput);
                if let Some(log) = self.session.log() {
                    log.record("ERROR", &format!("turn aborted: {e:#}")).await;
                }
                Err(e)
            }
        }
    }

    async fn tool_loop(&mut self, provider: &dyn ModelProvider) -> anyhow::Result<TurnOutcome> {
        let tool_defs = function_defs(self.session.tools());
        let max_iters = self.settings.max_tool_iterations.max(1);
        let mut records = Vec::new();

        let mut iteration = 0;
        loop {
            iteration += 1;
            self.session.set_state(TurnState::ModelTurn);
            self.emit(AgentEvent::ModelRequest { iteration });
            let messages = self.request_messages();
            debug!(iteration, messages = messages.len(), "model request");

            let response = provider
                .send_chat_with_tools(&messages, &tool_defs)
                .await
                .context("model request failed")?;
            self.session.counters_mut().model_requests += 1;

            let (note, calls) = match self.interpret(response) {
                Interpretation::Answer(text) => {
                    self.session.push(ChatMessage::assistant(text.clone()));
                    return Ok(TurnOutcome {
                        reply: text,
                        iterations: iteration,
                        limit_reached: false,
                        tool_calls: records,
                    });
                }
                Interpretation::Tools { note, calls } => (note, calls),
            };

            if iteration >= max_iters {
                warn!(max = max_iters, pending = calls.len(), "tool loop exhausted");
                self.emit(AgentEvent::IterationLimit { max: max_iters });
                let reply = exhausted_reply(&note, &calls, max_iters);
                self.session.push(ChatMessage::assistant(reply.clone()));
                return Ok(TurnOutcome {
                    reply,
                    iterations: iteration,
                    limit_reached: true,
                    tool_calls: records,
                });
            }

            if !note.is_empty() {
                self.emit(AgentEvent::AssistantNote(note.clone()));
                self.session.push(ChatMessage::assistant(note));
            }

            self.session.set_state(TurnState::ToolExecution);
            records.extend(self.execute_calls(calls).await);
        }
    }

    /// Structured calls first, then embedded calls, otherwise an answer.
    fn interpret(&self, response: ProviderResponse) -> Interpretation {
        match response {
            // Unknown structured names still go through the dispatcher so the
            // model is told the tool does not exist.
            ProviderResponse::ToolCalls { content, calls } => Interpretation::Tools {
                note: content.trim().to_string(),
                calls,
            },
            ProviderResponse::Final(text) => {
                let scan = scan_embedded_tool_calls(&text, is_known_tool);
                for rejected in &scan.rejected {
                    warn!(
                        reason = %rejected.reason,
                        fragment = %truncate_str(&rejected.fragment, 200),
                        "skipping embedded tool call"
                    );
                    self.emit(AgentEvent::RejectedCall {
                        fragment: rejected.fragment.clone(),
                        reason: rejected.reason.to_string(),
                    });
                }
                if scan.calls.is_empty() {
                    Interpretation::Answer(text)
                } else {
                    debug!(count = scan.calls.len(), "recovered embedded tool calls");
                    Interpretation::Tools {
                        note: scan.remaining,
                        calls: scan.calls,
                    }
                }
            }
        }
    }

    /// Run `calls` concurrently and append their results in call order.
    async fn execute_calls(&mut self, calls: Vec<ToolCall>) -> Vec<ToolCallRecord> {
        let dispatcher = self.session.dispatcher().clone();
        let mut handles = Vec::with_capacity(calls.len());
        for call in &calls {
            debug!(tool = %call.name, "invoking tool");
            self.emit(AgentEvent::ToolStarted {
                name: call.name.clone(),
                arguments: Value::Object(call.arguments.clone()),
            });
            let dispatcher = dispatcher.clone();
            let call = call.clone();
            handles.push(tokio::spawn(async move {
                let timer = Instant::now();
                let result = dispatcher.dispatch_call(&call).await;
                (result, timer.elapsed().as_millis() as u64)
            }));
        }

        let mut records = Vec::with_capacity(calls.len());
        for (call, handle) in calls.into_iter().zip(handles) {
            let (result, elapsed) = match handle.await {
                Ok(done) => done,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool task failed");
                    (
                        ToolResult::Failure {
                            kind: "Io",
                            error: format!("tool task failed: {e}"),
                        },
                        0,
                    )
                }
            };
            records.push(self.record_result(&call, &result, elapsed).await);
        }
        self.session.counters_mut().tool_calls += records.len() as u64;
        records
    }

    async fn record_result(
        &mut self,
        call: &ToolCall,
        result: &ToolResult,
        elapsed_ms: u64,
    ) -> ToolCallRecord {
        let value = result.to_value();
        let payload = value.to_string();
        let args_value = Value::Object(call.arguments.clone());

        let message = match self.settings.tool_result_role {
            ToolResultRole::Tool => ChatMessage::tool(payload),
            ToolResultRole::User => {
                ChatMessage::user(format!("[Tool Result for {}]: {}", call.name, payload))
            }
        };
        self.session.push(message);

        if let Some(log) = self.session.log() {
            log.tool(&call.name, &args_value, &value).await;
        }

        let notice = match result.error() {
            None => format!("{} ok", call.name),
            Some(err) => format!("{} failed: {}", call.name, truncate_str(err, 200)),
        };
        self.emit(AgentEvent::ToolFinished {
            name: call.name.clone(),
            success: result.is_success(),
            notice,
        });

        ToolCallRecord {
            tool: call.name.clone(),
            args_summary: truncate_str(&args_value.to_string(), 200),
            success: result.is_success(),
            duration_ms: elapsed_ms,
            error: result.error().map(str::to_string),
        }
    }

    /// Tool-less mode: stream a plain answer, emitting deltas as they come.
    async fn streamed_answer(
        &mut self,
        provider: &dyn ModelProvider,
    ) -> anyhow::Result<TurnOutcome> {
        self.session.set_state(TurnState::ModelTurn);
        self.emit(AgentEvent::ModelRequest { iteration: 1 });
        let messages = self.request_messages();

        let mut reply = String::new();
        {
            let mut stream = provider.send_chat_stream(&messages);
            while let Some(delta) = stream.next().await {
                let delta = delta.context("model stream failed")?;
                self.emit(AgentEvent::Delta(delta.clone()));
                reply.push_str(&delta);
            }
        }
        self.session.counters_mut().model_requests += 1;
        self.session.push(ChatMessage::assistant(reply.clone()));
        Ok(TurnOutcome {
            reply,
            iterations: 1,
            limit_reached: false,
            tool_calls: Vec::new(),
        })
    }
}

/// Final message when the loop stops with tool calls still pending.
fn exhausted_reply(note: &str, pending: &[ToolCall], max_iters: usize) -> String {
    let names: Vec<&str> = pending.iter().map(|c| c.name.as_str()).collect();
    let marker = format!(
        "[tool loop exhausted after {max_iters} model requests; answer may be incomplete] \
         pending calls: {}",
        names.join(", ")
    );
    if note.is_empty() {
        marker
    } else {
        format!("{marker}\n{note}")
    }
}
