//! Integration tests for the agent tool loop, driven by scripted providers.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use codeloop::agent::{Agent, AgentEvent, AgentSettings};
use codeloop::config::ToolResultRole;
use codeloop::models::{ChatMessage, ModelError, ModelProvider, ProviderResponse, Role};
use codeloop::session::{Session, TurnState};
use codeloop::tools::{self, Dispatcher, ToolCall};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

// ── Scripted provider ───────────────────────────────────────

/// Replays canned responses and records every request it receives.
struct ScriptedProvider {
    script: Mutex<VecDeque<ProviderResponse>>,
    /// Returned once the script is exhausted.
    fallback: ProviderResponse,
    requests: Mutex<Vec<(Vec<ChatMessage>, Vec<Value>)>>,
}

impl ScriptedProvider {
    fn new(script: Vec<ProviderResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: ProviderResponse::Final("done".into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn always(response: ProviderResponse) -> Self {
        Self {
            fallback: response,
            ..Self::new(Vec::new())
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, i: usize) -> (Vec<ChatMessage>, Vec<Value>) {
        self.requests.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn send_chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ProviderResponse, ModelError> {
        self.requests
            .lock()
            .unwrap()
            .push((messages.to_vec(), tools.to_vec()));
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

fn calls(calls: Vec<ToolCall>) -> ProviderResponse {
    ProviderResponse::ToolCalls {
        content: String::new(),
        calls,
    }
}

fn call(name: &str, args: Value) -> ToolCall {
    ToolCall::new(name, args)
}

// ── Fixtures ────────────────────────────────────────────────

fn agent_with(
    settings: AgentSettings,
    tools_enabled: bool,
) -> (TempDir, Agent, UnboundedReceiver<AgentEvent>) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let dispatcher = Dispatcher::for_root(dir.path()).expect("dispatcher");
    let offered = if tools_enabled {
        tools::catalog()
    } else {
        Vec::new()
    };
    let session = Session::new("scripted", dispatcher, offered);
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let agent = Agent::new(session, settings).with_events(tx);
    (dir, agent, rx)
}

fn agent() -> (TempDir, Agent, UnboundedReceiver<AgentEvent>) {
    agent_with(AgentSettings::default(), true)
}

fn roles(agent: &Agent) -> Vec<Role> {
    agent.session().history().iter().map(|m| m.role).collect()
}

fn drain(rx: &mut UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

// ── Termination ─────────────────────────────────────────────

#[tokio::test]
async fn plain_answer_settles_after_one_request() {
    let (_dir, mut agent, _rx) = agent();
    let provider = ScriptedProvider::new(vec![ProviderResponse::Final("Hi there".into())]);

    let outcome = agent.run_turn("hello", &provider).await.unwrap();
    assert_eq!(outcome.reply, "Hi there");
    assert_eq!(outcome.iterations, 1);
    assert!(!outcome.limit_reached);
    assert!(outcome.tool_calls.is_empty());
    assert_eq!(roles(&agent), [Role::User, Role::Assistant]);
    assert_eq!(agent.session().state(), TurnState::AwaitingUserInput);

    let (messages, tool_defs) = provider.request(0);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[1], ChatMessage::user("hello"));
    assert_eq!(tool_defs.len(), tools::TOOL_NAMES.len());
}

#[tokio::test]
async fn tool_loop_is_bounded_by_request_cap() {
    let (_dir, mut agent, mut rx) = agent();
    let provider = ScriptedProvider::always(calls(vec![call("list_directory", json!({}))]));

    let outcome = agent.run_turn("explore forever", &provider).await.unwrap();

    assert_eq!(provider.request_count(), 5);
    assert_eq!(outcome.iterations, 5);
    assert!(outcome.limit_reached);
    assert_eq!(outcome.tool_calls.len(), 4);
    assert!(outcome
        .reply
        .starts_with("[tool loop exhausted after 5 model requests"));
    assert!(outcome.reply.contains("pending calls: list_directory"));

    let history = agent.session().history();
    assert_eq!(history.last().unwrap().role, Role::Assistant);
    assert_eq!(agent.session().count_role(Role::Tool), 4);

    let events = drain(&mut rx);
    assert!(events.contains(&AgentEvent::IterationLimit { max: 5 }));
    let counters = agent.session().counters();
    assert_eq!(counters.model_requests, 5);
    assert_eq!(counters.tool_calls, 4);
}

#[tokio::test]
async fn custom_cap_is_honoured() {
    let settings = AgentSettings {
        max_tool_iterations: 2,
        ..AgentSettings::default()
    };
    let (_dir, mut agent, _rx) = agent_with(settings, true);
    let provider = ScriptedProvider::always(calls(vec![call("list_directory", json!({}))]));

    let outcome = agent.run_turn("go", &provider).await.unwrap();
    assert_eq!(provider.request_count(), 2);
    assert_eq!(outcome.tool_calls.len(), 1);
    assert!(outcome.limit_reached);
}

// ── Ordering ────────────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn results_follow_call_order_not_completion_order() {
    let (_dir, mut agent, _rx) = agent();
    let provider = ScriptedProvider::new(vec![
        calls(vec![
            call("run_command", json!({"command": "echo A"})),
            call("run_command", json!({"command": "sleep 1; echo B"})),
            call("run_command", json!({"command": "echo C"})),
        ]),
        ProviderResponse::Final("all three ran".into()),
    ]);

    let started = std::time::Instant::now();
    let outcome = agent.run_turn("run three", &provider).await.unwrap();
    assert_eq!(outcome.reply, "all three ran");
    // Concurrent execution: well under three sequential sleeps.
    assert!(started.elapsed() < Duration::from_secs(3));

    let stdout: Vec<String> = agent
        .session()
        .history()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| {
            let v: Value = serde_json::from_str(&m.content).unwrap();
            v["stdout"].as_str().unwrap().trim().to_string()
        })
        .collect();
    assert_eq!(stdout, ["A", "B", "C"]);

    let names: Vec<&str> = outcome.tool_calls.iter().map(|r| r.tool.as_str()).collect();
    assert_eq!(names, ["run_command"; 3]);
}

#[tokio::test]
async fn assistant_note_precedes_tool_results() {
    let (_dir, mut agent, mut rx) = agent();
    let provider = ScriptedProvider::new(vec![
        ProviderResponse::ToolCalls {
            content: "Let me look around.".into(),
            calls: vec![call("list_directory", json!({}))],
        },
        ProviderResponse::Final("The directory is empty.".into()),
    ]);

    agent.run_turn("what is here?", &provider).await.unwrap();
    assert_eq!(
        roles(&agent),
        [Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(agent.session().history()[1].content, "Let me look around.");

    let events = drain(&mut rx);
    let note_pos = events
        .iter()
        .position(|e| matches!(e, AgentEvent::AssistantNote(t) if t == "Let me look around."))
        .expect("note event");
    let started_pos = events
        .iter()
        .position(|e| matches!(e, AgentEvent::ToolStarted { .. }))
        .expect("tool started event");
    assert!(note_pos < started_pos);
}

// ── End-to-end scenario ─────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn write_and_run_script_scenario() {
    let (dir, mut agent, mut rx) = agent();
    let provider = ScriptedProvider::new(vec![
        calls(vec![call(
            "write_file",
            json!({"file_path": "hello.sh", "content": "echo hello\n"}),
        )]),
        calls(vec![call("run_command", json!({"command": "sh hello.sh"}))]),
        ProviderResponse::Final("The script printed hello.".into()),
    ]);

    let outcome = agent
        .run_turn("write hello.sh that prints hello and run it", &provider)
        .await
        .unwrap();

    assert_eq!(outcome.reply, "The script printed hello.");
    assert_eq!(outcome.iterations, 3);
    assert!(outcome.tool_calls.iter().all(|r| r.success));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("hello.sh")).unwrap(),
        "echo hello\n"
    );
    assert_eq!(
        roles(&agent),
        [Role::User, Role::Tool, Role::Tool, Role::Assistant]
    );

    let run_result: Value =
        serde_json::from_str(&agent.session().history()[2].content).unwrap();
    assert_eq!(run_result["success"], true);
    assert_eq!(run_result["stdout"], "hello\n");
    assert_eq!(run_result["return_code"], 0);

    // The third request carries both tool results.
    let (third, _) = provider.request(2);
    assert_eq!(third.iter().filter(|m| m.role == Role::Tool).count(), 2);

    let events = drain(&mut rx);
    let finished: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolFinished { success, .. } => Some(*success),
            _ => None,
        })
        .collect();
    assert_eq!(finished, [true, true]);
}

#[tokio::test]
async fn tool_failures_are_fed_back_not_raised() {
    let (_dir, mut agent, _rx) = agent();
    let provider = ScriptedProvider::new(vec![
        calls(vec![call("read_file", json!({"file_path": "../../etc/passwd"}))]),
        ProviderResponse::Final("I cannot read that file.".into()),
    ]);

    let outcome = agent.run_turn("show me passwd", &provider).await.unwrap();
    assert_eq!(outcome.tool_calls.len(), 1);
    assert!(!outcome.tool_calls[0].success);

    let tool_msg = &agent.session().history()[1];
    let v: Value = serde_json::from_str(&tool_msg.content).unwrap();
    assert_eq!(v["success"], false);
    assert_eq!(v["error_kind"], "PathEscape");
}

#[tokio::test]
async fn unknown_structured_tool_is_reported_to_the_model() {
    let (_dir, mut agent, _rx) = agent();
    let provider = ScriptedProvider::new(vec![
        calls(vec![call("format_disk", json!({}))]),
        ProviderResponse::Final("That tool does not exist.".into()),
    ]);

    agent.run_turn("wipe it", &provider).await.unwrap();
    let v: Value = serde_json::from_str(&agent.session().history()[1].content).unwrap();
    assert_eq!(v["error_kind"], "UnknownTool");
}

// ── Embedded calls ──────────────────────────────────────────

#[tokio::test]
async fn embedded_tool_call_is_executed() {
    let (dir, mut agent, _rx) = agent();
    let provider = ScriptedProvider::new(vec![
        ProviderResponse::Final(
            "```json\n{\"name\": \"write_file\", \"arguments\": {\"file_path\": \"x.txt\", \"content\": \"y\"}}\n```"
                .into(),
        ),
        ProviderResponse::Final("Wrote x.txt.".into()),
    ]);

    let outcome = agent.run_turn("write y to x.txt", &provider).await.unwrap();
    assert_eq!(outcome.reply, "Wrote x.txt.");
    assert_eq!(outcome.tool_calls.len(), 1);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("x.txt")).unwrap(),
        "y"
    );
    assert_eq!(
        roles(&agent),
        [Role::User, Role::Tool, Role::Assistant]
    );
}

#[tokio::test]
async fn unknown_embedded_tool_becomes_plain_answer() {
    let (_dir, mut agent, mut rx) = agent();
    let text = r#"{"name": "format_disk", "arguments": {"drive": "C"}}"#;
    let provider = ScriptedProvider::new(vec![ProviderResponse::Final(text.into())]);

    let outcome = agent.run_turn("clean up", &provider).await.unwrap();
    assert_eq!(outcome.reply, text);
    assert_eq!(provider.request_count(), 1);
    assert!(outcome.tool_calls.is_empty());

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::RejectedCall { reason, .. } if reason.contains("format_disk")
    )));
}

// ── Result role and window ──────────────────────────────────

#[tokio::test]
async fn user_role_folding_tags_results() {
    let settings = AgentSettings {
        tool_result_role: ToolResultRole::User,
        ..AgentSettings::default()
    };
    let (dir, mut agent, _rx) = agent_with(settings, true);
    std::fs::write(dir.path().join("notes.txt"), "remember").unwrap();
    let provider = ScriptedProvider::new(vec![
        calls(vec![call("read_file", json!({"file_path": "notes.txt"}))]),
        ProviderResponse::Final("It says remember.".into()),
    ]);

    agent.run_turn("read notes.txt", &provider).await.unwrap();
    assert_eq!(agent.session().count_role(Role::Tool), 0);
    let folded = &agent.session().history()[1];
    assert_eq!(folded.role, Role::User);
    let payload = folded
        .content
        .strip_prefix("[Tool Result for read_file]: ")
        .expect("tagged result");
    let v: Value = serde_json::from_str(payload).unwrap();
    assert_eq!(v["content"], "remember");
}

#[tokio::test]
async fn requests_carry_only_the_history_window() {
    let (_dir, mut agent, _rx) = agent();
    for i in 0..20 {
        agent
            .session_mut()
            .push(ChatMessage::user(format!("earlier {i}")));
    }
    let provider = ScriptedProvider::new(vec![
        calls(vec![call("list_directory", json!({}))]),
        ProviderResponse::Final("ok".into()),
    ]);

    agent.run_turn("latest", &provider).await.unwrap();
    for i in 0..provider.request_count() {
        let (messages, _) = provider.request(i);
        assert!(messages.len() <= 1 + 10);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[1..].iter().all(|m| m.role != Role::System));
    }
    let (first, _) = provider.request(0);
    assert_eq!(first.last().unwrap().content, "latest");
    // The full history is kept even though the model saw a window.
    assert_eq!(agent.session().history().len(), 20 + 3);
}

// ── Failures ────────────────────────────────────────────────

#[tokio::test]
async fn unreachable_server_leaves_history_unchanged() {
    let (_dir, mut agent, _rx) = agent();
    let first = ScriptedProvider::new(vec![ProviderResponse::Final("first answer".into())]);
    agent.run_turn("first", &first).await.unwrap();
    let before = agent.session().history().to_vec();

    let down = codeloop::models::OllamaProvider::new(
        "http://127.0.0.1:9",
        "llama3.1",
        Duration::from_secs(5),
    )
    .unwrap();
    let err = agent.run_turn("second", &down).await.unwrap_err();
    assert!(format!("{err:#}").contains("model request failed"));
    assert_eq!(agent.session().history(), before.as_slice());
    assert_eq!(agent.session().state(), TurnState::AwaitingUserInput);

    let again = ScriptedProvider::new(vec![ProviderResponse::Final("back online".into())]);
    let outcome = agent.run_turn("third", &again).await.unwrap();
    assert_eq!(outcome.reply, "back online");
    assert_eq!(agent.session().history().len(), before.len() + 2);
}

// ── Tool-less mode ──────────────────────────────────────────

#[tokio::test]
async fn tool_less_mode_streams_a_plain_answer() {
    let (_dir, mut agent, mut rx) = agent_with(AgentSettings::default(), false);
    let provider = ScriptedProvider::new(vec![ProviderResponse::Final(
        "Rust ownership in a nutshell.".into(),
    )]);

    let outcome = agent.run_turn("explain ownership", &provider).await.unwrap();
    assert_eq!(outcome.reply, "Rust ownership in a nutshell.");
    assert_eq!(outcome.iterations, 1);
    assert_eq!(roles(&agent), [Role::User, Role::Assistant]);

    let (_, tool_defs) = provider.request(0);
    assert!(tool_defs.is_empty());

    let events = drain(&mut rx);
    assert!(events.contains(&AgentEvent::Delta("Rust ownership in a nutshell.".into())));
}
