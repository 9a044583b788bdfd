//! Interactive front end: the REPL loop, inline operator notices and the
//! command-line overrides applied on top of the config.
//!
//! Keeps `main.rs` slim: clap parsing stays there, the session loop lives
//! here.

use std::io::Write as _;
use std::path::PathBuf;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt as _};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::{Agent, AgentEvent, TurnOutcome};
use crate::config::Config;
use crate::models::{ModelProvider, PullProgress};
use crate::utils::truncate_str;

// ── Overrides ────────────────────────────────────────────────

/// Command-line values that win over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workspace: Option<PathBuf>,
    pub model: Option<String>,
    pub host: Option<String>,
    pub no_tools: bool,
    pub no_session_log: bool,
}

impl Overrides {
    pub fn apply(self, cfg: &mut Config) {
        if let Some(ws) = self.workspace {
            cfg.workspace = Some(ws);
        }
        if let Some(model) = self.model {
            cfg.model = model;
        }
        if let Some(host) = self.host {
            cfg.host = host.trim_end_matches('/').to_string();
        }
        if self.no_tools {
            cfg.tools_enabled = false;
        }
        if self.no_session_log {
            cfg.session_log = false;
        }
    }
}

// ── Input parsing ────────────────────────────────────────────

/// One line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Quit,
    Help,
    History,
    Clear,
    Empty,
    Prompt(String),
}

pub fn parse_input(line: &str) -> ReplCommand {
    let trimmed = line.trim();
    match trimmed.to_lowercase().as_str() {
        "" => ReplCommand::Empty,
        "quit" | "exit" | "q" | "/quit" | "/exit" => ReplCommand::Quit,
        "help" | "?" | "/help" => ReplCommand::Help,
        "/history" => ReplCommand::History,
        "/clear" => ReplCommand::Clear,
        _ => ReplCommand::Prompt(trimmed.to_string()),
    }
}

const HELP: &str = "\
Type a request and press Enter; the assistant may read, write and run code
in the workspace before answering.

Commands:
  help, ?          show this help
  /history         print the conversation so far
  /clear           forget the conversation
  quit, exit, q    end the session (Ctrl-C works too)";

// ── Output ───────────────────────────────────────────────────

pub fn print_banner(agent: &Agent, host: &str) {
    let session = agent.session();
    println!("codeloop {}", env!("CARGO_PKG_VERSION"));
    println!("  model:     {} @ {host}", session.model());
    println!("  workspace: {}", session.workspace().display());
    if session.tools_enabled() {
        let names: Vec<&str> = session.tools().iter().map(|t| t.name.as_str()).collect();
        println!("  tools:     {}", names.join(", "));
    } else {
        println!("  tools:     disabled (streaming chat)");
    }
    if let Some(path) = session.log_path() {
        println!("  log:       {}", path.display());
    }
    println!("Type 'help' for commands, 'quit' to exit.\n");
}

/// Render an [`AgentEvent`] as a short inline notice.
pub fn format_event(event: &AgentEvent) -> Option<String> {
    match event {
        AgentEvent::ModelRequest { iteration } => {
            debug!(iteration, "waiting for model");
            None
        }
        AgentEvent::AssistantNote(text) => Some(format!("  … {}", truncate_str(text, 300))),
        AgentEvent::ToolStarted { name, arguments } => Some(format!(
            "  → {name} {}",
            truncate_str(&arguments.to_string(), 120)
        )),
        AgentEvent::ToolFinished {
            success, notice, ..
        } => Some(format!("  {} {notice}", if *success { "✓" } else { "✗" })),
        AgentEvent::RejectedCall { reason, .. } => {
            Some(format!("  ! skipped embedded tool call: {reason}"))
        }
        AgentEvent::IterationLimit { max } => Some(format!(
            "  ! stopped after {max} model requests; the answer may be incomplete"
        )),
        AgentEvent::Delta(_) => None,
    }
}

fn print_event(event: &AgentEvent, streaming: &mut bool) {
    if let AgentEvent::Delta(delta) = event {
        if !*streaming {
            print!("assistant> ");
            *streaming = true;
        }
        print!("{delta}");
        let _ = std::io::stdout().flush();
        return;
    }
    if let Some(line) = format_event(event) {
        println!("{line}");
    }
}

/// Progress line for a model download, redrawn in place.
pub fn print_pull_progress(progress: &PullProgress) {
    match progress.percent() {
        Some(pct) => print!("\r  {:<24} {pct:5.1}%", truncate_str(&progress.status, 24)),
        None => print!("\r  {:<32}", truncate_str(&progress.status, 32)),
    }
    if progress.status == "success" {
        println!();
    }
    let _ = std::io::stdout().flush();
}

fn print_history(agent: &Agent) {
    let history = agent.session().history();
    if history.is_empty() {
        println!("(no messages yet)");
        return;
    }
    for msg in history {
        println!("[{}] {}", msg.role, truncate_str(&msg.content, 500));
    }
}

// ── Turn execution ───────────────────────────────────────────

/// Run one turn while printing its events as they arrive.
pub async fn run_turn_with_notices(
    agent: &mut Agent,
    provider: &dyn ModelProvider,
    events: &mut UnboundedReceiver<AgentEvent>,
    input: &str,
) -> anyhow::Result<TurnOutcome> {
    let mut streaming = false;
    let result = {
        let turn = agent.run_turn(input, provider);
        tokio::pin!(turn);
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => print_event(&event, &mut streaming),
                res = &mut turn => break res,
            }
        }
    };
    while let Ok(event) = events.try_recv() {
        print_event(&event, &mut streaming);
    }

    match &result {
        Ok(outcome) if streaming => {
            println!("\n");
            debug!(chars = outcome.reply.len(), "streamed reply finished");
        }
        Ok(outcome) => println!("assistant> {}\n", outcome.reply),
        Err(e) => {
            if streaming {
                println!();
            }
            eprintln!("error: {e:#}");
            eprintln!("(the turn was discarded; the session is still usable)\n");
        }
    }
    result
}

// ── Input ────────────────────────────────────────────────────

/// Lines of `reader`, read on a detached OS thread.
///
/// Runtime shutdown never waits on the pending read, so Ctrl-C at the
/// prompt exits without a further Enter.
pub fn line_reader<R>(reader: R) -> UnboundedReceiverStream<std::io::Result<String>>
where
    R: std::io::BufRead + Send + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "could not start input thread");
    }
    UnboundedReceiverStream::new(rx)
}

/// Operator input from the terminal.
pub fn stdin_lines() -> UnboundedReceiverStream<std::io::Result<String>> {
    line_reader(std::io::BufReader::new(std::io::stdin()))
}

/// Read-eval loop over `lines` until `quit`, end of input, or `cancel`.
pub async fn run_repl<S>(
    agent: &mut Agent,
    provider: &dyn ModelProvider,
    mut events: UnboundedReceiver<AgentEvent>,
    mut lines: S,
    cancel: CancellationToken,
) -> anyhow::Result<()>
where
    S: Stream<Item = std::io::Result<String>> + Unpin,
{
    loop {
        print!("you> ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            _ = cancel.cancelled() => {
                println!();
                break;
            }
            line = lines.next() => line.transpose()?,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        match parse_input(&line) {
            ReplCommand::Empty => continue,
            ReplCommand::Quit => break,
            ReplCommand::Help => println!("{HELP}\n"),
            ReplCommand::History => print_history(agent),
            ReplCommand::Clear => {
                agent.session_mut().clear_history();
                println!("(conversation cleared)\n");
            }
            ReplCommand::Prompt(text) => {
                // Errors are reported inline; the session carries on.
                let _ = run_turn_with_notices(agent, provider, &mut events, &text).await;
            }
        }
    }

    let counters = agent.session().counters();
    debug!(
        turns = counters.turns,
        model_requests = counters.model_requests,
        tool_calls = counters.tool_calls,
        "session ended"
    );
    println!("Goodbye.");
    Ok(())
}
