//! Session state: one conversation against one workspace and model.
//!
//! The [`Session`] is the explicit context object passed through the
//! orchestrator.  It owns the full conversation history (the model only ever
//! sees a trailing window of it), the tool set offered to the model, the
//! current [`TurnState`] and a few counters.  An optional [`SessionLog`]
//! mirrors the conversation to disk.

pub mod log;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::models::{ChatMessage, Role};
use crate::tools::{Dispatcher, ToolMeta};

pub use log::SessionLog;

/// Where a session is in its turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    AwaitingUserInput,
    ModelTurn,
    ToolExecution,
    /// The current turn produced its final answer.
    Settled,
}

/// Running totals over the whole session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub turns: u64,
    pub model_requests: u64,
    pub tool_calls: u64,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    model: String,
    dispatcher: Dispatcher,
    tools: Vec<ToolMeta>,
    history: Vec<ChatMessage>,
    state: TurnState,
    counters: SessionCounters,
    log: Option<Arc<SessionLog>>,
}

impl Session {
    /// Start a session for `model`.  `tools` is the set offered to the model
    /// (empty for tool-less mode).
    pub fn new(model: impl Into<String>, dispatcher: Dispatcher, tools: Vec<ToolMeta>) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            id,
            model: model.into(),
            dispatcher,
            tools,
            history: Vec::new(),
            state: TurnState::default(),
            counters: SessionCounters::default(),
            log: None,
        }
    }

    pub fn with_log(mut self, log: SessionLog) -> Self {
        self.log = Some(Arc::new(log));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn workspace(&self) -> &Path {
        self.dispatcher.workspace().root()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn tools(&self) -> &[ToolMeta] {
        &self.tools
    }

    pub fn tools_enabled(&self) -> bool {
        !self.tools.is_empty()
    }

    pub fn log(&self) -> Option<&Arc<SessionLog>> {
        self.log.as_ref()
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.log.as_ref().map(|l| l.path().to_path_buf())
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// The trailing `window` messages of the history.
    pub fn recent(&self, window: usize) -> &[ChatMessage] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.history.push(message);
    }

    /// Drop everything appended after the first `len` messages.
    pub(crate) fn truncate_history(&mut self, len: usize) {
        self.history.truncate(len);
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Number of messages authored by `role`.
    pub fn count_role(&self, role: Role) -> usize {
        self.history.iter().filter(|m| m.role == role).count()
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TurnState) {
        self.state = state;
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    pub(crate) fn counters_mut(&mut self) -> &mut SessionCounters {
        &mut self.counters
    }
}
