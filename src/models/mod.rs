//! Model provider abstractions.
//!
//! Defines the [`ModelProvider`] trait, the [`ChatMessage`] type, the
//! [`ProviderResponse`] returned by a chat round-trip and the concrete
//! [`OllamaProvider`] that talks to a local model server.

pub mod ollama;

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::ToolCall;

pub use ollama::{OllamaProvider, PullProgress};

// ---------------------------------------------------------------------------
// ChatMessage – shared message representation
// ---------------------------------------------------------------------------

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat message with a role and content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

/// Serialise messages into the `messages` array of a chat request.
pub fn serialize_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
        .collect()
}

// ---------------------------------------------------------------------------
// ProviderResponse
// ---------------------------------------------------------------------------

/// Response from a model: a final text reply, or a request to run tools.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResponse {
    /// Plain text reply.
    Final(String),
    /// Structured tool calls, with whatever text came alongside them.
    ToolCalls {
        content: String,
        calls: Vec<ToolCall>,
    },
}

impl ProviderResponse {
    /// The textual part of the response.
    pub fn content(&self) -> &str {
        match self {
            ProviderResponse::Final(text) => text,
            ProviderResponse::ToolCalls { content, .. } => content,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ModelError {
    /// Connection refused, DNS failure, timeout, broken body.
    #[error("cannot reach model server at {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("model server returned {status}: {body}")]
    Http { status: u16, body: String },

    /// The server answered with something we could not interpret.
    #[error("unexpected response from model server: {0}")]
    Protocol(String),

    #[error("model '{model}' is not available on the server")]
    ModelUnavailable { model: String },

    #[error("pulling model '{model}' failed: {reason}")]
    PullFailed { model: String, reason: String },
}

impl ModelError {
    /// Whether the server could not be reached at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, ModelError::Transport { .. })
    }
}

// ---------------------------------------------------------------------------
// ModelProvider trait
// ---------------------------------------------------------------------------

/// Stream of content deltas.
pub type ChatStream<'a> = Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send + 'a>>;

/// Trait implemented by every chat backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Model identifier requests are sent for.
    fn model(&self) -> &str;

    /// Send the conversation together with the tool catalog (wire shape,
    /// see [`crate::tools::function_defs`]).  An empty `tools` slice means a
    /// plain chat request.
    async fn send_chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> Result<ProviderResponse, ModelError>;

    /// Send chat messages and return a stream of content deltas.
    ///
    /// The default implementation performs a non-streaming request and
    /// yields the whole reply as a single chunk.
    fn send_chat_stream<'a>(&'a self, messages: &'a [ChatMessage]) -> ChatStream<'a> {
        Box::pin(async_stream::try_stream! {
            let response = self.send_chat_with_tools(messages, &[]).await?;
            yield response.content().to_string();
        })
    }
}
