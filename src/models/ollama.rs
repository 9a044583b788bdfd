//! Ollama chat provider.
//!
//! Talks to the Ollama HTTP API:
//!
//! * `POST /api/chat`  – chat completion, optionally with tool definitions
//!   (non-streaming) or as an NDJSON stream of content deltas.
//! * `GET  /api/tags`  – installed models.
//! * `POST /api/pull`  – download a model, NDJSON progress stream.
//!
//! Config example:
//! ```yaml
//! host: http://localhost:11434
//! model: llama3.1
//! temperature: 0.7
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tokio_stream::StreamExt as _;
use tracing::{debug, warn};

use super::{
    serialize_messages, ChatMessage, ChatStream, ModelError, ModelProvider, ProviderResponse,
};
use crate::tools::ToolCall;

pub const DEFAULT_HOST: &str = "http://localhost:11434";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One line of `/api/pull` progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullProgress {
    pub status: String,
    pub total: Option<u64>,
    pub completed: Option<u64>,
}

impl PullProgress {
    /// Completion percentage when the line carries byte counts.
    pub fn percent(&self) -> Option<f64> {
        match (self.completed, self.total) {
            (Some(done), Some(total)) if total > 0 => Some(done as f64 * 100.0 / total as f64),
            _ => None,
        }
    }
}

/// Provider backed by an Ollama server.
pub struct OllamaProvider {
    host: String,
    model: String,
    temperature: f64,
    max_tokens: Option<u32>,
    /// Bounded by the request timeout; used for one-shot calls.
    client: Client,
    /// No overall timeout; used for long-lived streams (chat, pull).
    stream_client: Client,
}

impl OllamaProvider {
    /// Create a provider for `model` on `host` with a per-request timeout.
    pub fn new(
        host: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ModelError> {
        let host = host.into().trim_end_matches('/').to_string();
        let build_err = |source: reqwest::Error| ModelError::Transport {
            url: host.clone(),
            source,
        };
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(build_err)?;
        let stream_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(build_err)?;
        Ok(Self {
            host,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            client,
            stream_client,
        })
    }

    /// Override sampling options sent with every chat request.
    pub fn with_options(mut self, temperature: f64, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.host, path.trim_start_matches('/'))
    }

    fn transport(&self, path: &str) -> impl FnOnce(reqwest::Error) -> ModelError {
        let url = self.url(path);
        move |source| ModelError::Transport { url, source }
    }

    /// Request body for `/api/chat`.
    pub fn chat_body(&self, messages: &[ChatMessage], tools: &[Value], stream: bool) -> Value {
        let mut options = json!({ "temperature": self.temperature });
        if let Some(n) = self.max_tokens {
            options["num_predict"] = json!(n);
        }
        let mut body = json!({
            "model": self.model,
            "messages": serialize_messages(messages),
            "stream": stream,
            "options": options,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
        }
        body
    }

    /// Names of all models installed on the server.
    pub async fn list_models(&self) -> Result<Vec<String>, ModelError> {
        let resp = self
            .client
            .get(self.url("api/tags"))
            .send()
            .await
            .map_err(self.transport("api/tags"))?;
        let resp = check_status(resp).await?;
        let json: Value = resp
            .json()
            .await
            .map_err(|e| ModelError::Protocol(format!("invalid /api/tags body: {e}")))?;
        let models = json
            .get("models")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ModelError::Protocol("/api/tags response has no `models` array".into())
            })?;
        Ok(models
            .iter()
            .filter_map(|m| {
                m.get("name")
                    .or_else(|| m.get("model"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect())
    }

    /// Whether `model` is installed.
    pub async fn has_model(&self, model: &str) -> Result<bool, ModelError> {
        let installed = self.list_models().await?;
        Ok(installed.iter().any(|name| model_matches(name, model)))
    }

    /// Download `model`, reporting each progress line to `on_progress`.
    ///
    /// Malformed progress lines are skipped.  An `error` field aborts the
    /// pull, and the stream must end with a `success` status.
    pub async fn pull_model(
        &self,
        model: &str,
        mut on_progress: impl FnMut(&PullProgress) + Send,
    ) -> Result<(), ModelError> {
        let resp = self
            .stream_client
            .post(self.url("api/pull"))
            .json(&json!({ "name": model, "model": model, "stream": true }))
            .send()
            .await
            .map_err(self.transport("api/pull"))?;
        let resp = check_status(resp).await.map_err(|e| ModelError::PullFailed {
            model: model.to_string(),
            reason: e.to_string(),
        })?;

        let mut last_status = String::new();
        let mut lines = Box::pin(ndjson_lines(resp));
        while let Some(line) = lines.next().await {
            let value = match line {
                Ok(v) => v,
                Err(e) => {
                    return Err(ModelError::PullFailed {
                        model: model.to_string(),
                        reason: e.to_string(),
                    })
                }
            };
            if let Some(err) = value.get("error").and_then(Value::as_str) {
                return Err(ModelError::PullFailed {
                    model: model.to_string(),
                    reason: err.to_string(),
                });
            }
            let progress = PullProgress {
                status: value
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                total: value.get("total").and_then(Value::as_u64),
                completed: value.get("completed").and_then(Value::as_u64),
            };
            if !progress.status.is_empty() {
                last_status = progress.status.clone();
            }
            on_progress(&progress);
        }

        let last = last_status.to_lowercase();
        if last == "success" || last.contains("exists") {
            debug!(model, "pull completed");
            Ok(())
        } else {
            Err(ModelError::PullFailed {
                model: model.to_string(),
                reason: if last.is_empty() {
                    "stream ended without a status".to_string()
                } else {
                    format!("stream ended with status '{last_status}'")
                },
            })
        }
    }

    async fn post_chat(&self, body: &Value, client: &Client) -> Result<Response, ModelError> {
        let resp = client
            .post(self.url("api/chat"))
            .json(body)
            .send()
            .await
            .map_err(self.transport("api/chat"))?;
        check_status(resp).await.map_err(|e| match e {
            ModelError::Http { status: 404, ref body } if body.contains("not found") => {
                ModelError::ModelUnavailable {
                    model: self.model.clone(),
                }
            }
            other => other,
        })
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn send_chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ProviderResponse, ModelError> {
        let body = self.chat_body(messages, tools, false);
        let resp = self.post_chat(&body, &self.client).await?;
        let json: Value = resp
            .json()
            .await
            .map_err(|e| ModelError::Protocol(format!("invalid /api/chat body: {e}")))?;
        parse_chat_response(&json)
    }

    fn send_chat_stream<'a>(&'a self, messages: &'a [ChatMessage]) -> ChatStream<'a> {
        Box::pin(async_stream::try_stream! {
            let body = self.chat_body(messages, &[], true);
            let resp = self.post_chat(&body, &self.stream_client).await?;
            let mut lines = Box::pin(ndjson_lines(resp));
            while let Some(line) = lines.next().await {
                let value = line?;
                if let Some(err) = value.get("error").and_then(Value::as_str) {
                    Err(ModelError::Protocol(err.to_string()))?;
                }
                if let Some(delta) = value["message"]["content"].as_str() {
                    if !delta.is_empty() {
                        yield delta.to_string();
                    }
                }
                if value["done"].as_bool() == Some(true) {
                    break;
                }
            }
        })
    }
}

/// Interpret a non-streaming `/api/chat` response.
pub fn parse_chat_response(json: &Value) -> Result<ProviderResponse, ModelError> {
    if let Some(err) = json.get("error").and_then(Value::as_str) {
        return Err(ModelError::Protocol(err.to_string()));
    }
    let message = json
        .get("message")
        .ok_or_else(|| ModelError::Protocol("response has no `message`".into()))?;
    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let calls: Vec<ToolCall> = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    if calls.is_empty() {
        Ok(ProviderResponse::Final(content))
    } else {
        Ok(ProviderResponse::ToolCalls { content, calls })
    }
}

/// `{"function": {"name": ..., "arguments": {...} | "<json>"}}`
fn parse_tool_call(item: &Value) -> Option<ToolCall> {
    let func = item.get("function").unwrap_or(item);
    let name = func.get("name")?.as_str()?.to_string();
    let arguments = match func.get("arguments") {
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(v) => v,
            Err(e) => {
                warn!(tool = %name, error = %e, "tool call arguments are not valid JSON");
                Value::Object(Default::default())
            }
        },
        Some(v) => v.clone(),
        None => Value::Object(Default::default()),
    };
    Some(ToolCall::new(name, arguments))
}

/// Case-insensitive model name comparison.  A requested name without a tag
/// matches any tag of the same model (`llama3.1` ≙ `llama3.1:latest`).
pub fn model_matches(installed: &str, requested: &str) -> bool {
    let installed = installed.trim().to_lowercase();
    let requested = requested.trim().to_lowercase();
    if installed == requested {
        return true;
    }
    if requested.contains(':') {
        return false;
    }
    installed.split(':').next() == Some(requested.as_str())
}

async fn check_status(resp: Response) -> Result<Response, ModelError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ModelError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Split a response body into parsed NDJSON objects.  Lines that fail to
/// parse are logged and skipped.
///
/// Network chunks may end inside a multi-byte character, so bytes are only
/// decoded once a whole line has arrived.
fn ndjson_lines(resp: Response) -> impl tokio_stream::Stream<Item = Result<Value, ModelError>> {
    async_stream::stream! {
        let url = resp.url().to_string();
        let mut bytes = resp.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(source) => {
                    yield Err(ModelError::Transport { url: url.clone(), source });
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(v) = parse_ndjson_line(String::from_utf8_lossy(&line).trim()) {
                    yield Ok(v);
                }
            }
        }
        if let Some(v) = parse_ndjson_line(String::from_utf8_lossy(&buffer).trim()) {
            yield Ok(v);
        }
    }
}

fn parse_ndjson_line(line: &str) -> Option<Value> {
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "skipping malformed stream line");
            None
        }
    }
}
