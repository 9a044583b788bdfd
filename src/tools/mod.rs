//! Tool catalog and dispatcher.
//!
//! The model can call five tools: `write_file`, `read_file`,
//! `list_directory`, `run_command` and `find_files`.  Each builtin lives in
//! its own module under [`builtins`] and exposes a `meta()` describing it
//! plus an async handler.  [`Dispatcher::dispatch`] maps a tool name and
//! argument object onto the right handler and always answers with a
//! [`ToolResult`]; errors never propagate to the caller.

pub mod builtins;
pub mod error;
pub mod parsing;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::runner::{CommandOutput, CommandRunner};
use crate::workspace::Workspace;

pub use error::ToolError;

/// Names of every registered tool, in catalog order.
pub const TOOL_NAMES: &[&str] = &[
    "write_file",
    "read_file",
    "list_directory",
    "run_command",
    "find_files",
];

/// Tools offered to models listed as restricted in the config.
pub const RESTRICTED_TOOL_NAMES: &[&str] = &["write_file", "read_file", "run_command"];

/// Whether `name` is a registered tool.
pub fn is_known_tool(name: &str) -> bool {
    TOOL_NAMES.contains(&name)
}

// ── Catalog ──────────────────────────────────────────────────

/// One parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    /// JSON-Schema type (`"string"`, `"number"`, …).
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl ToolParam {
    pub fn required(name: &str, kind: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: &str, kind: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Metadata describing a tool available to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMeta {
    /// Short machine-friendly name (e.g. `"read_file"`).
    pub name: String,
    /// Human-readable one-liner describing what the tool does.
    pub description: String,
    /// Parameters in declaration order.
    pub params: Vec<ToolParam>,
}

impl ToolMeta {
    /// JSON-Schema object for the tool's arguments.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            properties.insert(
                p.name.clone(),
                json!({ "type": p.kind, "description": p.description }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Function-calling wire shape understood by the model server.
    pub fn to_function_def(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters_schema(),
            }
        })
    }
}

/// Every tool, in catalog order.
pub fn catalog() -> Vec<ToolMeta> {
    vec![
        builtins::write_file::meta(),
        builtins::read_file::meta(),
        builtins::list_directory::meta(),
        builtins::run_command::meta(),
        builtins::find_files::meta(),
    ]
}

/// The tool set offered to `model`.  Models whose name starts with one of
/// `restricted_prefixes` (case-insensitive) only receive
/// [`RESTRICTED_TOOL_NAMES`].
pub fn catalog_for_model(model: &str, restricted_prefixes: &[String]) -> Vec<ToolMeta> {
    let model = model.to_lowercase();
    let restricted = restricted_prefixes
        .iter()
        .any(|p| !p.is_empty() && model.starts_with(&p.to_lowercase()));
    let all = catalog();
    if restricted {
        debug!(%model, "offering restricted tool subset");
        all.into_iter()
            .filter(|m| RESTRICTED_TOOL_NAMES.contains(&m.name.as_str()))
            .collect()
    } else {
        all
    }
}

/// Serialize a tool set into the `tools` array of a chat request.
pub fn function_defs(tools: &[ToolMeta]) -> Vec<Value> {
    tools.iter().map(ToolMeta::to_function_def).collect()
}

// ── Calls and results ────────────────────────────────────────

/// A model-issued request to invoke a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// One entry of a directory listing as reported to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ListedEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: Option<u64>,
}

/// Successful outcome of a tool, one variant per tool.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    FileWritten {
        file_path: String,
        bytes: usize,
    },
    FileRead {
        file_path: String,
        content: String,
    },
    DirectoryListing {
        directory: String,
        files: Vec<ListedEntry>,
        total_count: usize,
    },
    CommandCompleted {
        command: String,
        output: CommandOutput,
    },
    FilesFound {
        pattern: String,
        matches: Vec<String>,
        total_count: usize,
    },
}

/// Uniform result envelope: success with a tool-specific payload, or an error.
#[derive(Debug, Clone)]
pub enum ToolResult {
    Success(ToolOutput),
    Failure { kind: &'static str, error: String },
}

impl ToolResult {
    pub fn failure(err: &ToolError) -> Self {
        ToolResult::Failure {
            kind: err.kind(),
            error: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ToolResult::Failure { error, .. } => Some(error),
            ToolResult::Success(_) => None,
        }
    }

    /// JSON object fed back to the model.
    pub fn to_value(&self) -> Value {
        match self {
            ToolResult::Failure { kind, error } => json!({
                "success": false,
                "error": error,
                "error_kind": kind,
            }),
            ToolResult::Success(out) => match out {
                ToolOutput::FileWritten { file_path, bytes } => json!({
                    "success": true,
                    "message": format!("File written successfully: {file_path}"),
                    "file_path": file_path,
                    "bytes": bytes,
                }),
                ToolOutput::FileRead { file_path, content } => json!({
                    "success": true,
                    "file_path": file_path,
                    "content": content,
                }),
                ToolOutput::DirectoryListing {
                    directory,
                    files,
                    total_count,
                } => json!({
                    "success": true,
                    "directory": directory,
                    "files": files,
                    "total_count": total_count,
                }),
                ToolOutput::CommandCompleted { command, output } => {
                    let mut v = json!({
                        "success": true,
                        "command": command,
                        "stdout": output.stdout,
                        "stderr": output.stderr,
                        "return_code": output.exit_code,
                    });
                    if output.truncated {
                        v["truncated"] = json!(true);
                    }
                    v
                }
                ToolOutput::FilesFound {
                    pattern,
                    matches,
                    total_count,
                } => json!({
                    "success": true,
                    "pattern": pattern,
                    "matches": matches,
                    "total_count": total_count,
                }),
            },
        }
    }

    /// Compact JSON string of [`to_value`](Self::to_value).
    pub fn to_json_string(&self) -> String {
        self.to_value().to_string()
    }
}

// ── Argument helpers ─────────────────────────────────────────

pub(crate) fn required_str<'a>(
    args: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArgument(format!("{key} is required")))
}

pub(crate) fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Accepts numbers and numeric strings (models send both).
pub(crate) fn optional_f64(args: &Map<String, Value>, key: &str) -> Option<f64> {
    match args.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn optional_bool(args: &Map<String, Value>, key: &str) -> Option<bool> {
    match args.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

// ── Placeholder paths ────────────────────────────────────────

/// Stand-in prefixes models like to invent instead of a real path.
const PLACEHOLDER_PREFIXES: &[&str] = &[
    "/path/to/",
    "path/to/",
    "/your/path/to/",
    "your/path/to/",
    "~/",
    "$HOME/",
    "${HOME}/",
];

/// Strip hallucinated placeholder prefixes from a model-supplied path.
///
/// This only tidies the input; containment is still enforced by
/// [`Workspace`].
pub fn normalize_placeholder_path(raw: &str) -> String {
    let mut p = raw.trim();
    loop {
        let before = p;
        for prefix in PLACEHOLDER_PREFIXES {
            if let Some(rest) = p.strip_prefix(prefix) {
                p = rest;
            }
        }
        if p == before {
            break;
        }
    }
    if p == "~" {
        p = "";
    }
    if cfg!(windows) {
        p = p.trim_start_matches(['/', '\\']);
    }
    if p.is_empty() {
        ".".to_string()
    } else {
        p.to_string()
    }
}

// ── Dispatcher ───────────────────────────────────────────────

/// Maps tool calls onto workspace and command-runner operations.
///
/// Cheap to clone; concurrent calls share the same workspace.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    workspace: Arc<Workspace>,
    runner: CommandRunner,
}

impl Dispatcher {
    pub fn new(workspace: Arc<Workspace>, runner: CommandRunner) -> Self {
        Self { workspace, runner }
    }

    /// Open `root` and build a dispatcher with a runner rooted there.
    pub fn for_root(root: &Path) -> Result<Self, ToolError> {
        let workspace = Arc::new(Workspace::open(root)?);
        let runner = CommandRunner::new(workspace.root());
        Ok(Self::new(workspace, runner))
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    /// Execute `name` with `args`.  Unknown tools and every failure come
    /// back as [`ToolResult::Failure`].
    pub async fn dispatch(&self, name: &str, args: &Map<String, Value>) -> ToolResult {
        debug!(tool = name, "dispatching tool");
        let outcome = match name {
            "write_file" => builtins::write_file::write_file(self, args).await,
            "read_file" => builtins::read_file::read_file(self, args).await,
            "list_directory" => builtins::list_directory::list_directory(self, args).await,
            "run_command" => builtins::run_command::run_command(self, args).await,
            "find_files" => builtins::find_files::find_files(self, args).await,
            other => Err(ToolError::UnknownTool {
                name: other.to_string(),
            }),
        };
        match outcome {
            Ok(out) => ToolResult::Success(out),
            Err(e) => {
                warn!(tool = name, error = %e, "tool failed");
                ToolResult::failure(&e)
            }
        }
    }

    /// Convenience wrapper for a [`ToolCall`].
    pub async fn dispatch_call(&self, call: &ToolCall) -> ToolResult {
        self.dispatch(&call.name, &call.arguments).await
    }
}
