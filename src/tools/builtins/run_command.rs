//! Built-in `run_command` tool: runs a shell command in the workspace root.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::tools::{
    optional_f64, required_str, Dispatcher, ToolError,
    ToolMeta, ToolOutput, ToolParam,
};

/// Args: `{ "command": "…", "timeout?": seconds }`
///
/// A missing, non-positive or unrepresentable timeout falls back to the
/// runner default.
pub async fn run_command(
    ctx: &Dispatcher,
    args: &Map<String, Value>,
) -> Result<ToolOutput, ToolError> {
    let command = required_str(args, "command")?.to_string();
    let timeout = optional_f64(args, "timeout")
        .filter(|t| *t > 0.0)
        .and_then(|t| Duration::try_from_secs_f64(t).ok())
        .unwrap_or_else(|| ctx.runner().default_timeout());

    let output = ctx.runner().run_with_timeout(&command, timeout).await?;
    Ok(ToolOutput::CommandCompleted { command, output })
}

pub fn meta() -> ToolMeta {
    ToolMeta {
        name: "run_command".into(),
        description: "Run a shell command in the workspace directory and return its stdout, \
                      stderr and exit code."
            .into(),
        params: vec![
            ToolParam::required("command", "string", "Shell command to execute"),
            ToolParam::optional("timeout", "number", "Timeout in seconds (default: 30)"),
        ],
    }
}
