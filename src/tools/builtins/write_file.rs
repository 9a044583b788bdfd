//! Built-in `write_file` tool: creates or overwrites a file inside the
//! workspace, creating missing parent directories.

use serde_json::{Map, Value};

use crate::tools::{
    normalize_placeholder_path, required_str, Dispatcher, ToolError,
    ToolMeta, ToolOutput, ToolParam,
};

/// Args: `{ "file_path": "…", "content": "…" }`
///
/// Non-string `content` (models sometimes send a JSON object for `.json`
/// files) is serialized back to JSON text.
pub async fn write_file(
    ctx: &Dispatcher,
    args: &Map<String, Value>,
) -> Result<ToolOutput, ToolError> {
    let raw = required_str(args, "file_path")?;
    let content = match args.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => {
            return Err(ToolError::InvalidArgument("content is required".into()))
        }
        Some(other) => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };

    let path = normalize_placeholder_path(raw);
    let written = ctx.workspace().write(&path, &content)?;
    Ok(ToolOutput::FileWritten {
        file_path: ctx.workspace().relative(&written),
        bytes: content.len(),
    })
}

pub fn meta() -> ToolMeta {
    ToolMeta {
        name: "write_file".into(),
        description: "Write content to a file in the workspace. Creates parent directories \
                      as needed and overwrites existing files."
            .into(),
        params: vec![
            ToolParam::required("file_path", "string", "Path of the file, relative to the workspace root"),
            ToolParam::required("content", "string", "Full content to write to the file"),
        ],
    }
}
