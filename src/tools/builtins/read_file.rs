//! Built-in `read_file` tool: reads a text file inside the workspace.

use serde_json::{Map, Value};

use crate::tools::{
    normalize_placeholder_path, required_str, Dispatcher, ToolError,
    ToolMeta, ToolOutput, ToolParam,
};

/// Args: `{ "file_path": "…" }`
pub async fn read_file(
    ctx: &Dispatcher,
    args: &Map<String, Value>,
) -> Result<ToolOutput, ToolError> {
    let raw = required_str(args, "file_path")?;
    let path = normalize_placeholder_path(raw);
    let content = ctx.workspace().read(&path)?;
    let resolved = ctx.workspace().resolve(&path)?;
    Ok(ToolOutput::FileRead {
        file_path: ctx.workspace().relative(&resolved),
        content,
    })
}

pub fn meta() -> ToolMeta {
    ToolMeta {
        name: "read_file".into(),
        description: "Read the contents of a text file in the workspace.".into(),
        params: vec![ToolParam::required(
            "file_path",
            "string",
            "Path of the file, relative to the workspace root",
        )],
    }
}
