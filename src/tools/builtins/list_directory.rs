//! Built-in `list_directory` tool.

use serde_json::{Map, Value};

use crate::tools::{
    normalize_placeholder_path, optional_bool, optional_str, Dispatcher, ListedEntry, ToolError,
    ToolMeta, ToolOutput, ToolParam,
};

/// Entries reported back to the model; `total_count` carries the real size.
pub const MAX_LISTED: usize = 50;

/// Args: `{ "directory?": "…", "include_hidden?": bool }`
pub async fn list_directory(
    ctx: &Dispatcher,
    args: &Map<String, Value>,
) -> Result<ToolOutput, ToolError> {
    let dir = normalize_placeholder_path(optional_str(args, "directory").unwrap_or("."));
    let include_hidden = optional_bool(args, "include_hidden").unwrap_or(false);

    let entries = ctx.workspace().list(&dir, include_hidden)?;
    let total_count = entries.len();
    let files = entries
        .into_iter()
        .take(MAX_LISTED)
        .map(|info| ListedEntry {
            size: info.is_file.then_some(info.size),
            path: info.path,
            is_dir: info.is_dir,
        })
        .collect();

    let resolved = ctx.workspace().resolve(&dir)?;
    Ok(ToolOutput::DirectoryListing {
        directory: ctx.workspace().relative(&resolved),
        files,
        total_count,
    })
}

pub fn meta() -> ToolMeta {
    ToolMeta {
        name: "list_directory".into(),
        description: "List files and directories in a workspace directory (directories first)."
            .into(),
        params: vec![
            ToolParam::optional(
                "directory",
                "string",
                "Directory to list, relative to the workspace root (default: \".\")",
            ),
            ToolParam::optional("include_hidden", "boolean", "Also list dotfiles"),
        ],
    }
}
