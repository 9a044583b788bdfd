//! Built-in `find_files` tool: recursive glob search from the workspace root.

use serde_json::{Map, Value};

use crate::tools::{
    normalize_placeholder_path, optional_str, required_str, Dispatcher, ToolError, ToolMeta,
    ToolOutput, ToolParam,
};

/// Matches reported back to the model.
pub const MAX_MATCHES: usize = 100;

/// Args: `{ "pattern": "*.py", "directory?": "…" }`
pub async fn find_files(
    ctx: &Dispatcher,
    args: &Map<String, Value>,
) -> Result<ToolOutput, ToolError> {
    let pattern = required_str(args, "pattern")?.trim().to_string();
    let dir = normalize_placeholder_path(optional_str(args, "directory").unwrap_or("."));

    // One past the cap so the count can say "more than shown".
    let mut matches = ctx.workspace().find(&pattern, &dir, MAX_MATCHES + 1)?;
    let total_count = matches.len();
    matches.truncate(MAX_MATCHES);
    Ok(ToolOutput::FilesFound {
        pattern,
        matches,
        total_count,
    })
}

pub fn meta() -> ToolMeta {
    ToolMeta {
        name: "find_files".into(),
        description: "Find files in the workspace matching a glob pattern (e.g. \"*.py\"), \
                      searching all subdirectories."
            .into(),
        params: vec![
            ToolParam::required(
                "pattern",
                "string",
                "Glob pattern matched against file names at any depth",
            ),
            ToolParam::optional("directory", "string", "Directory to search (default: \".\")"),
        ],
    }
}
