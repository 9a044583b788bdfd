//! Tool error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by workspace file access, the command runner and the
/// tool dispatcher.
///
/// None of these escape the dispatcher: they are folded into a failed
/// [`ToolResult`](crate::tools::ToolResult) and fed back to the model.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("path {path} is outside workspace {root}")]
    PathEscape { path: PathBuf, root: PathBuf },

    #[error("{path} not found")]
    NotFound { path: PathBuf },

    #[error("{path} is not a file")]
    NotAFile { path: PathBuf },

    #[error("{path} is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("could not decode {path} as text")]
    DecodeError { path: PathBuf },

    #[error("failed to write {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch `{command}`: {source}")]
    LaunchError {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout: command exceeded {seconds}s and was killed")]
    Timeout { seconds: u64 },

    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    /// Wrap an `io::Error` for `path`, mapping `NotFound` to [`ToolError::NotFound`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            ToolError::NotFound { path }
        } else {
            ToolError::Io { path, source }
        }
    }

    /// Short machine-friendly tag for the error variant.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::PathEscape { .. } => "PathEscape",
            ToolError::NotFound { .. } => "NotFound",
            ToolError::NotAFile { .. } => "NotAFile",
            ToolError::NotADirectory { .. } => "NotADirectory",
            ToolError::DecodeError { .. } => "DecodeError",
            ToolError::WriteError { .. } => "WriteError",
            ToolError::LaunchError { .. } => "LaunchError",
            ToolError::Timeout { .. } => "Timeout",
            ToolError::UnknownTool { .. } => "UnknownTool",
            ToolError::InvalidArgument(_) => "InvalidArgument",
            ToolError::Io { .. } => "Io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_escape_message_names_both_paths() {
        let err = ToolError::PathEscape {
            path: PathBuf::from("/etc/passwd"),
            root: PathBuf::from("/tmp/ws"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/etc/passwd"));
        assert!(msg.contains("/tmp/ws"));
        assert_eq!(err.kind(), "PathEscape");
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = ToolError::io(
            "missing.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, ToolError::NotFound { .. }));
    }

    #[test]
    fn timeout_message_starts_with_tag() {
        let err = ToolError::Timeout { seconds: 1 };
        assert!(err.to_string().starts_with("Timeout"));
    }
}
