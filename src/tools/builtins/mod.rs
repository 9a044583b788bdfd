//! Built-in tool implementations.
//!
//! Each sub-module implements one tool: a `meta()` describing it for the
//! catalog and an async handler taking the [`Dispatcher`](super::Dispatcher)
//! and the raw argument object.

pub mod find_files;
pub mod list_directory;
pub mod read_file;
pub mod run_command;
pub mod write_file;
