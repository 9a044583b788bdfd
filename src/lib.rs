//! codeloop: a terminal coding assistant that lets a local language model
//! read, write and run code inside one workspace directory.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod agent;
pub mod cli;
pub mod config;
pub mod logs;
pub mod models;
pub mod runner;
pub mod session;
pub mod setup;
pub mod tools;
pub mod utils;
pub mod workspace;

/// Return the codeloop home directory.
///
/// Resolution order:
/// 1. `CODELOOP_HOME` environment variable
/// 2. `$HOME/.codeloop`
pub fn codeloop_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("CODELOOP_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".codeloop")
    }
}
