//! Append-only, human-readable session log.
//!
//! One file per session under `<home>/sessions/<timestamp>-<id>.log`.  Each
//! entry is a timestamped line; continuation lines of multi-line content are
//! indented so entries stay easy to scan.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::utils::truncate_str;

/// Tool results are clipped in the log; the model still sees them whole.
const MAX_LOGGED_RESULT: usize = 4096;

#[derive(Debug, Clone)]
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    /// Create the log file for `session_id` inside `dir`.
    pub async fn create(
        dir: &Path,
        session_id: &str,
        model: &str,
        workspace: &Path,
    ) -> anyhow::Result<Self> {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("create session log dir {}", dir.display()))?;
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("{stamp}-{session_id}.log"));
        let log = Self { path };
        log.append(
            "SESSION",
            &format!("id={session_id} model={model} workspace={}", workspace.display()),
        )
        .await?;
        debug!(path = %log.path.display(), "session log created");
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry tagged `kind`.
    pub async fn append(&self, kind: &str, text: &str) -> anyhow::Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open session log {}", self.path.display()))?;
        file.write_all(format_entry(kind, text).as_bytes()).await?;
        Ok(())
    }

    /// Like [`append`](Self::append) but only warns on failure; the log is
    /// never allowed to break a turn.
    pub async fn record(&self, kind: &str, text: &str) {
        if let Err(e) = self.append(kind, text).await {
            warn!(error = %e, "session log write failed");
        }
    }

    pub async fn user(&self, text: &str) {
        self.record("USER", text).await;
    }

    pub async fn assistant(&self, text: &str) {
        self.record("ASSISTANT", text).await;
    }

    pub async fn tool(&self, name: &str, arguments: &serde_json::Value, result: &serde_json::Value) {
        let text = format!(
            "{name} {arguments}\n-> {}",
            truncate_str(&result.to_string(), MAX_LOGGED_RESULT)
        );
        self.record("TOOL", &text).await;
    }
}

fn format_entry(kind: &str, text: &str) -> String {
    let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let body = text.trim_end().replace('\n', "\n    ");
    format!("[{ts}] {kind}: {body}\n")
}
