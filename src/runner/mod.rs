//! Command runner: executes a shell command inside the workspace root.
//!
//! Commands run through the platform shell (`sh -c` / `cmd /C`) with the
//! process environment inherited.  stdout and stderr are captured
//! separately and decoded lossily.  A non-zero exit code is a normal
//! result; only launch failures and timeouts are errors.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::tools::ToolError;
use crate::utils::truncate_utf8_owned;

/// Per-stream capture limit.
pub const MAX_OUTPUT: usize = 256 * 1024;

const PIPE_GRACE: Duration = Duration::from_secs(2);

/// Default command timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Captured result of a completed command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs shell commands with the workspace root as working directory.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    workdir: PathBuf,
    default_timeout: Duration,
}

impl CommandRunner {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `command` with the default timeout.
    pub async fn run(&self, command: &str) -> Result<CommandOutput, ToolError> {
        self.run_with_timeout(command, self.default_timeout).await
    }

    /// Run `command`, killing it (and, on Unix, its whole process group)
    /// once `timeout` expires.
    pub async fn run_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ToolError> {
        if command.trim().is_empty() {
            return Err(ToolError::InvalidArgument("command must not be empty".into()));
        }

        let mut cmd = shell_command(command);
        cmd.current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ToolError::LaunchError {
            command: command.to_string(),
            source,
        })?;
        let pid = child.id();
        debug!(command, pid, timeout_secs = timeout.as_secs(), "command spawned");

        // Drain both pipes concurrently so a chatty child cannot block on a
        // full pipe while we wait for it.
        let stdout_buf = SharedCapture::default();
        let stderr_buf = SharedCapture::default();
        let mut stdout_task = spawn_capture(child.stdout.take(), stdout_buf.clone());
        let mut stderr_task = spawn_capture(child.stderr.take(), stderr_buf.clone());

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(ToolError::Io {
                    path: self.workdir.clone(),
                    source: e,
                })
            }
            Err(_elapsed) => {
                warn!(command, timeout_secs = timeout.as_secs(), "command timed out, killing");
                kill_tree(&mut child, pid).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ToolError::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
        };

        // Background jobs started by the command may keep a pipe open after
        // the shell exits. Keep whatever arrived within the grace period.
        let drained = tokio::time::timeout(PIPE_GRACE, async {
            let _ = tokio::join!(&mut stdout_task, &mut stderr_task);
        })
        .await;
        if drained.is_err() {
            debug!(command, "pipe still open after exit, keeping partial output");
            stdout_task.abort();
            stderr_task.abort();
        }

        let stdout_cap = stdout_buf.take();
        let stderr_cap = stderr_buf.take();
        let stdout = String::from_utf8_lossy(&stdout_cap.bytes).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_cap.bytes).into_owned();
        let truncated = stdout_cap.overflowed
            || stderr_cap.overflowed
            || stdout.len() > MAX_OUTPUT
            || stderr.len() > MAX_OUTPUT;

        let output = CommandOutput {
            stdout: truncate_utf8_owned(stdout, MAX_OUTPUT),
            stderr: truncate_utf8_owned(stderr, MAX_OUTPUT),
            exit_code: status.code(),
            truncated,
        };
        debug!(command, exit_code = ?output.exit_code, "command finished");
        Ok(output)
    }
}

/// Bytes read from one pipe, capped at [`MAX_OUTPUT`].
#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    overflowed: bool,
}

/// Lives outside the reader task so an aborted reader still leaves what it
/// read behind.
#[derive(Debug, Clone, Default)]
struct SharedCapture(Arc<Mutex<Capture>>);

impl SharedCapture {
    fn push(&self, chunk: &[u8]) {
        let Ok(mut cap) = self.0.lock() else { return };
        let room = MAX_OUTPUT.saturating_sub(cap.bytes.len());
        if chunk.len() > room {
            cap.overflowed = true;
        }
        let keep = chunk.len().min(room);
        cap.bytes.extend_from_slice(&chunk[..keep]);
    }

    fn take(&self) -> Capture {
        self.0
            .lock()
            .map(|mut cap| std::mem::take(&mut *cap))
            .unwrap_or_default()
    }
}

/// Read `pipe` to EOF. Bytes past the cap are read and dropped so the child
/// never stalls on a full pipe.
fn spawn_capture<R>(pipe: Option<R>, sink: SharedCapture) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut chunk = vec![0u8; 8 * 1024];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.push(&chunk[..n]),
            }
        }
    })
}

#[cfg(unix)]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

async fn kill_tree(child: &mut tokio::process::Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // The child leads its own process group; signal the group so
        // grandchildren spawned by the shell die too.
        // SAFETY: killpg only sends a signal. `pid` is our child, spawned
        // with `process_group(0)` and not yet reaped, so its pid is also
        // its process group id and cannot have been reused.
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            warn!(
                pid,
                error = %std::io::Error::last_os_error(),
                "failed to kill process group"
            );
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
    let _ = child.kill().await;
}
