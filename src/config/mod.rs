//! Configuration loaded from `config.yaml`.
//!
//! Every field is optional; an absent file yields [`Config::default`].
//! Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::models::ollama::DEFAULT_HOST;

/// Role tool results are fed back under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultRole {
    /// A dedicated `tool` message holding the result JSON.
    #[default]
    Tool,
    /// A `user` message tagged `[Tool Result for <name>]`, for models that
    /// ignore the `tool` role.
    User,
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Model server base URL.
    pub host: String,
    pub model: String,
    /// Workspace root; the current directory when unset.
    pub workspace: Option<PathBuf>,
    pub temperature: f64,
    /// Sent as `num_predict` when set.
    pub max_tokens: Option<u32>,
    /// Model requests per user turn.
    pub max_tool_iterations: usize,
    /// Trailing history messages sent with each request.
    pub history_window: usize,
    pub command_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub tools_enabled: bool,
    pub tool_result_role: ToolResultRole,
    /// Model-name prefixes that only get `read_file`, `write_file` and
    /// `run_command`.
    pub restricted_tool_models: Vec<String>,
    /// Model-name prefixes whose tool results go in `user` messages.
    pub user_role_tool_models: Vec<String>,
    pub session_log: bool,
    /// Reachability attempts at startup.
    pub setup_retries: u32,
    pub system_prompt: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            model: "llama3.1".to_string(),
            workspace: None,
            temperature: 0.7,
            max_tokens: None,
            max_tool_iterations: 5,
            history_window: 10,
            command_timeout_secs: crate::runner::DEFAULT_TIMEOUT_SECS,
            request_timeout_secs: 300,
            tools_enabled: true,
            tool_result_role: ToolResultRole::Tool,
            restricted_tool_models: Vec::new(),
            user_role_tool_models: Vec::new(),
            session_log: true,
            setup_retries: 3,
            system_prompt: None,
        }
    }
}

/// Default config location: `<home>/config.yaml`.
pub fn default_config_path() -> PathBuf {
    crate::codeloop_home().join("config.yaml")
}

fn bak_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

impl Config {
    /// Load and validate the config at `path`, falling back to
    /// `<path>.bak` when the file itself is missing.
    pub async fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let bak = bak_path(path);
                match tokio::fs::read_to_string(&bak).await {
                    Ok(c) => {
                        tracing::warn!(
                            path = %path.display(),
                            bak = %bak.display(),
                            "config file not found, falling back to .bak"
                        );
                        c
                    }
                    Err(_) => {
                        return Err(e).with_context(|| {
                            format!("failed to read config file: {}", path.display())
                        })
                    }
                }
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read config file: {}", path.display()));
            }
        };
        Self::from_yaml(&contents)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    /// Like [`load`](Self::load), but a missing file (and `.bak`) yields
    /// the defaults.
    pub async fn load_or_default(path: &Path) -> anyhow::Result<Config> {
        let exists = tokio::fs::try_exists(path).await.unwrap_or(false)
            || tokio::fs::try_exists(bak_path(path)).await.unwrap_or(false);
        if !exists {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        Self::load(path).await
    }

    /// Parse and validate YAML text.  An empty document is the defaults.
    pub fn from_yaml(contents: &str) -> anyhow::Result<Config> {
        let config: Config = if contents.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(contents).context("failed to parse config YAML")?
        };
        config.validate()?;
        tracing::debug!(model = %config.model, host = %config.host, "configuration loaded");
        Ok(config)
    }

    /// Validate semantic constraints that serde cannot enforce.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_tool_iterations == 0 {
            anyhow::bail!("config: max_tool_iterations must be at least 1");
        }
        if self.history_window == 0 {
            anyhow::bail!("config: history_window must be at least 1");
        }
        if self.command_timeout_secs == 0 {
            anyhow::bail!("config: command_timeout_secs=0 would kill every command");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("config: request_timeout_secs must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!(
                "config: temperature {} is outside 0.0..=2.0",
                self.temperature
            );
        }
        if self.model.trim().is_empty() {
            anyhow::bail!("config: model must not be empty");
        }
        if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            anyhow::bail!("config: host '{}' must be an http(s) URL", self.host);
        }
        Ok(())
    }

    /// Tool-result role for `model`, honouring `user_role_tool_models`.
    pub fn tool_result_role_for(&self, model: &str) -> ToolResultRole {
        let model = model.to_lowercase();
        let folded = self
            .user_role_tool_models
            .iter()
            .any(|p| !p.is_empty() && model.starts_with(&p.to_lowercase()));
        if folded {
            ToolResultRole::User
        } else {
            self.tool_result_role
        }
    }

    /// Absolute workspace root: the configured directory (relative paths
    /// are taken from the current directory) or the current directory.
    pub fn workspace_root(&self) -> anyhow::Result<PathBuf> {
        let cwd = std::env::current_dir().context("cannot determine current directory")?;
        Ok(match &self.workspace {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => cwd.join(p),
            None => cwd,
        })
    }
}
