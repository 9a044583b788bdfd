//! Startup provisioning: make sure the model server is reachable and the
//! configured model is installed, pulling it when missing.

use std::time::Duration;

use tracing::{info, warn};

use crate::models::{ModelError, ModelProvider, OllamaProvider, PullProgress};

#[derive(Debug, Clone)]
pub struct SetupOptions {
    /// Reachability attempts before giving up.
    pub retries: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub retry_delay: Duration,
    /// Download the model when it is not installed.
    pub auto_pull: bool,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_secs(1),
            auto_pull: true,
        }
    }
}

/// Check reachability, then model availability, pulling the model if
/// needed.  `on_progress` sees every pull progress line.
pub async fn ensure_model_ready(
    provider: &OllamaProvider,
    opts: &SetupOptions,
    on_progress: impl FnMut(&PullProgress) + Send,
) -> Result<(), ModelError> {
    let model = provider.model().to_string();
    let installed = list_with_retries(provider, opts).await?;
    if installed
        .iter()
        .any(|name| crate::models::ollama::model_matches(name, &model))
    {
        info!(%model, "model available");
        return Ok(());
    }

    if !opts.auto_pull {
        return Err(ModelError::ModelUnavailable { model });
    }

    info!(%model, "model not installed, pulling");
    provider.pull_model(&model, on_progress).await?;

    if provider.has_model(&model).await? {
        Ok(())
    } else {
        Err(ModelError::ModelUnavailable { model })
    }
}

async fn list_with_retries(
    provider: &OllamaProvider,
    opts: &SetupOptions,
) -> Result<Vec<String>, ModelError> {
    let attempts = opts.retries.max(1);
    let mut delay = opts.retry_delay;
    let mut attempt = 1;
    loop {
        match provider.list_models().await {
            Ok(models) => return Ok(models),
            Err(e) if e.is_transport() && attempt < attempts => {
                warn!(
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "model server unreachable, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Operator-facing guidance for a setup failure.
pub fn remediation(err: &ModelError, host: &str, model: &str) -> String {
    match err {
        ModelError::Transport { .. } => format!(
            "Could not connect to the model server at {host}.\n\
             - Make sure Ollama is installed (https://ollama.com/download)\n\
             - Start it with `ollama serve`\n\
             - Or point `host` in the config / `--host` at a running server"
        ),
        ModelError::ModelUnavailable { .. } | ModelError::PullFailed { .. } => format!(
            "Model '{model}' is not available on {host}.\n\
             - Pull it manually with `ollama pull {model}`\n\
             - Check the model name with `ollama list`\n\
             - Or choose another model with `--model`"
        ),
        ModelError::Http { status, .. } => format!(
            "The model server at {host} answered with HTTP {status}.\n\
             - Check the server logs and that {host} is an Ollama endpoint"
        ),
        ModelError::Protocol(_) => format!(
            "The server at {host} did not answer like an Ollama server.\n\
             - Check that `host` points at the Ollama API (default http://localhost:11434)"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediation_mentions_pull_command() {
        let err = ModelError::ModelUnavailable {
            model: "llama3.1".into(),
        };
        let text = remediation(&err, "http://localhost:11434", "llama3.1");
        assert!(text.contains("ollama pull llama3.1"));
    }

    #[test]
    fn remediation_for_http_status() {
        let err = ModelError::Http {
            status: 502,
            body: String::new(),
        };
        assert!(remediation(&err, "http://h", "m").contains("HTTP 502"));
    }
}
