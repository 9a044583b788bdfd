use codeloop::agent::{Agent, AgentSettings};
use codeloop::cli;
use codeloop::config::{self, Config};
use codeloop::models::OllamaProvider;
use codeloop::runner::CommandRunner;
use codeloop::session::{Session, SessionLog};
use codeloop::setup::{self, SetupOptions};
use codeloop::tools::{self, Dispatcher};
use codeloop::workspace::Workspace;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "codeloop",
    version,
    about = "Coding assistant that lets a local model read, write and run code in one directory"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workspace directory (default: current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Model server URL
    #[arg(long)]
    host: Option<String>,

    /// Plain streaming chat without tools
    #[arg(long)]
    no_tools: bool,

    /// Do not write a session log
    #[arg(long)]
    no_session_log: bool,

    /// Run a single request and exit
    #[arg(short, long)]
    prompt: Option<String>,

    /// More diagnostics on stderr (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    codeloop::logs::init(cli.verbose);

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path).await?,
        None => Config::load_or_default(&config::default_config_path()).await?,
    };
    cli::Overrides {
        workspace: cli.workspace,
        model: cli.model,
        host: cli.host,
        no_tools: cli.no_tools,
        no_session_log: cli.no_session_log,
    }
    .apply(&mut cfg);
    cfg.validate()?;

    let root = cfg.workspace_root()?;
    let workspace = Arc::new(
        Workspace::open(&root)
            .with_context(|| format!("cannot open workspace {}", root.display()))?,
    );

    let provider = OllamaProvider::new(
        cfg.host.clone(),
        cfg.model.clone(),
        Duration::from_secs(cfg.request_timeout_secs),
    )?
    .with_options(cfg.temperature, cfg.max_tokens);

    // Provisioning failures end the process with guidance instead of a trace.
    let opts = SetupOptions {
        retries: cfg.setup_retries,
        ..SetupOptions::default()
    };
    if let Err(e) = setup::ensure_model_ready(&provider, &opts, cli::print_pull_progress).await {
        eprintln!("error: {e}\n");
        eprintln!("{}", setup::remediation(&e, &cfg.host, &cfg.model));
        std::process::exit(1);
    }

    let runner = CommandRunner::new(workspace.root())
        .with_default_timeout(Duration::from_secs(cfg.command_timeout_secs));
    let dispatcher = Dispatcher::new(workspace.clone(), runner);
    let offered = if cfg.tools_enabled {
        tools::catalog_for_model(&cfg.model, &cfg.restricted_tool_models)
    } else {
        Vec::new()
    };

    let mut session = Session::new(cfg.model.clone(), dispatcher, offered);
    if cfg.session_log {
        let id = session.id().to_string();
        let dir = codeloop::utils::sessions_dir();
        match SessionLog::create(&dir, &id, &cfg.model, workspace.root()).await {
            Ok(log) => session = session.with_log(log),
            Err(e) => warn!(error = %e, "session log disabled"),
        }
    }
    info!(session = %session.id(), model = %cfg.model, "session started");

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let mut agent =
        Agent::new(session, AgentSettings::from_config(&cfg, &cfg.model)).with_events(tx);

    if let Some(prompt) = cli.prompt {
        let mut rx = rx;
        let outcome = cli::run_turn_with_notices(&mut agent, &provider, &mut rx, &prompt).await;
        if outcome.is_err() {
            std::process::exit(1);
        }
        return Ok(());
    }

    cli::print_banner(&agent, &cfg.host);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    cli::run_repl(&mut agent, &provider, rx, cli::stdin_lines(), cancel).await?;
    Ok(())
}
