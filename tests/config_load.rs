//! Config loading from disk.

use codeloop::config::{Config, ToolResultRole};
use std::path::PathBuf;
use tempfile::TempDir;

fn write_config(dir: &TempDir, name: &str, yaml: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, yaml).unwrap();
    path
}

#[tokio::test]
async fn full_config_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        "config.yaml",
        r#"
host: http://gpu-box:11434
model: qwen2.5-coder:7b
workspace: /srv/project
temperature: 0.2
max_tokens: 2048
max_tool_iterations: 8
history_window: 16
command_timeout_secs: 60
tool_result_role: user
restricted_tool_models: ["phi"]
session_log: false
system_prompt: "Be brief."
"#,
    );

    let cfg = Config::load(&path).await.unwrap();
    assert_eq!(cfg.host, "http://gpu-box:11434");
    assert_eq!(cfg.model, "qwen2.5-coder:7b");
    assert_eq!(cfg.workspace, Some(PathBuf::from("/srv/project")));
    assert_eq!(cfg.temperature, 0.2);
    assert_eq!(cfg.max_tokens, Some(2048));
    assert_eq!(cfg.max_tool_iterations, 8);
    assert_eq!(cfg.history_window, 16);
    assert_eq!(cfg.command_timeout_secs, 60);
    assert_eq!(cfg.tool_result_role, ToolResultRole::User);
    assert_eq!(cfg.restricted_tool_models, ["phi"]);
    assert!(!cfg.session_log);
    assert_eq!(cfg.system_prompt.as_deref(), Some("Be brief."));
    // Unset fields keep their defaults.
    assert_eq!(cfg.request_timeout_secs, 300);
    assert!(cfg.tools_enabled);
}

#[tokio::test]
async fn partial_config_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "config.yaml", "model: mistral\n");
    let cfg = Config::load(&path).await.unwrap();
    assert_eq!(cfg.model, "mistral");
    assert_eq!(cfg.host, "http://localhost:11434");
    assert_eq!(cfg.max_tool_iterations, 5);
    assert_eq!(cfg.history_window, 10);
    assert_eq!(cfg.command_timeout_secs, 30);
}

#[tokio::test]
async fn missing_file_falls_back_to_bak() {
    let dir = tempfile::tempdir().unwrap();
    write_config(&dir, "config.yaml.bak", "model: from-backup\n");
    let cfg = Config::load(&dir.path().join("config.yaml")).await.unwrap();
    assert_eq!(cfg.model, "from-backup");
}

#[tokio::test]
async fn missing_file_is_an_error_for_strict_load() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(&dir.path().join("nope.yaml")).await.unwrap_err();
    assert!(format!("{err:#}").contains("failed to read config file"));
}

#[tokio::test]
async fn missing_file_yields_defaults_when_optional() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config::load_or_default(&dir.path().join("config.yaml"))
        .await
        .unwrap();
    assert_eq!(cfg.model, Config::default().model);
}

#[tokio::test]
async fn unknown_fields_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "config.yaml", "model: llama3.1\nmodle_typo: x\n");
    let err = Config::load(&path).await.unwrap_err();
    assert!(format!("{err:#}").contains("modle_typo"));
}

#[tokio::test]
async fn invalid_values_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    for yaml in [
        "max_tool_iterations: 0\n",
        "history_window: 0\n",
        "command_timeout_secs: 0\n",
        "host: localhost:11434\n",
        "model: \"  \"\n",
    ] {
        let path = write_config(&dir, "config.yaml", yaml);
        assert!(Config::load(&path).await.is_err(), "accepted: {yaml}");
    }
}

#[tokio::test]
async fn malformed_yaml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "config.yaml", "model: [unterminated\n");
    let err = Config::load(&path).await.unwrap_err();
    assert!(format!("{err:#}").contains("invalid config file"));
}
