use std::time::Duration;

use studio_launcher::config::LauncherConfig;
use studio_launcher::models::daemon::DaemonKind;
use studio_launcher::supervisor::RestartPolicy;
use studio_launcher::AppError;

fn sample_toml() -> &'static str {
    r#"
registry_path = "/srv/launcher/config.json"
projects_root = "/srv/games"
tool_dir = "/opt/launcher/tools"
project_marker = "default.project.json"

[supervision]
max_restarts = 5
restart_delay_ms = 500
crash_window_seconds = 30
log_capacity = 200
sweep_orphans = false
orphan_release_ms = 250

[file_sync]
program = "/opt/rojo/bin/rojo"
args = ["serve", "--port", "34872"]

[runtime_sync]
program = "rbxsync"
args = ["serve"]
extract_args = ["extract", "--all"]
connection_marker = "Plugin connected"

[editors]
cursor = "cursor"
zed = "zed"

[session_logs]
enabled = false
retain = 3

[studio_logs]
port = 20000
"#
}

#[test]
fn parses_valid_config() {
    let config = LauncherConfig::from_toml_str(sample_toml()).expect("config");

    assert_eq!(config.projects_root.to_string_lossy(), "/srv/games");
    assert_eq!(config.supervision.max_restarts, 5);
    assert_eq!(config.supervision.log_capacity, 200);
    assert_eq!(config.file_sync.args, vec!["serve", "--port", "34872"]);
    assert_eq!(config.runtime_sync.extract_args, vec!["extract", "--all"]);
    assert_eq!(config.runtime_sync.connection_marker, "Plugin connected");
    assert_eq!(config.editors.get("zed").map(String::as_str), Some("zed"));
    assert!(!config.session_logs.enabled);
    assert_eq!(config.session_logs.retain, 3);
    assert!(!config.supervision.sweep_orphans);
    assert_eq!(config.supervision.orphan_release(), Duration::from_millis(250));
    assert!(config.studio_logs.enabled);
    assert_eq!(config.studio_logs.port, 20000);
    assert_eq!(
        config.tool_dir.as_deref(),
        Some(std::path::Path::new("/opt/launcher/tools"))
    );
    assert_eq!(
        config.resolve_program(DaemonKind::FileSync),
        std::path::PathBuf::from("/opt/rojo/bin/rojo")
    );
}

#[test]
fn empty_document_yields_defaults() {
    let config = LauncherConfig::from_toml_str("").expect("config");

    assert_eq!(config.supervision.max_restarts, 3);
    assert_eq!(config.supervision.restart_delay(), Duration::from_secs(2));
    assert_eq!(config.supervision.crash_window(), Duration::from_secs(60));
    assert_eq!(config.supervision.log_capacity, 500);
    assert_eq!(config.program_for(DaemonKind::FileSync), "rojo");
    assert_eq!(config.program_for(DaemonKind::RuntimeSync), "rbxsync");
    assert_eq!(config.args_for(DaemonKind::FileSync), ["serve"]);
    assert_eq!(config.runtime_sync.connection_marker, "Studio connected");
    assert_eq!(config.project_marker, "default.project.json");
    assert!(config.session_logs.enabled);
    assert_eq!(config.session_logs.retain, 10);
    assert!(config.supervision.sweep_orphans);
    assert_eq!(config.supervision.orphan_release(), Duration::from_millis(500));
    assert!(config.studio_logs.enabled);
    assert_eq!(config.studio_logs.port, 19556);
    assert_eq!(config.editors.get("vscode").map(String::as_str), Some("code"));
}

#[test]
fn default_matches_empty_document() {
    let parsed = LauncherConfig::from_toml_str("").expect("config");
    assert_eq!(parsed, LauncherConfig::default());
}

#[test]
fn restart_policy_follows_supervision_section() {
    let config = LauncherConfig::from_toml_str(sample_toml()).expect("config");

    let policy = RestartPolicy::from(&config.supervision);

    assert_eq!(policy.max_restarts, 5);
    assert_eq!(policy.restart_delay, Duration::from_millis(500));
    assert_eq!(policy.crash_window, Duration::from_secs(30));
}

#[test]
fn tilde_paths_are_expanded() {
    let Some(home) = dirs::home_dir() else {
        return;
    };
    let config =
        LauncherConfig::from_toml_str("projects_root = \"~/GameProjects\"").expect("config");

    assert_eq!(config.projects_root, home.join("GameProjects"));
    assert_eq!(
        LauncherConfig::default().tool_dir,
        Some(home.join(".aftman").join("bin"))
    );
}

#[test]
fn empty_tool_dir_disables_the_lookup() {
    let config = LauncherConfig::from_toml_str("tool_dir = \"\"").expect("config");

    assert!(config.tool_dir.is_none());
    assert_eq!(
        config.resolve_program(DaemonKind::RuntimeSync),
        std::path::PathBuf::from("rbxsync")
    );
}

#[test]
fn tool_dir_wins_over_path_for_bare_names() {
    let tools = tempfile::tempdir().expect("tempdir");
    let installed = tools
        .path()
        .join(format!("rbxsync{}", std::env::consts::EXE_SUFFIX));
    std::fs::write(&installed, "").expect("write");
    let mut config = LauncherConfig::default();
    config.tool_dir = Some(tools.path().to_path_buf());

    assert_eq!(config.resolve_program(DaemonKind::RuntimeSync), installed);
    assert_eq!(
        config.resolve_program(DaemonKind::FileSync),
        std::path::PathBuf::from("rojo")
    );
}

#[test]
fn zero_log_capacity_is_rejected() {
    let result = LauncherConfig::from_toml_str("[supervision]\nlog_capacity = 0\n");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("log_capacity")));
}

#[test]
fn empty_program_is_rejected() {
    let result = LauncherConfig::from_toml_str("[file_sync]\nprogram = \"  \"\n");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("file-sync")));
}

#[test]
fn empty_project_marker_is_rejected() {
    let result = LauncherConfig::from_toml_str("project_marker = \"\"\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn invalid_toml_is_a_config_error() {
    let result = LauncherConfig::from_toml_str("[supervision\nmax_restarts = 3");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.starts_with("invalid config")));
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = LauncherConfig::load_from_path(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("failed to read")));
}

#[test]
fn loads_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("launcher.toml");
    std::fs::write(&path, sample_toml()).expect("write");

    let config = LauncherConfig::load_from_path(&path).expect("config");

    assert_eq!(config.supervision.restart_delay_ms, 500);
}
