//! Launcher configuration parsing and validation.
//!
//! Every field carries a serde default so an empty TOML document yields a
//! usable configuration. Paths beginning with `~` are expanded during
//! [`LauncherConfig::from_toml_str`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::daemon::DaemonKind;
use crate::util::{expand_tilde, resolve_program};
use crate::{AppError, Result};

/// Crash-restart policy knobs for every supervised daemon.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SupervisionConfig {
    /// Automatic restarts allowed inside one crash window.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Delay between an unexpected exit and the relaunch.
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    /// Rolling window after which the crash counter starts over.
    #[serde(default = "default_crash_window_seconds")]
    pub crash_window_seconds: u64,
    /// Maximum number of lines kept in the shared session log.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Kill leftover daemons of a previous launcher run before starting.
    #[serde(default = "default_true")]
    pub sweep_orphans: bool,
    /// Pause after a sweep killed something, so its port is released.
    #[serde(default = "default_orphan_release_ms")]
    pub orphan_release_ms: u64,
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_delay_ms() -> u64 {
    2000
}

fn default_crash_window_seconds() -> u64 {
    60
}

fn default_log_capacity() -> usize {
    500
}

fn default_orphan_release_ms() -> u64 {
    500
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            restart_delay_ms: default_restart_delay_ms(),
            crash_window_seconds: default_crash_window_seconds(),
            log_capacity: default_log_capacity(),
            sweep_orphans: true,
            orphan_release_ms: default_orphan_release_ms(),
        }
    }
}

impl SupervisionConfig {
    /// Restart delay as a [`Duration`].
    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Crash window as a [`Duration`].
    #[must_use]
    pub fn crash_window(&self) -> Duration {
        Duration::from_secs(self.crash_window_seconds)
    }

    /// Orphan port-release pause as a [`Duration`].
    #[must_use]
    pub fn orphan_release(&self) -> Duration {
        Duration::from_millis(self.orphan_release_ms)
    }
}

/// How to launch the file-sync daemon.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FileSyncConfig {
    /// Executable name or path.
    #[serde(default = "default_file_sync_program")]
    pub program: String,
    /// Arguments passed to the executable.
    #[serde(default = "default_serve_args")]
    pub args: Vec<String>,
}

fn default_file_sync_program() -> String {
    "rojo".into()
}

fn default_serve_args() -> Vec<String> {
    vec!["serve".into()]
}

impl Default for FileSyncConfig {
    fn default() -> Self {
        Self {
            program: default_file_sync_program(),
            args: default_serve_args(),
        }
    }
}

/// How to launch the optional runtime-sync daemon and its extraction.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeSyncConfig {
    /// Executable name or path.
    #[serde(default = "default_runtime_sync_program")]
    pub program: String,
    /// Arguments for the long-running serve process.
    #[serde(default = "default_serve_args")]
    pub args: Vec<String>,
    /// Arguments for the one-shot state extraction.
    #[serde(default = "default_extract_args")]
    pub extract_args: Vec<String>,
    /// Output line fragment that signals an editor client connected.
    #[serde(default = "default_connection_marker")]
    pub connection_marker: String,
}

fn default_runtime_sync_program() -> String {
    "rbxsync".into()
}

fn default_extract_args() -> Vec<String> {
    vec!["extract".into()]
}

fn default_connection_marker() -> String {
    "Studio connected".into()
}

impl Default for RuntimeSyncConfig {
    fn default() -> Self {
        Self {
            program: default_runtime_sync_program(),
            args: default_serve_args(),
            extract_args: default_extract_args(),
            connection_marker: default_connection_marker(),
        }
    }
}

/// On-disk mirror of the session log.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionLogConfig {
    /// Whether to write `latest.log` inside the project.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of rotated `session-*.log` files to keep.
    #[serde(default = "default_retain")]
    pub retain: usize,
}

fn default_true() -> bool {
    true
}

fn default_retain() -> usize {
    10
}

impl Default for SessionLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retain: default_retain(),
        }
    }
}

/// Local endpoint that receives editor-side log batches.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StudioLogConfig {
    /// Whether the endpoint runs alongside a development session.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Loopback port to listen on; `0` picks a free port.
    #[serde(default = "default_studio_log_port")]
    pub port: u16,
}

fn default_studio_log_port() -> u16 {
    19556
}

impl Default for StudioLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_studio_log_port(),
        }
    }
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("~/.studio-launcher/config.json")
}

fn default_projects_root() -> PathBuf {
    PathBuf::from("~/GameProjects")
}

fn default_tool_dir() -> Option<PathBuf> {
    Some(PathBuf::from("~/.aftman/bin"))
}

fn default_project_marker() -> String {
    "default.project.json".into()
}

fn default_editors() -> HashMap<String, String> {
    HashMap::from([
        ("cursor".to_owned(), "cursor".to_owned()),
        ("vscode".to_owned(), "code".to_owned()),
        ("windsurf".to_owned(), "windsurf".to_owned()),
    ])
}

/// Global launcher configuration parsed from `launcher.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LauncherConfig {
    /// Location of the persisted project registry.
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
    /// Parent directory scanned for projects during boot recovery.
    #[serde(default = "default_projects_root")]
    pub projects_root: PathBuf,
    /// File whose presence marks a directory as a project.
    #[serde(default = "default_project_marker")]
    pub project_marker: String,
    /// Directory searched before `PATH` for bare program names. An empty
    /// string disables the lookup.
    #[serde(default = "default_tool_dir")]
    pub tool_dir: Option<PathBuf>,
    /// Crash-restart policy.
    #[serde(default)]
    pub supervision: SupervisionConfig,
    /// File-sync daemon invocation.
    #[serde(default)]
    pub file_sync: FileSyncConfig,
    /// Runtime-sync daemon invocation.
    #[serde(default)]
    pub runtime_sync: RuntimeSyncConfig,
    /// AI-tool identifier → editor command.
    #[serde(default = "default_editors")]
    pub editors: HashMap<String, String>,
    /// On-disk session log settings.
    #[serde(default)]
    pub session_logs: SessionLogConfig,
    /// Editor log capture endpoint.
    #[serde(default)]
    pub studio_logs: StudioLogConfig,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        let mut config = Self {
            registry_path: default_registry_path(),
            projects_root: default_projects_root(),
            project_marker: default_project_marker(),
            tool_dir: default_tool_dir(),
            supervision: SupervisionConfig::default(),
            file_sync: FileSyncConfig::default(),
            runtime_sync: RuntimeSyncConfig::default(),
            editors: default_editors(),
            session_logs: SessionLogConfig::default(),
            studio_logs: StudioLogConfig::default(),
        };
        config.expand_paths();
        config
    }
}

impl LauncherConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and expand `~` in paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Executable configured for a daemon kind.
    #[must_use]
    pub fn program_for(&self, kind: DaemonKind) -> &str {
        match kind {
            DaemonKind::FileSync => &self.file_sync.program,
            DaemonKind::RuntimeSync => &self.runtime_sync.program,
        }
    }

    /// Executable actually launched for a daemon kind, after the tool
    /// directory lookup.
    #[must_use]
    pub fn resolve_program(&self, kind: DaemonKind) -> PathBuf {
        resolve_program(self.program_for(kind), self.tool_dir.as_deref())
    }

    /// Serve arguments configured for a daemon kind.
    #[must_use]
    pub fn args_for(&self, kind: DaemonKind) -> &[String] {
        match kind {
            DaemonKind::FileSync => &self.file_sync.args,
            DaemonKind::RuntimeSync => &self.runtime_sync.args,
        }
    }

    fn expand_paths(&mut self) {
        self.registry_path = expand_tilde(&self.registry_path);
        self.projects_root = expand_tilde(&self.projects_root);
        self.tool_dir = self
            .tool_dir
            .take()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| expand_tilde(&dir));
    }

    fn validate(&self) -> Result<()> {
        if self.supervision.log_capacity == 0 {
            return Err(AppError::Config(
                "supervision.log_capacity must be greater than zero".into(),
            ));
        }

        for kind in DaemonKind::ALL {
            if self.program_for(kind).trim().is_empty() {
                return Err(AppError::Config(format!(
                    "{} program must not be empty",
                    kind.log_prefix()
                )));
            }
        }

        if self.project_marker.trim().is_empty() {
            return Err(AppError::Config("project_marker must not be empty".into()));
        }

        Ok(())
    }
}
