//! One-shot capability probe run before any supervision begins.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use crate::config::LauncherConfig;
use crate::models::daemon::DaemonKind;
use crate::util::resolve_program;

/// Installation state of one daemon binary.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolProbe {
    /// Whether `--version` ran successfully.
    pub installed: bool,
    /// Trimmed `--version` output.
    pub version: Option<String>,
}

impl ToolProbe {
    /// Probe result for a binary that could not be run.
    #[must_use]
    pub fn missing() -> Self {
        Self::default()
    }

    /// Probe result for an installed binary.
    #[must_use]
    pub fn found(version: impl Into<String>) -> Self {
        Self {
            installed: true,
            version: Some(version.into()),
        }
    }
}

/// What the host machine can run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySnapshot {
    /// Operating system family (`linux`, `macos`, `windows`).
    pub os: String,
    /// File-sync daemon binary.
    pub file_sync: ToolProbe,
    /// Runtime-sync daemon binary.
    pub runtime_sync: ToolProbe,
}

impl CapabilitySnapshot {
    /// Probe result for `kind`.
    #[must_use]
    pub fn probe(&self, kind: DaemonKind) -> &ToolProbe {
        match kind {
            DaemonKind::FileSync => &self.file_sync,
            DaemonKind::RuntimeSync => &self.runtime_sync,
        }
    }
}

/// Boxed future returned by [`Detector::detect`].
pub type DetectFuture<'a> = Pin<Box<dyn Future<Output = CapabilitySnapshot> + Send + 'a>>;

/// Produces the capability snapshot. Infallible: anything that cannot be
/// probed is reported as not installed.
pub trait Detector: Send + Sync {
    /// Probe the machine.
    fn detect(&self) -> DetectFuture<'_>;
}

/// Runs `<program> --version` for each configured daemon binary.
#[derive(Debug, Clone)]
pub struct SystemDetector {
    file_sync_program: String,
    runtime_sync_program: String,
    tool_dir: Option<PathBuf>,
}

impl SystemDetector {
    /// Detector for the programs named in `config`. Bare program names are
    /// looked up in the configured tool directory before `PATH`, the same
    /// way the process host resolves them.
    #[must_use]
    pub fn new(config: &LauncherConfig) -> Self {
        Self {
            file_sync_program: config.file_sync.program.clone(),
            runtime_sync_program: config.runtime_sync.program.clone(),
            tool_dir: config.tool_dir.clone(),
        }
    }

    /// Replace the directory searched before `PATH`.
    #[must_use]
    pub fn with_tool_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.tool_dir = dir;
        self
    }

    async fn probe(&self, program: &str) -> ToolProbe {
        let resolved = resolve_program(program, self.tool_dir.as_deref());
        if let Some(version) = run_version(&resolved).await {
            return ToolProbe::found(version);
        }
        debug!(program, resolved = %resolved.display(), "tool not installed");
        ToolProbe::missing()
    }
}

impl Detector for SystemDetector {
    fn detect(&self) -> DetectFuture<'_> {
        Box::pin(async move {
            let (file_sync, runtime_sync) = tokio::join!(
                self.probe(&self.file_sync_program),
                self.probe(&self.runtime_sync_program)
            );
            CapabilitySnapshot {
                os: std::env::consts::OS.to_owned(),
                file_sync,
                runtime_sync,
            }
        })
    }
}

async fn run_version(program: &Path) -> Option<String> {
    let output = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_owned())
}
