//! Daemon identity, lifecycle status, and the status projection exposed to UIs.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// The external daemons a development session can run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DaemonKind {
    /// Mirrors project files into the editor; required for every session.
    FileSync,
    /// Mirrors live editor state back to disk; optional.
    RuntimeSync,
}

impl DaemonKind {
    /// Every kind, required first.
    pub const ALL: [Self; 2] = [Self::FileSync, Self::RuntimeSync];

    /// Prefix used for this daemon's lines in the session log.
    #[must_use]
    pub fn log_prefix(self) -> &'static str {
        match self {
            Self::FileSync => "file-sync",
            Self::RuntimeSync => "runtime-sync",
        }
    }

    /// Whether a session cannot work without this daemon.
    ///
    /// Start failures of optional daemons caused by a missing binary map to
    /// [`DaemonStatus::Unavailable`] instead of [`DaemonStatus::Error`].
    #[must_use]
    pub fn is_required(self) -> bool {
        matches!(self, Self::FileSync)
    }
}

impl Display for DaemonKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.log_prefix())
    }
}

/// Lifecycle status of one supervised daemon.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DaemonStatus {
    /// Not running; start is allowed.
    #[default]
    Stopped,
    /// Start issued, waiting for the daemon to report readiness.
    Starting,
    /// Daemon reported readiness.
    Running,
    /// Transient failure; start again to retry.
    Error,
    /// Optional daemon whose binary is missing.
    Unavailable,
}

impl DaemonStatus {
    /// Whether a live instance exists (`Starting` or `Running`).
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// Point-in-time view of one supervisor, suitable for a status badge.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSnapshot {
    /// Which daemon this describes.
    pub kind: DaemonKind,
    /// Current lifecycle status.
    pub status: DaemonStatus,
    /// Port reported by the daemon when it became ready.
    pub port: Option<u16>,
    /// Most recent start, runtime, or stop failure message.
    pub error: Option<String>,
    /// Exit code of the last instance, when it exited with one.
    pub exit_code: Option<i32>,
    /// Automatic restarts consumed in the current crash window.
    pub restart_count: u32,
}

impl DaemonSnapshot {
    /// Snapshot of a daemon that has never been started.
    #[must_use]
    pub fn idle(kind: DaemonKind) -> Self {
        Self::with_status(kind, DaemonStatus::Stopped)
    }

    /// Snapshot of an optional daemon that was never configured.
    #[must_use]
    pub fn unavailable(kind: DaemonKind) -> Self {
        Self::with_status(kind, DaemonStatus::Unavailable)
    }

    fn with_status(kind: DaemonKind, status: DaemonStatus) -> Self {
        Self {
            kind,
            status,
            port: None,
            error: None,
            exit_code: None,
            restart_count: 0,
        }
    }
}

/// Aggregate status of a development session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Required file-sync daemon.
    pub file_sync: DaemonSnapshot,
    /// Optional runtime-sync daemon (`Unavailable` when not installed).
    pub runtime_sync: DaemonSnapshot,
    /// Whether anything is starting or running; disables the start control.
    pub is_active: bool,
}

impl SessionSnapshot {
    /// Build the projection from the two daemon snapshots.
    #[must_use]
    pub fn new(file_sync: DaemonSnapshot, runtime_sync: DaemonSnapshot) -> Self {
        let is_active = file_sync.status.is_active() || runtime_sync.status.is_active();
        Self {
            file_sync,
            runtime_sync,
            is_active,
        }
    }
}
