//! Process host abstraction.
//!
//! The [`ProcessHost`] trait is the privileged side of the launcher: it
//! spawns OS processes and forwards their output and exit as
//! [`DaemonEvent`]s. The supervision core never touches processes directly;
//! it only issues commands through this trait and reacts to events arriving
//! on an [`EventChannel`].

pub mod output;
pub mod process;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use crate::models::daemon::DaemonKind;
use crate::Result;

/// Boxed future returned by [`ProcessHost`] methods.
pub type HostFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Which pipe an output line was read from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Events streamed from one daemon process to its supervisor.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "event", content = "data")]
pub enum DaemonEvent {
    /// One line of process output, ANSI escapes already removed.
    Output {
        /// Line text without the trailing newline.
        line: String,
        /// Pipe the line came from.
        stream: OutputStream,
    },
    /// The daemon reported readiness.
    Started {
        /// Listening port, when the daemon reports one.
        port: Option<u16>,
    },
    /// The process exited. Terminal.
    Stopped {
        /// Exit code; `None` when killed by a signal.
        code: Option<i32>,
    },
    /// The host lost track of the process. Terminal.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

impl DaemonEvent {
    /// Whether no further events can follow this one.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped { .. } | Self::Error { .. })
    }
}

/// Single-use, ordered stream of events from one daemon instance.
///
/// Exactly one writer (the host) and one reader (the supervisor attempt
/// that started the process). Once a terminal event has been read the
/// channel yields nothing more. Dropping the channel fires its guard, which
/// the host uses to terminate the process the channel belongs to.
#[derive(Debug)]
pub struct EventChannel {
    rx: mpsc::Receiver<DaemonEvent>,
    finished: bool,
    _guard: Option<DropGuard>,
}

impl EventChannel {
    /// Wrap a receiver with no drop behaviour.
    #[must_use]
    pub fn new(rx: mpsc::Receiver<DaemonEvent>) -> Self {
        Self {
            rx,
            finished: false,
            _guard: None,
        }
    }

    /// Wrap a receiver whose process should be cancelled when the channel
    /// is dropped.
    #[must_use]
    pub fn with_guard(rx: mpsc::Receiver<DaemonEvent>, guard: DropGuard) -> Self {
        Self {
            rx,
            finished: false,
            _guard: Some(guard),
        }
    }

    /// Receive the next event.
    ///
    /// Returns `None` after the terminal event has been delivered. If the
    /// writer disappears without a terminal event, a synthetic
    /// [`DaemonEvent::Error`] is produced so the reader always observes a
    /// terminal event.
    pub async fn recv(&mut self) -> Option<DaemonEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await.unwrap_or_else(|| DaemonEvent::Error {
            message: "event stream closed unexpectedly".into(),
        });
        if event.is_terminal() {
            self.finished = true;
        }
        Some(event)
    }
}

/// Result of asking the host to stop a daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A live process was terminated.
    Stopped,
    /// No process of that kind was running.
    NotRunning,
}

/// Privileged process operations consumed by the supervision core.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call
/// concurrently for different daemon kinds.
pub trait ProcessHost: Send + Sync {
    /// Spawn the daemon for `project_path` and return its event stream.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::BinaryMissing`](crate::AppError::BinaryMissing) when
    /// the executable does not exist, or
    /// [`AppError::Host`](crate::AppError::Host) for any other spawn failure.
    fn start_daemon<'a>(
        &'a self,
        kind: DaemonKind,
        project_path: &'a Path,
    ) -> HostFuture<'a, EventChannel>;

    /// Stop the daemon of `kind`.
    ///
    /// Stopping a daemon that is not running resolves to
    /// [`StopOutcome::NotRunning`], not an error.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Host`](crate::AppError::Host) if the process could
    /// not be signalled.
    fn stop_daemon(&self, kind: DaemonKind) -> HostFuture<'_, StopOutcome>;

    /// Open the editor associated with `tool_id` on `path`. Best-effort.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Host`](crate::AppError::Host) if the editor could
    /// not be launched.
    fn open_editor<'a>(&'a self, tool_id: &'a str, path: &'a Path) -> HostFuture<'a, ()>;

    /// Run the one-shot state extraction for `project_path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Extract`](crate::AppError::Extract) with the
    /// command output when extraction fails.
    fn extract_state<'a>(&'a self, project_path: &'a Path) -> HostFuture<'a, String>;
}
