//! Explicit state machine for one supervised daemon.
//!
//! [`SupervisedProcess`] holds every piece of cross-event memory (status,
//! epoch, crash counters, operator-stop flag, pending restart) as plain
//! fields. Transitions are synchronous methods that take the current time
//! and return a [`Reaction`] telling the async driver
//! ([`DaemonSupervisor`](super::daemon::DaemonSupervisor)) which side
//! effects to perform. Nothing here awaits, spawns, or reads a clock.
//!
//! Every start attempt gets a fresh epoch. Events, start results, and timer
//! firings carry the epoch they belong to and are discarded when it is no
//! longer current.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::SupervisionConfig;
use crate::host::{DaemonEvent, OutputStream, StopOutcome};
use crate::models::daemon::{DaemonKind, DaemonSnapshot, DaemonStatus};
use crate::{AppError, Result};

/// Bounded auto-restart parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Automatic restarts allowed within one crash window.
    pub max_restarts: u32,
    /// Delay between an unexpected exit and the relaunch.
    pub restart_delay: Duration,
    /// Rolling crash window; also the continuous-uptime period after which
    /// the counter is cleared.
    pub crash_window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            restart_delay: Duration::from_secs(2),
            crash_window: Duration::from_secs(60),
        }
    }
}

impl From<&SupervisionConfig> for RestartPolicy {
    fn from(config: &SupervisionConfig) -> Self {
        Self {
            max_restarts: config.max_restarts,
            restart_delay: config.restart_delay(),
            crash_window: config.crash_window(),
        }
    }
}

/// Opaque identifier of the live (or about-to-be-relaunched) instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u64);

/// A start attempt handed to the driver: issue the host start call for
/// `project_path` and tag everything that comes back with `epoch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Epoch of this attempt.
    pub epoch: u64,
    /// Project directory the daemon runs in.
    pub project_path: PathBuf,
}

/// What the driver must do after feeding an event into the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// The event belonged to a superseded attempt; do nothing.
    Stale,
    /// Append the output line to the session log.
    Output {
        /// Line text.
        line: String,
        /// Originating pipe.
        stream: OutputStream,
    },
    /// The daemon became ready; schedule the stability reset for `epoch`.
    Started {
        /// Epoch the stability reset is gated on.
        epoch: u64,
        /// Reported port.
        port: Option<u16>,
    },
    /// Readiness reported while not starting (e.g. after an operator
    /// stop); nothing to do.
    Ignored,
    /// The exit was operator-requested; the supervisor is stopped.
    OperatorStopped,
    /// Unexpected exit within budget: log the attempt and schedule a
    /// relaunch after `delay`, gated on `ticket`.
    Restart {
        /// 1-based restart attempt within the crash window.
        attempt: u32,
        /// Configured maximum.
        max: u32,
        /// Exit code of the crashed instance.
        code: Option<i32>,
        /// Delay before relaunching.
        delay: Duration,
        /// Ticket the relaunch must present.
        ticket: u64,
    },
    /// Unexpected exit beyond budget: log the call to action; stay stopped.
    GaveUp {
        /// Crashes counted in the current window.
        crashes: u32,
        /// Exit code of the crashed instance.
        code: Option<i32>,
    },
    /// The host reported a runtime failure.
    Failed {
        /// Failure description.
        message: String,
    },
}

/// Live state of one daemon under supervision.
#[derive(Debug, Clone)]
pub struct SupervisedProcess {
    kind: DaemonKind,
    policy: RestartPolicy,
    status: DaemonStatus,
    epoch: u64,
    project_path: Option<PathBuf>,
    port: Option<u16>,
    error: Option<String>,
    exit_code: Option<i32>,
    restart_count: u32,
    last_crash: Option<Instant>,
    operator_stop: bool,
    pending_restart: Option<u64>,
}

impl SupervisedProcess {
    /// A stopped daemon that has never been started.
    #[must_use]
    pub fn new(kind: DaemonKind, policy: RestartPolicy) -> Self {
        Self {
            kind,
            policy,
            status: DaemonStatus::Stopped,
            epoch: 0,
            project_path: None,
            port: None,
            error: None,
            exit_code: None,
            restart_count: 0,
            last_crash: None,
            operator_stop: false,
            pending_restart: None,
        }
    }

    /// Daemon identity.
    #[must_use]
    pub fn kind(&self) -> DaemonKind {
        self.kind
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> DaemonStatus {
        self.status
    }

    /// Current attempt epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Handle of the current instance; present iff the status is
    /// `Starting` or `Running`.
    #[must_use]
    pub fn instance(&self) -> Option<InstanceId> {
        self.status.is_active().then_some(InstanceId(self.epoch))
    }

    /// Automatic restarts consumed in the current crash window.
    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Whether the next exit is expected because the operator asked for it.
    #[must_use]
    pub fn operator_stop(&self) -> bool {
        self.operator_stop
    }

    /// Ticket of the scheduled relaunch, if any.
    #[must_use]
    pub fn pending_restart(&self) -> Option<u64> {
        self.pending_restart
    }

    /// Last recorded failure message.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Project directory of the current or last attempt.
    #[must_use]
    pub fn project_path(&self) -> Option<&PathBuf> {
        self.project_path.as_ref()
    }

    /// Operator-initiated start. Clears the error, the operator-stop flag
    /// and the crash counters, and opens a new epoch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyRunning` if an instance is starting or
    /// running; the state is left untouched.
    pub fn start(&mut self, project_path: PathBuf) -> Result<Attempt> {
        if self.status.is_active() {
            return Err(AppError::AlreadyRunning(format!(
                "{} is {:?}",
                self.kind, self.status
            )));
        }
        self.restart_count = 0;
        self.last_crash = None;
        Ok(self.open_attempt(project_path))
    }

    /// Relaunch scheduled by a crash. Returns `None` if the ticket was
    /// invalidated (stop, project switch, or a newer start) before firing.
    pub fn relaunch(&mut self, ticket: u64) -> Option<Attempt> {
        if self.pending_restart != Some(ticket)
            || self.status != DaemonStatus::Starting
            || self.operator_stop
        {
            return None;
        }
        let project_path = self.project_path.clone()?;
        Some(self.open_attempt(project_path))
    }

    fn open_attempt(&mut self, project_path: PathBuf) -> Attempt {
        self.epoch += 1;
        self.status = DaemonStatus::Starting;
        self.error = None;
        self.port = None;
        self.operator_stop = false;
        self.pending_restart = None;
        self.project_path = Some(project_path.clone());
        Attempt {
            epoch: self.epoch,
            project_path,
        }
    }

    /// Whether a channel returned by the host for `epoch` should be
    /// consumed. `false` means it is stale and must be dropped.
    #[must_use]
    pub fn accepts_channel(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.status == DaemonStatus::Starting && !self.operator_stop
    }

    /// The host rejected the start call for `epoch`.
    ///
    /// Optional daemons whose binary is missing become `Unavailable`;
    /// everything else becomes `Error`. No restart slot is consumed.
    /// Returns `false` for a stale epoch.
    pub fn start_failed(&mut self, epoch: u64, err: &AppError) -> bool {
        if epoch != self.epoch || self.status != DaemonStatus::Starting {
            return false;
        }
        self.status = if !self.kind.is_required() && err.is_missing_binary() {
            DaemonStatus::Unavailable
        } else {
            DaemonStatus::Error
        };
        self.error = Some(err.to_string());
        true
    }

    /// Feed one channel event belonging to `epoch`.
    pub fn on_event(&mut self, epoch: u64, event: DaemonEvent, now: Instant) -> Reaction {
        if epoch != self.epoch {
            return Reaction::Stale;
        }
        match event {
            DaemonEvent::Output { line, stream } => Reaction::Output { line, stream },
            DaemonEvent::Started { port } => {
                if self.status != DaemonStatus::Starting {
                    return Reaction::Ignored;
                }
                self.status = DaemonStatus::Running;
                self.port = port;
                Reaction::Started { epoch, port }
            }
            DaemonEvent::Stopped { code } => self.on_exit(code, now),
            DaemonEvent::Error { message } => {
                if std::mem::take(&mut self.operator_stop) {
                    self.status = DaemonStatus::Stopped;
                    return Reaction::OperatorStopped;
                }
                self.status = DaemonStatus::Error;
                self.port = None;
                self.error = Some(message.clone());
                Reaction::Failed { message }
            }
        }
    }

    fn on_exit(&mut self, code: Option<i32>, now: Instant) -> Reaction {
        self.exit_code = code;
        self.port = None;

        if std::mem::take(&mut self.operator_stop) {
            self.status = DaemonStatus::Stopped;
            return Reaction::OperatorStopped;
        }

        if self
            .last_crash
            .is_some_and(|last| now.duration_since(last) >= self.policy.crash_window)
        {
            self.restart_count = 0;
        }
        self.restart_count += 1;
        self.last_crash = Some(now);

        if self.restart_count <= self.policy.max_restarts {
            self.status = DaemonStatus::Starting;
            self.pending_restart = Some(self.epoch);
            Reaction::Restart {
                attempt: self.restart_count,
                max: self.policy.max_restarts,
                code,
                delay: self.policy.restart_delay,
                ticket: self.epoch,
            }
        } else {
            self.status = DaemonStatus::Stopped;
            Reaction::GaveUp {
                crashes: self.restart_count,
                code,
            }
        }
    }

    /// The stability window elapsed for `epoch`. Clears the crash counter
    /// only if that same attempt is still running; returns whether it did.
    pub fn stability_elapsed(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch || self.status != DaemonStatus::Running {
            return false;
        }
        self.restart_count = 0;
        self.last_crash = None;
        true
    }

    /// Operator stop: set the flag, invalidate any pending relaunch, and
    /// transition to `Stopped` unconditionally. Returns whether the host
    /// may still hold an instance (status was `Starting` or `Running`).
    pub fn stop(&mut self) -> bool {
        let was_active = self.status.is_active();
        self.operator_stop = true;
        self.pending_restart = None;
        self.status = DaemonStatus::Stopped;
        self.port = None;
        self.error = None;
        was_active
    }

    /// Record the outcome of the host stop call. "Not running" is swallowed;
    /// other failures are kept as a non-fatal message. The status stays
    /// `Stopped` either way.
    pub fn stop_settled(&mut self, result: &Result<StopOutcome>) {
        if self.status != DaemonStatus::Stopped {
            // A newer start already superseded this stop.
            return;
        }
        if let Err(err) = result {
            self.error = Some(format!("stop failed: {err}"));
        }
    }

    /// Project the state for status displays.
    #[must_use]
    pub fn snapshot(&self) -> DaemonSnapshot {
        DaemonSnapshot {
            kind: self.kind,
            status: self.status,
            port: self.port,
            error: self.error.clone(),
            exit_code: self.exit_code,
            restart_count: self.restart_count,
        }
    }
}
