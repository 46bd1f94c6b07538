//! Real [`ProcessHost`] backed by `tokio::process`.
//!
//! Before a daemon is spawned, leftovers of the same command from an earlier
//! launcher run are killed so they cannot keep holding the daemon's port.
//!
//! Each started daemon gets:
//! - a child process with `kill_on_drop(true)` running in the project directory,
//! - a pump task that reads stdout and stderr line by line, strips ANSI
//!   escapes, detects readiness, and forwards [`DaemonEvent`]s in order,
//! - a kill token, fired either by an escalated stop or by dropping the
//!   returned [`EventChannel`].
//!
//! Stopping sends `SIGTERM` on unix and waits [`STOP_GRACE`] before forcing
//! a kill; elsewhere the process is killed directly.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::output::{detect_ready, strip_ansi};
use super::{DaemonEvent, EventChannel, HostFuture, OutputStream, ProcessHost, StopOutcome};
use crate::config::LauncherConfig;
use crate::models::daemon::DaemonKind;
use crate::util::expand_tilde;
use crate::{AppError, Result};

/// How long a daemon may take to exit after `SIGTERM` before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Per-channel event buffer.
const EVENT_BUFFER: usize = 256;

/// Bookkeeping for one live daemon process.
struct RunningDaemon {
    pid: Option<u32>,
    kill: CancellationToken,
    task: JoinHandle<()>,
}

/// Spawns daemons as OS child processes.
pub struct TokioProcessHost {
    config: Arc<LauncherConfig>,
    running: Mutex<HashMap<DaemonKind, RunningDaemon>>,
}

impl TokioProcessHost {
    /// Create a host that launches daemons as described by `config`.
    #[must_use]
    pub fn new(config: Arc<LauncherConfig>) -> Self {
        Self {
            config,
            running: Mutex::new(HashMap::new()),
        }
    }

    fn lock_running(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<DaemonKind, RunningDaemon>>> {
        self.running
            .lock()
            .map_err(|_| AppError::Host("process table mutex poisoned".into()))
    }

    async fn spawn_daemon(&self, kind: DaemonKind, project_path: &Path) -> Result<EventChannel> {
        {
            let running = self.lock_running()?;
            if running.get(&kind).is_some_and(|d| !d.task.is_finished()) {
                return Err(AppError::AlreadyRunning(format!("{kind} process is still alive")));
            }
        }

        let project_path = expand_tilde(project_path);
        if !project_path.is_dir() {
            return Err(AppError::Host(format!(
                "project directory {} does not exist",
                project_path.display()
            )));
        }

        let program = self.config.resolve_program(kind);
        if self.config.supervision.sweep_orphans {
            self.sweep_orphans(kind, &program).await;
        }

        let mut cmd = Command::new(&program);
        cmd.args(self.config.args_for(kind))
            .current_dir(&project_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| spawn_error(&program.display().to_string(), &err))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Host(format!("failed to capture {kind} stdout")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Host(format!("failed to capture {kind} stderr")))?;

        let pid = child.id();
        info!(%kind, pid = pid.unwrap_or(0), project = %project_path.display(), "daemon spawned");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let kill = CancellationToken::new();
        let task = tokio::spawn(
            pump_process(kind, child, stdout, stderr, tx, kill.clone())
                .instrument(info_span!("daemon_process", %kind)),
        );

        self.lock_running()?.insert(
            kind,
            RunningDaemon {
                pid,
                kill: kill.clone(),
                task,
            },
        );

        Ok(EventChannel::with_guard(rx, kill.drop_guard()))
    }

    /// Kill processes running the same command line as `kind` would, then
    /// give the OS a moment to release their port.
    async fn sweep_orphans(&self, kind: DaemonKind, program: &Path) {
        let Some(name) = program.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return;
        };
        let killed = orphan_sweep_command(&name, self.config.args_for(kind))
            .status()
            .await
            .is_ok_and(|status| status.success());
        if killed {
            info!(%kind, program = %name, "killed orphaned daemon from a previous run");
            tokio::time::sleep(self.config.supervision.orphan_release()).await;
        }
    }

    async fn terminate(&self, kind: DaemonKind) -> Result<StopOutcome> {
        let entry = self.lock_running()?.remove(&kind);
        let Some(mut daemon) = entry else {
            debug!(%kind, "stop requested but no process is tracked");
            return Ok(StopOutcome::NotRunning);
        };
        if daemon.task.is_finished() {
            return Ok(StopOutcome::NotRunning);
        }

        if !request_exit(daemon.pid) {
            daemon.kill.cancel();
        }

        if tokio::time::timeout(STOP_GRACE, &mut daemon.task).await.is_err() {
            warn!(%kind, "daemon did not exit within grace period, forcing kill");
            daemon.kill.cancel();
            if let Err(err) = daemon.task.await {
                return Err(AppError::Host(format!("{kind} pump task failed: {err}")));
            }
        }

        info!(%kind, "daemon stopped");
        Ok(StopOutcome::Stopped)
    }

    async fn run_extract(&self, project_path: &Path) -> Result<String> {
        let project_path = expand_tilde(project_path);
        let program = self.config.resolve_program(DaemonKind::RuntimeSync);
        let output = Command::new(&program)
            .args(&self.config.runtime_sync.extract_args)
            .current_dir(&project_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| spawn_error(&program.display().to_string(), &err))?;

        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if output.status.success() {
            Ok(text)
        } else {
            Err(AppError::Extract(format!("extraction failed: {}", text.trim())))
        }
    }

    fn launch_editor(&self, tool_id: &str, path: &Path) -> Result<()> {
        let Some(command) = self.config.editors.get(tool_id) else {
            debug!(tool_id, "no editor command configured, skipping");
            return Ok(());
        };

        Command::new(command)
            .arg(expand_tilde(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| AppError::Host(format!("failed to open {command}: {err}")))?;

        info!(tool_id, command = %command, "editor launched");
        Ok(())
    }
}

impl ProcessHost for TokioProcessHost {
    fn start_daemon<'a>(
        &'a self,
        kind: DaemonKind,
        project_path: &'a Path,
    ) -> HostFuture<'a, EventChannel> {
        Box::pin(self.spawn_daemon(kind, project_path))
    }

    fn stop_daemon(&self, kind: DaemonKind) -> HostFuture<'_, StopOutcome> {
        Box::pin(self.terminate(kind))
    }

    fn open_editor<'a>(&'a self, tool_id: &'a str, path: &'a Path) -> HostFuture<'a, ()> {
        Box::pin(async move { self.launch_editor(tool_id, path) })
    }

    fn extract_state<'a>(&'a self, project_path: &'a Path) -> HostFuture<'a, String> {
        Box::pin(self.run_extract(project_path))
    }
}

/// Map a spawn failure, distinguishing a missing executable.
fn spawn_error(program: &str, err: &std::io::Error) -> AppError {
    if err.kind() == ErrorKind::NotFound {
        AppError::BinaryMissing(format!("{program} not found"))
    } else {
        AppError::Host(format!("failed to start {program}: {err}"))
    }
}

/// `pkill` invocation matching `<name> <args...>` anywhere in a command line.
#[cfg(unix)]
fn orphan_sweep_command(name: &str, args: &[String]) -> Command {
    let mut pattern = escape_ere(name);
    for arg in args {
        pattern.push(' ');
        pattern.push_str(&escape_ere(arg));
    }
    let mut cmd = Command::new("pkill");
    cmd.arg("-f")
        .arg(pattern)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

/// `taskkill` invocation for every process of the daemon's image.
#[cfg(not(unix))]
fn orphan_sweep_command(name: &str, _args: &[String]) -> Command {
    let image = Path::new(name).with_extension("exe");
    let mut cmd = Command::new("taskkill");
    cmd.args(["/F", "/IM"])
        .arg(image)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

/// Escape POSIX extended-regex metacharacters so `pkill` matches literally.
#[cfg(unix)]
fn escape_ere(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '.' | '[' | ']' | '(' | ')' | '*' | '+' | '?' | '{' | '}' | '|' | '^' | '$' | '\\'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Ask the process to exit gracefully. Returns `false` when the caller
/// should fall back to a hard kill.
#[cfg(unix)]
fn request_exit(pid: Option<u32>) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        // Already gone; the pump task finishes on its own.
        Ok(()) | Err(Errno::ESRCH) => true,
        Err(err) => {
            warn!(pid = raw, %err, "failed to send SIGTERM");
            false
        }
    }
}

#[cfg(not(unix))]
fn request_exit(_pid: Option<u32>) -> bool {
    false
}

/// Read both pipes until they close, then report the exit.
async fn pump_process<O, E>(
    kind: DaemonKind,
    mut child: Child,
    stdout: O,
    stderr: E,
    tx: mpsc::Sender<DaemonEvent>,
    kill: CancellationToken,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut out_open = true;
    let mut err_open = true;
    let mut ready_sent = false;

    while out_open || err_open {
        let (raw, stream) = tokio::select! {
            () = kill.cancelled() => {
                if let Err(err) = child.start_kill() {
                    warn!(%kind, %err, "failed to kill daemon");
                }
                // Orphaned grandchildren may keep the pipes open.
                break;
            }
            line = out_lines.next_line(), if out_open => match line {
                Ok(Some(raw)) => (raw, OutputStream::Stdout),
                Ok(None) | Err(_) => {
                    out_open = false;
                    continue;
                }
            },
            line = err_lines.next_line(), if err_open => match line {
                Ok(Some(raw)) => (raw, OutputStream::Stderr),
                Ok(None) | Err(_) => {
                    err_open = false;
                    continue;
                }
            },
        };

        let line = strip_ansi(&raw);
        if !ready_sent {
            if let Some(port) = detect_ready(kind, &line) {
                ready_sent = true;
                let _ = tx.send(DaemonEvent::Started { port }).await;
            }
        }
        let _ = tx.send(DaemonEvent::Output { line, stream }).await;
    }

    let terminal = match child.wait().await {
        Ok(status) => DaemonEvent::Stopped {
            code: status.code(),
        },
        Err(err) => DaemonEvent::Error {
            message: format!("failed to wait for {kind}: {err}"),
        },
    };
    debug!(%kind, ?terminal, "daemon exited");
    let _ = tx.send(terminal).await;
}
