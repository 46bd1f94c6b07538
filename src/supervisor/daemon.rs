//! Async driver for one supervised daemon.
//!
//! [`DaemonSupervisor`] feeds host results, channel events and timer
//! firings into its [`SupervisedProcess`] and performs the side effects the
//! state machine asks for: appending log lines, publishing snapshots,
//! scheduling the restart and stability timers, and relaunching.
//!
//! The state lock is a plain `std::sync::Mutex` and is never held across an
//! `.await`; every suspension point (host call, timer) re-validates the
//! epoch it resumed for.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::log_buffer::{format_notice, format_output_line, SessionLog};
use super::process::{Attempt, Reaction, RestartPolicy, SupervisedProcess};
use crate::host::{EventChannel, ProcessHost, StopOutcome};
use crate::models::daemon::{DaemonKind, DaemonSnapshot, DaemonStatus};
use crate::Result;

/// Buffer of the raw output feed used for marker watching.
const OUTPUT_FEED_CAPACITY: usize = 256;

struct Runtime {
    process: SupervisedProcess,
    restart_timer: Option<CancellationToken>,
    stability_timer: Option<CancellationToken>,
}

impl Runtime {
    fn cancel_restart(&mut self) {
        if let Some(token) = self.restart_timer.take() {
            token.cancel();
        }
    }

    fn cancel_stability(&mut self) {
        if let Some(token) = self.stability_timer.take() {
            token.cancel();
        }
    }
}

struct Inner {
    kind: DaemonKind,
    host: Arc<dyn ProcessHost>,
    log: SessionLog,
    policy: RestartPolicy,
    state: Mutex<Runtime>,
    status: watch::Sender<DaemonSnapshot>,
    output: broadcast::Sender<String>,
}

/// Supervises one daemon kind through the process host.
///
/// Cloning yields another handle to the same supervisor.
#[derive(Clone)]
pub struct DaemonSupervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DaemonSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonSupervisor")
            .field("kind", &self.inner.kind)
            .field("status", &self.snapshot().status)
            .finish_non_exhaustive()
    }
}

impl DaemonSupervisor {
    /// Create a stopped supervisor for `kind` that writes into `log`.
    #[must_use]
    pub fn new(
        kind: DaemonKind,
        host: Arc<dyn ProcessHost>,
        log: SessionLog,
        policy: RestartPolicy,
    ) -> Self {
        let (status, _) = watch::channel(DaemonSnapshot::idle(kind));
        let (output, _) = broadcast::channel(OUTPUT_FEED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                kind,
                host,
                log,
                policy,
                state: Mutex::new(Runtime {
                    process: SupervisedProcess::new(kind, policy),
                    restart_timer: None,
                    stability_timer: None,
                }),
                status,
                output,
            }),
        }
    }

    /// Daemon kind this supervisor runs.
    #[must_use]
    pub fn kind(&self) -> DaemonKind {
        self.inner.kind
    }

    /// Restart policy in effect.
    #[must_use]
    pub fn policy(&self) -> RestartPolicy {
        self.inner.policy
    }

    fn lock(&self) -> MutexGuard<'_, Runtime> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, rt: &Runtime) {
        self.inner.status.send_replace(rt.process.snapshot());
    }

    fn notice(&self, message: &str) {
        self.inner.log.append(format_notice(self.inner.kind, message));
    }

    /// Operator start for `project_path`.
    ///
    /// Resolves once the host start call has settled. A host failure is not
    /// returned; it is reflected as `Error` or `Unavailable` in the snapshot
    /// and logged.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyRunning` if the daemon is already starting
    /// or running.
    pub async fn start(&self, project_path: PathBuf) -> Result<()> {
        let attempt = {
            let mut rt = self.lock();
            let attempt = rt.process.start(project_path)?;
            rt.cancel_restart();
            rt.cancel_stability();
            self.publish(&rt);
            attempt
        };
        info!(
            kind = %self.inner.kind,
            epoch = attempt.epoch,
            project = %attempt.project_path.display(),
            "starting daemon"
        );
        self.launch(attempt).await;
        Ok(())
    }

    /// Issue the host start call for `attempt` and wire up its channel.
    ///
    /// Boxed because relaunch timers call back into it.
    fn launch(&self, attempt: Attempt) -> BoxFuture<'static, ()> {
        let this = self.clone();
        async move {
            let kind = this.inner.kind;
            let epoch = attempt.epoch;
            let result = this
                .inner
                .host
                .start_daemon(kind, &attempt.project_path)
                .await;

            match result {
                Ok(channel) => {
                    let accepted = this.lock().process.accepts_channel(epoch);
                    if !accepted {
                        debug!(%kind, epoch, "discarding channel of superseded start");
                        drop(channel);
                        return;
                    }
                    let span = info_span!("daemon_events", %kind, epoch);
                    tokio::spawn(this.pump(epoch, channel).instrument(span));
                }
                Err(err) => {
                    let applied = {
                        let mut rt = this.lock();
                        let applied = rt.process.start_failed(epoch, &err);
                        if applied {
                            this.publish(&rt);
                        }
                        applied
                    };
                    if applied {
                        warn!(%kind, epoch, %err, "daemon failed to start");
                        this.notice(&format!("Failed to start: {err}"));
                    } else {
                        debug!(%kind, epoch, %err, "ignoring failure of superseded start");
                    }
                }
            }
        }
        .boxed()
    }

    /// Consume one channel until its terminal event or until its epoch is
    /// superseded. Returning drops the channel.
    async fn pump(self, epoch: u64, mut channel: EventChannel) {
        while let Some(event) = channel.recv().await {
            let mut rt = self.lock();
            let reaction = rt.process.on_event(epoch, event, Instant::now());
            if reaction == Reaction::Stale {
                debug!(kind = %self.inner.kind, epoch, "dropping events of superseded instance");
                return;
            }
            self.react(&mut rt, reaction);
        }
    }

    /// Perform the side effects of one transition. Called with the state
    /// lock held so timer bookkeeping stays consistent.
    fn react(&self, rt: &mut Runtime, reaction: Reaction) {
        let kind = self.inner.kind;
        match reaction {
            Reaction::Stale | Reaction::Ignored => {}
            Reaction::Output { line, stream } => {
                self.inner.log.append(format_output_line(kind, stream, &line));
                let _ = self.inner.output.send(line);
            }
            Reaction::Started { epoch, port } => {
                info!(%kind, epoch, ?port, "daemon ready");
                self.publish(rt);
                self.schedule_stability_reset(rt, epoch);
            }
            Reaction::OperatorStopped => {
                debug!(%kind, "daemon exited after operator stop");
                rt.cancel_stability();
                self.publish(rt);
            }
            Reaction::Restart {
                attempt,
                max,
                code,
                delay,
                ticket,
            } => {
                warn!(%kind, attempt, max, ?code, "daemon crashed, scheduling restart");
                rt.cancel_stability();
                self.notice(&format!(
                    "{}. Restarting in {}... ({attempt}/{max})",
                    describe_exit(code),
                    describe_delay(delay)
                ));
                self.schedule_restart(rt, ticket, delay);
                self.publish(rt);
            }
            Reaction::GaveUp { crashes, code } => {
                warn!(%kind, crashes, ?code, "daemon crash limit reached");
                rt.cancel_stability();
                self.notice(&format!(
                    "{}. Restart limit reached ({crashes} crashes within {}s). Click start to try again.",
                    describe_exit(code),
                    self.inner.policy.crash_window.as_secs()
                ));
                self.publish(rt);
            }
            Reaction::Failed { message } => {
                warn!(%kind, %message, "daemon failed");
                rt.cancel_stability();
                self.notice(&format!("Error: {message}"));
                self.publish(rt);
            }
        }
    }

    fn schedule_restart(&self, rt: &mut Runtime, ticket: u64, delay: Duration) {
        rt.cancel_restart();
        let token = CancellationToken::new();
        rt.restart_timer = Some(token.clone());

        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            let attempt = {
                let mut rt = this.lock();
                let attempt = rt.process.relaunch(ticket);
                if attempt.is_some() {
                    rt.restart_timer = None;
                    this.publish(&rt);
                }
                attempt
            };
            match attempt {
                Some(attempt) => {
                    info!(kind = %this.inner.kind, epoch = attempt.epoch, "relaunching daemon");
                    this.launch(attempt).await;
                }
                None => debug!(kind = %this.inner.kind, ticket, "restart ticket invalidated"),
            }
        });
    }

    fn schedule_stability_reset(&self, rt: &mut Runtime, epoch: u64) {
        rt.cancel_stability();
        let token = CancellationToken::new();
        rt.stability_timer = Some(token.clone());

        let this = self.clone();
        let window = self.inner.policy.crash_window;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = tokio::time::sleep(window) => {}
            }
            let mut rt = this.lock();
            if rt.process.stability_elapsed(epoch) {
                rt.stability_timer = None;
                debug!(kind = %this.inner.kind, epoch, "daemon stable, restart counter cleared");
                this.publish(&rt);
            }
        });
    }

    /// Operator stop. Always ends `Stopped` with no pending restart; a host
    /// failure other than "not running" is kept in the snapshot's `error`.
    pub async fn stop(&self) -> DaemonSnapshot {
        let kind = self.inner.kind;
        {
            let mut rt = self.lock();
            rt.process.stop();
            rt.cancel_restart();
            rt.cancel_stability();
            self.publish(&rt);
        }

        let result = self.inner.host.stop_daemon(kind).await;
        match &result {
            Ok(StopOutcome::Stopped) => info!(%kind, "daemon stopped"),
            Ok(StopOutcome::NotRunning) => debug!(%kind, "stop requested, daemon was not running"),
            Err(err) => warn!(%kind, %err, "stop call failed"),
        }

        let mut rt = self.lock();
        rt.process.stop_settled(&result);
        self.publish(&rt);
        rt.process.snapshot()
    }

    /// Current status projection.
    #[must_use]
    pub fn snapshot(&self) -> DaemonSnapshot {
        self.lock().process.snapshot()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> DaemonStatus {
        self.lock().process.status()
    }

    /// Whether a relaunch is scheduled and not yet fired.
    #[must_use]
    pub fn has_pending_restart(&self) -> bool {
        let rt = self.lock();
        rt.restart_timer.is_some() || rt.process.pending_restart().is_some()
    }

    /// Status feed; the receiver always holds the latest snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<DaemonSnapshot> {
        self.inner.status.subscribe()
    }

    /// Raw output lines (without log prefixes) from now on.
    #[must_use]
    pub fn subscribe_output(&self) -> broadcast::Receiver<String> {
        self.inner.output.subscribe()
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("Crashed (exit code {code})"),
        None => "Crashed (terminated by signal)".to_owned(),
    }
}

fn describe_delay(delay: Duration) -> String {
    if delay.subsec_millis() == 0 {
        format!("{}s", delay.as_secs())
    } else {
        format!("{}ms", delay.as_millis())
    }
}
