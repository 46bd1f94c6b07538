//! Session coordinator.
//!
//! Owns the file-sync supervisor, the optional runtime-sync supervisor and
//! the shared session log as one unit. Starting development tears down any
//! previous session first, then starts every configured daemon concurrently.
//! While a session runs, the runtime-sync output is watched for the
//! connection marker; its first appearance triggers a single state
//! extraction whose outcome is written to the log. The editor log endpoint
//! runs for the lifetime of each session.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::daemon::DaemonSupervisor;
use super::log_buffer::{format_notice, SessionLog};
use super::log_file::SessionLogFile;
use super::process::RestartPolicy;
use super::studio_log::StudioLogServer;
use crate::config::LauncherConfig;
use crate::host::ProcessHost;
use crate::models::daemon::{DaemonKind, DaemonSnapshot, SessionSnapshot};
use crate::models::project::ProjectEntry;
use crate::{AppError, Result};

/// Everything the coordinator needs beyond the process host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Crash-restart policy applied to every daemon.
    pub policy: RestartPolicy,
    /// Lines kept in the in-memory session log.
    pub log_capacity: usize,
    /// Rotated on-disk logs to keep; `None` disables the file mirror.
    pub file_log_retain: Option<usize>,
    /// Runtime-sync output line that triggers the state extraction.
    pub connection_marker: String,
    /// Whether a runtime-sync supervisor is configured at all.
    pub runtime_sync: bool,
    /// Port of the editor log endpoint; `None` disables it.
    pub studio_log_port: Option<u16>,
}

impl SessionOptions {
    /// Derive options from the launcher config. `runtime_sync_installed`
    /// comes from the capability probe.
    #[must_use]
    pub fn from_config(config: &LauncherConfig, runtime_sync_installed: bool) -> Self {
        Self {
            policy: RestartPolicy::from(&config.supervision),
            log_capacity: config.supervision.log_capacity,
            file_log_retain: config
                .session_logs
                .enabled
                .then_some(config.session_logs.retain),
            connection_marker: config.runtime_sync.connection_marker.clone(),
            runtime_sync: runtime_sync_installed,
            studio_log_port: config
                .studio_logs
                .enabled
                .then_some(config.studio_logs.port),
        }
    }
}

/// Coordinates the daemons of one development session.
pub struct SessionCoordinator {
    host: Arc<dyn ProcessHost>,
    options: SessionOptions,
    log: SessionLog,
    file_sync: DaemonSupervisor,
    runtime_sync: Option<DaemonSupervisor>,
    active_project: Mutex<Option<ProjectEntry>>,
    extract_fired: Arc<AtomicBool>,
    marker_watch: Mutex<Option<CancellationToken>>,
    studio_log: Mutex<Option<StudioLogServer>>,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("file_sync", &self.file_sync)
            .field("runtime_sync", &self.runtime_sync)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl SessionCoordinator {
    /// Build a coordinator with fresh supervisors sharing one log.
    #[must_use]
    pub fn new(host: Arc<dyn ProcessHost>, options: SessionOptions) -> Self {
        let log = SessionLog::new(options.log_capacity);
        let file_sync = DaemonSupervisor::new(
            DaemonKind::FileSync,
            Arc::clone(&host),
            log.clone(),
            options.policy,
        );
        let runtime_sync = options.runtime_sync.then(|| {
            DaemonSupervisor::new(
                DaemonKind::RuntimeSync,
                Arc::clone(&host),
                log.clone(),
                options.policy,
            )
        });
        Self {
            host,
            options,
            log,
            file_sync,
            runtime_sync,
            active_project: Mutex::new(None),
            extract_fired: Arc::new(AtomicBool::new(false)),
            marker_watch: Mutex::new(None),
            studio_log: Mutex::new(None),
        }
    }

    fn project_slot(&self) -> MutexGuard<'_, Option<ProjectEntry>> {
        self.active_project
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn watch_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.marker_watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn studio_log_slot(&self) -> MutexGuard<'_, Option<StudioLogServer>> {
        self.studio_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the tracked project. Running daemons keep their original
    /// path until they are restarted.
    pub fn set_active_project(&self, project: ProjectEntry) {
        info!(project = %project.name, path = %project.path.display(), "active project set");
        *self.project_slot() = Some(project);
    }

    /// Currently tracked project.
    #[must_use]
    pub fn active_project(&self) -> Option<ProjectEntry> {
        self.project_slot().clone()
    }

    /// Tear down any previous session, then start every configured daemon
    /// concurrently and open the project's editor.
    ///
    /// Daemon start failures are reported through the returned snapshot,
    /// not as errors.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NoActiveProject` if no project has been set.
    pub async fn start_development(&self) -> Result<SessionSnapshot> {
        let project = self.active_project().ok_or(AppError::NoActiveProject)?;
        let session_id = Uuid::new_v4();
        let span = info_span!("session_start", %session_id, project = %project.name);

        async {
            self.stop_all().await;
            self.extract_fired.store(false, Ordering::SeqCst);
            self.attach_file_log(&project.path).await;
            self.start_studio_log().await;
            self.log.append(format!(
                "[session] Starting development for {}",
                project.name
            ));

            if let Some(runtime_sync) = &self.runtime_sync {
                self.spawn_marker_watch(runtime_sync, project.path.clone());
            }

            let path = project.path.clone();
            let file_sync = self.file_sync.start(path.clone());
            let runtime_sync = async {
                match &self.runtime_sync {
                    Some(sup) => sup.start(path.clone()).await,
                    None => Ok(()),
                }
            };
            let (fs_result, rs_result) = tokio::join!(file_sync, runtime_sync);
            for (kind, result) in [
                (DaemonKind::FileSync, fs_result),
                (DaemonKind::RuntimeSync, rs_result),
            ] {
                if let Err(err) = result {
                    warn!(%kind, %err, "daemon start rejected");
                }
            }

            if let Err(err) = self
                .host
                .open_editor(&project.ai_tool, &project.path)
                .await
            {
                warn!(tool = %project.ai_tool, %err, "failed to open editor");
            }

            let snapshot = self.snapshot();
            info!(active = snapshot.is_active, "development session started");
            Ok(snapshot)
        }
        .instrument(span)
        .await
    }

    async fn attach_file_log(&self, project_path: &Path) {
        let Some(retain) = self.options.file_log_retain else {
            return;
        };
        match SessionLogFile::create(project_path, retain).await {
            Ok(file) => {
                debug!(path = %file.path().display(), "mirroring session log to disk");
                self.log.attach_file(Some(file));
            }
            Err(err) => warn!(%err, "session log file unavailable, continuing in memory"),
        }
    }

    async fn start_studio_log(&self) {
        let Some(port) = self.options.studio_log_port else {
            return;
        };
        match StudioLogServer::bind(port, self.log.clone()).await {
            Ok(server) => {
                *self.studio_log_slot() = Some(server);
            }
            Err(err) => warn!(%err, "editor log capture unavailable"),
        }
    }

    fn spawn_marker_watch(&self, runtime_sync: &DaemonSupervisor, project_path: PathBuf) {
        let token = CancellationToken::new();
        if let Some(previous) = self.watch_slot().replace(token.clone()) {
            previous.cancel();
        }

        let lines = runtime_sync.subscribe_output();
        let host = Arc::clone(&self.host);
        let log = self.log.clone();
        let fired = Arc::clone(&self.extract_fired);
        let marker = self.options.connection_marker.clone();

        tokio::spawn(
            watch_for_marker(lines, marker, token, fired, host, log, project_path)
                .instrument(info_span!("marker_watch")),
        );
    }

    /// Stop every supervisor concurrently and wait for all of them.
    /// One supervisor's stop failure never keeps the other running.
    pub async fn stop_all(&self) -> SessionSnapshot {
        let was_active = self.snapshot().is_active;
        let watch = self.watch_slot().take();
        if let Some(token) = watch {
            token.cancel();
        }
        let studio_log = self.studio_log_slot().take();
        if let Some(server) = studio_log {
            server.shutdown().await;
        }

        let file_sync = self.file_sync.stop();
        let runtime_sync = async {
            match &self.runtime_sync {
                Some(sup) => Some(sup.stop().await),
                None => None,
            }
        };
        let (fs, rs) = tokio::join!(file_sync, runtime_sync);
        debug!(file_sync = ?fs.status, runtime_sync = ?rs.map(|s| s.status), "all daemons stopped");

        if was_active {
            self.log.append("[session] Development stopped");
        }
        // Detaching closes the file mirror and writes its footer.
        self.log.attach_file(None);
        self.snapshot()
    }

    /// Tear down the current session and track `project` instead.
    pub async fn switch_project(&self, project: ProjectEntry) -> SessionSnapshot {
        let snapshot = self.stop_all().await;
        self.set_active_project(project);
        snapshot
    }

    /// Empty the shared log.
    pub fn clear_logs(&self) {
        self.log.clear();
    }

    /// Aggregate status projection.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let runtime_sync = self.runtime_sync.as_ref().map_or_else(
            || DaemonSnapshot::unavailable(DaemonKind::RuntimeSync),
            DaemonSupervisor::snapshot,
        );
        SessionSnapshot::new(self.file_sync.snapshot(), runtime_sync)
    }

    /// Shared session log.
    #[must_use]
    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    /// Required file-sync supervisor.
    #[must_use]
    pub fn file_sync(&self) -> &DaemonSupervisor {
        &self.file_sync
    }

    /// Optional runtime-sync supervisor; `None` when not installed.
    #[must_use]
    pub fn runtime_sync(&self) -> Option<&DaemonSupervisor> {
        self.runtime_sync.as_ref()
    }

    /// Address of the editor log endpoint while a session runs.
    #[must_use]
    pub fn studio_log_addr(&self) -> Option<SocketAddr> {
        self.studio_log_slot()
            .as_ref()
            .map(StudioLogServer::local_addr)
    }

    /// Whether the extraction has fired in the current session.
    #[must_use]
    pub fn extraction_fired(&self) -> bool {
        self.extract_fired.load(Ordering::SeqCst)
    }
}

async fn watch_for_marker(
    mut lines: broadcast::Receiver<String>,
    marker: String,
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
    host: Arc<dyn ProcessHost>,
    log: SessionLog,
    project_path: PathBuf,
) {
    loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            line = lines.recv() => line,
        };
        match line {
            Ok(line) if line.contains(&marker) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "marker watch lagged behind output");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }

    if fired.swap(true, Ordering::SeqCst) {
        return;
    }

    info!("connection marker seen, extracting state");
    let notice = match host.extract_state(&project_path).await {
        Ok(detail) => {
            let detail = detail.trim();
            if detail.is_empty() {
                "State extracted".to_owned()
            } else {
                format!("State extracted: {detail}")
            }
        }
        Err(err) => {
            warn!(%err, "state extraction failed");
            format!("Extraction failed: {err}")
        }
    };
    log.append(format_notice(DaemonKind::RuntimeSync, &notice));
}
