#![forbid(unsafe_code)]

//! `studio-launcher`: development session launcher binary.
//!
//! Resolves which project to open, probes the daemon binaries, and runs a
//! supervised development session until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use studio_launcher::boot::resolve_boot;
use studio_launcher::detect::{Detector, SystemDetector};
use studio_launcher::host::process::TokioProcessHost;
use studio_launcher::host::ProcessHost;
use studio_launcher::models::boot::BootDecision;
use studio_launcher::models::project::ProjectEntry;
use studio_launcher::store::{ConfigStore, GlobScanner, JsonConfigStore};
use studio_launcher::supervisor::{SessionCoordinator, SessionOptions};
use studio_launcher::util::expand_tilde;
use studio_launcher::{AppError, LauncherConfig, Result};

/// Config file read when `--config` is not given, if it exists.
const DEFAULT_CONFIG_PATH: &str = "~/.studio-launcher/launcher.toml";

/// How long shutdown waits for buffered log lines to reach stdout.
const PRINTER_DRAIN: Duration = Duration::from_secs(2);

/// Editor opened for projects given on the command line.
const DEFAULT_AI_TOOL: &str = "vscode";

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "studio-launcher", about = "Game studio development launcher", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the startup decision (resume, recover, or wizard) as JSON.
    Boot,
    /// Print which daemon binaries are installed as JSON.
    Detect,
    /// Run a development session until ctrl-c.
    Dev {
        /// Project directory; defaults to the project boot would resume.
        #[arg(long)]
        project: Option<PathBuf>,

        /// Editor tool id used when registering `--project`.
        #[arg(long, default_value = DEFAULT_AI_TOOL)]
        tool: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = Arc::new(load_config(args.config.as_deref())?);
    info!(registry = %config.registry_path.display(), "configuration loaded");

    let store = JsonConfigStore::new(config.registry_path.clone());
    let scanner = GlobScanner::new(config.project_marker.clone());

    match args.command {
        Command::Boot => {
            let decision = resolve_boot(&store, &scanner, &config.projects_root);
            print_json(&decision)
        }
        Command::Detect => {
            let capabilities = SystemDetector::new(&config).detect().await;
            print_json(&capabilities)
        }
        Command::Dev { project, tool } => {
            let project = match project {
                Some(path) => register_project(&store, &path, &tool),
                None => boot_project(&store, &scanner, &config)?,
            };
            run_session(config, project).await
        }
    }
}

fn load_config(explicit: Option<&Path>) -> Result<LauncherConfig> {
    if let Some(path) = explicit {
        return LauncherConfig::load_from_path(path);
    }
    let fallback = expand_tilde(Path::new(DEFAULT_CONFIG_PATH));
    if fallback.is_file() {
        LauncherConfig::load_from_path(fallback)
    } else {
        Ok(LauncherConfig::default())
    }
}

/// Look `path` up in the registry, or register it. Registry failures are
/// logged and do not block the session.
fn register_project(store: &JsonConfigStore, path: &Path, tool: &str) -> ProjectEntry {
    let path = expand_tilde(path);
    let known = store
        .load()
        .ok()
        .flatten()
        .and_then(|registry| registry.find_by_path(&path).cloned());

    let entry = known.unwrap_or_else(|| {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        ProjectEntry::new(name, path.clone(), tool)
    });

    if let Err(err) = store.upsert_project(entry.clone()) {
        warn!(%err, "failed to record project in registry");
    }
    entry
}

fn boot_project(
    store: &JsonConfigStore,
    scanner: &GlobScanner,
    config: &LauncherConfig,
) -> Result<ProjectEntry> {
    match resolve_boot(store, scanner, &config.projects_root) {
        BootDecision::Resume(project) => Ok(project),
        BootDecision::Recover(candidates) => {
            for candidate in &candidates {
                info!(name = %candidate.name, path = %candidate.path.display(), "found project");
            }
            error!("no registered project; rerun with --project <path>");
            Err(AppError::NoActiveProject)
        }
        BootDecision::Wizard => {
            error!("no projects found; rerun with --project <path>");
            Err(AppError::NoActiveProject)
        }
    }
}

async fn run_session(config: Arc<LauncherConfig>, project: ProjectEntry) -> Result<()> {
    let capabilities = SystemDetector::new(&config).detect().await;
    if !capabilities.file_sync.installed {
        warn!(program = %config.file_sync.program, "file-sync binary not found");
    }

    let host: Arc<dyn ProcessHost> = Arc::new(TokioProcessHost::new(Arc::clone(&config)));
    let options = SessionOptions::from_config(&config, capabilities.runtime_sync.installed);
    let coordinator = SessionCoordinator::new(host, options);
    coordinator.set_active_project(project);

    let mut lines = coordinator.log().subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match lines.recv().await {
                Ok(line) => println!("{line}"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "log output lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let snapshot = coordinator.start_development().await?;
    info!(
        file_sync = ?snapshot.file_sync.status,
        runtime_sync = ?snapshot.runtime_sync.status,
        "session running; press ctrl-c to stop"
    );

    shutdown_signal().await;
    info!("shutdown signal received");

    let snapshot = coordinator.stop_all().await;
    // The feed closes once the coordinator and its tasks release the log.
    drop(coordinator);
    if tokio::time::timeout(PRINTER_DRAIN, printer).await.is_err() {
        warn!("session log output did not drain before exit");
    }
    info!(
        file_sync = ?snapshot.file_sync.status,
        runtime_sync = ?snapshot.runtime_sync.status,
        "studio-launcher shut down"
    );
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries command output and session log lines.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
