//! On-disk mirror of the session log.
//!
//! Lines are written to `<project>/.studio-launcher/logs/latest.log` by a
//! background task fed through an unbounded channel, so appending never
//! waits on disk I/O. Creating a new mirror rotates the previous
//! `latest.log` to `session-<timestamp>.log` and prunes old rotations.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Log directory relative to the project root.
pub const LOG_DIR: &str = ".studio-launcher/logs";

/// Name of the file being written for the current session.
pub const LATEST_LOG: &str = "latest.log";

const ROTATED_PREFIX: &str = "session-";
const ROTATED_SUFFIX: &str = ".log";

/// Handle to a running log writer.
///
/// Dropping the handle closes the channel; the writer then appends a footer
/// and exits. Use [`SessionLogFile::close`] to wait for that to happen.
#[derive(Debug)]
pub struct SessionLogFile {
    path: PathBuf,
    tx: mpsc::UnboundedSender<String>,
    writer: Option<JoinHandle<()>>,
}

impl SessionLogFile {
    /// Create the log directory, rotate the previous session's file, prune
    /// rotations beyond `retain`, and start the writer task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory or file cannot be created.
    pub async fn create(project_path: &Path, retain: usize) -> Result<Self> {
        let dir = project_path.join(LOG_DIR);
        fs::create_dir_all(&dir).await.map_err(|err| {
            AppError::Io(format!("failed to create log directory {}: {err}", dir.display()))
        })?;

        let latest = dir.join(LATEST_LOG);
        if fs::try_exists(&latest).await.unwrap_or(false) {
            let stamp = Utc::now().format("%Y%m%d-%H%M%S%3f");
            let rotated = dir.join(format!("{ROTATED_PREFIX}{stamp}{ROTATED_SUFFIX}"));
            if let Err(err) = fs::rename(&latest, &rotated).await {
                warn!(%err, "failed to rotate previous session log");
            }
        }

        prune_rotations(&dir, retain).await;

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&latest)
            .await
            .map_err(|err| {
                AppError::Io(format!("failed to open {}: {err}", latest.display()))
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_lines(file, rx));

        let header = format!("=== Session started {} ===\n", Utc::now().to_rfc3339());
        let _ = tx.send(header);

        debug!(path = %latest.display(), "session log file opened");
        Ok(Self {
            path: latest,
            tx,
            writer: Some(writer),
        })
    }

    /// Queue one line, prefixed with a UTC timestamp.
    pub fn write_line(&self, line: &str) {
        let stamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let _ = self.tx.send(format!("[{stamp}] {line}\n"));
    }

    /// Path of the file being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the channel and wait until the footer has been flushed.
    pub async fn close(mut self) {
        let writer = self.writer.take();
        drop(self);
        if let Some(handle) = writer {
            let _ = handle.await;
        }
    }
}

async fn write_lines(file: fs::File, mut rx: mpsc::UnboundedReceiver<String>) {
    let mut out = BufWriter::new(file);
    while let Some(line) = rx.recv().await {
        if let Err(err) = out.write_all(line.as_bytes()).await {
            warn!(%err, "failed to write session log line");
            continue;
        }
        // Flush per line so the file can be tailed live.
        let _ = out.flush().await;
    }

    let footer = format!("=== Session ended {} ===\n", Utc::now().to_rfc3339());
    let _ = out.write_all(footer.as_bytes()).await;
    let _ = out.flush().await;
}

/// Keep only the `retain` newest rotated logs. Names embed a sortable
/// timestamp, so lexical order is chronological.
async fn prune_rotations(dir: &Path, retain: usize) {
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return;
    };

    let mut rotated = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(ROTATED_PREFIX) && name.ends_with(ROTATED_SUFFIX) {
            rotated.push(entry.path());
        }
    }
    rotated.sort();

    let excess = rotated.len().saturating_sub(retain);
    for old in rotated.into_iter().take(excess) {
        if let Err(err) = fs::remove_file(&old).await {
            warn!(%err, path = %old.display(), "failed to prune old session log");
        }
    }
}
