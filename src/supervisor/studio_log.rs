//! Loopback HTTP endpoint for editor-side logs.
//!
//! The editor plugin posts batches of its output to `POST /log`; each entry
//! is appended to the [`SessionLog`] with a `studio`, `studio-warn` or
//! `studio-err` prefix. `GET /health` answers `ok` so the plugin can tell
//! whether a session is listening. The server lives exactly as long as the
//! development session that started it.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, info_span, warn, Instrument};

use super::log_buffer::SessionLog;
use crate::{AppError, Result};

/// How long shutdown waits for in-flight requests before aborting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// One entry of a posted batch. Unknown fields (such as the plugin's
/// timestamp) are ignored.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StudioLogEntry {
    /// Message text.
    #[serde(default)]
    pub message: String,
    /// `info`, `warn` or `error`; anything else counts as `info`.
    #[serde(default)]
    pub level: Option<String>,
}

impl StudioLogEntry {
    /// Session log line for this entry.
    #[must_use]
    pub fn to_log_line(&self) -> String {
        let prefix = match self.level.as_deref() {
            Some("error") => "studio-err",
            Some("warn") => "studio-warn",
            _ => "studio",
        };
        format!("[{prefix}] {}", self.message)
    }
}

/// Routes of the endpoint, writing into `log`.
#[must_use]
pub fn router(log: SessionLog) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/log", post(ingest))
        .with_state(log)
}

async fn health() -> &'static str {
    "ok"
}

/// Malformed batches are acknowledged and dropped; the plugin has no way to
/// act on a rejection.
async fn ingest(State(log): State<SessionLog>, body: String) -> &'static str {
    match serde_json::from_str::<Vec<StudioLogEntry>>(&body) {
        Ok(entries) => {
            for entry in &entries {
                log.append(entry.to_log_line());
            }
        }
        Err(err) => debug!(%err, "ignoring malformed studio log batch"),
    }
    "ok"
}

/// A running endpoint. Dropping it stops the server.
#[derive(Debug)]
pub struct StudioLogServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _guard: DropGuard,
}

impl StudioLogServer {
    /// Bind `127.0.0.1:<port>` and start serving into `log`. Port `0` picks
    /// a free port; see [`StudioLogServer::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Host` if the port cannot be bound.
    pub async fn bind(port: u16, log: SessionLog) -> Result<Self> {
        let bind = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(bind).await.map_err(|err| {
            AppError::Host(format!("failed to bind studio log endpoint on {bind}: {err}"))
        })?;
        let addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task = tokio::spawn(
            async move {
                let served = axum::serve(listener, router(log))
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await;
                if let Err(err) = served {
                    warn!(%err, "studio log endpoint failed");
                }
            }
            .instrument(info_span!("studio_log_endpoint", %addr)),
        );

        info!(%addr, "studio log endpoint listening");
        Ok(Self {
            addr,
            _guard: cancel.clone().drop_guard(),
            cancel,
            task,
        })
    }

    /// Address actually bound.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting requests and wait for the server task to finish.
    pub async fn shutdown(self) {
        let Self {
            addr,
            cancel,
            mut task,
            _guard,
        } = self;
        cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!(%addr, "studio log endpoint did not drain, aborting");
            task.abort();
        }
        info!(%addr, "studio log endpoint stopped");
    }
}
