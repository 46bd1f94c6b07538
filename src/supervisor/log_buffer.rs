//! Bounded, order-preserving session log shared by every supervisor.
//!
//! Appends are atomic per call: the ring buffer, the live broadcast feed,
//! and the optional on-disk mirror are all updated under one lock, so every
//! observer sees lines in the same order and no line is ever split.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use super::log_file::SessionLogFile;
use crate::host::OutputStream;
use crate::models::daemon::DaemonKind;

/// Default number of lines kept in memory.
pub const DEFAULT_CAPACITY: usize = 500;

/// Buffer size of the live feed; slow subscribers observe `Lagged`.
const LIVE_FEED_CAPACITY: usize = 1024;

struct LogState {
    lines: VecDeque<String>,
    file: Option<SessionLogFile>,
}

struct LogInner {
    capacity: usize,
    state: Mutex<LogState>,
    live: broadcast::Sender<String>,
}

/// Shared ring buffer of display lines with oldest-first eviction.
///
/// Cloning yields another handle to the same buffer.
#[derive(Clone)]
pub struct SessionLog {
    inner: Arc<LogInner>,
}

impl std::fmt::Debug for SessionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLog")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SessionLog {
    /// Create an empty log holding at most `capacity` lines (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (live, _) = broadcast::channel(LIVE_FEED_CAPACITY);
        Self {
            inner: Arc::new(LogInner {
                capacity,
                state: Mutex::new(LogState {
                    lines: VecDeque::with_capacity(capacity),
                    file: None,
                }),
                live,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        // A poisoned log is still a valid list of strings.
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Append one line, evicting from the front while over capacity.
    pub fn append(&self, line: impl Into<String>) {
        let line = line.into();
        let mut state = self.state();
        if let Some(file) = state.file.as_ref() {
            file.write_line(&line);
        }
        // No subscribers is fine.
        let _ = self.inner.live.send(line.clone());
        state.lines.push_back(line);
        while state.lines.len() > self.inner.capacity {
            state.lines.pop_front();
        }
    }

    /// Remove every line immediately. The on-disk mirror is unaffected.
    pub fn clear(&self) {
        self.state().lines.clear();
    }

    /// Copy of the current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.state().lines.iter().cloned().collect()
    }

    /// Number of lines currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().lines.len()
    }

    /// Whether the log holds no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of lines held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Subscribe to lines appended from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inner.live.subscribe()
    }

    /// Mirror subsequent appends to `file`, replacing (and closing) any
    /// previous mirror. `None` detaches.
    pub fn attach_file(&self, file: Option<SessionLogFile>) {
        let previous = std::mem::replace(&mut self.state().file, file);
        drop(previous);
    }
}

/// Format a daemon output line for the session log.
///
/// Lines carry the daemon prefix; stderr lines add an `:err` marker so a UI
/// can colour them without knowing where they came from.
#[must_use]
pub fn format_output_line(kind: DaemonKind, stream: OutputStream, line: &str) -> String {
    match stream {
        OutputStream::Stdout => format!("[{}] {line}", kind.log_prefix()),
        OutputStream::Stderr => format!("[{}:err] {line}", kind.log_prefix()),
    }
}

/// Format a supervisor diagnostic line for the session log.
#[must_use]
pub fn format_notice(kind: DaemonKind, message: &str) -> String {
    format!("[{}] {message}", kind.log_prefix())
}
