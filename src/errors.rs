//! Error types shared across the launcher core.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Project registry could not be read, parsed, or written.
    Store(String),
    /// The process host rejected or failed a daemon command.
    Host(String),
    /// The daemon executable could not be found on this machine.
    BinaryMissing(String),
    /// A daemon instance is already starting or running.
    AlreadyRunning(String),
    /// A session operation needs an active project and none is selected.
    NoActiveProject,
    /// The one-shot state extraction exited unsuccessfully.
    Extract(String),
}

impl AppError {
    /// Whether this error means the daemon binary is absent, as opposed to
    /// a transient failure worth retrying.
    #[must_use]
    pub fn is_missing_binary(&self) -> bool {
        matches!(self, Self::BinaryMissing(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Store(msg) => write!(f, "store: {msg}"),
            Self::Host(msg) => write!(f, "host: {msg}"),
            Self::BinaryMissing(msg) => write!(f, "binary missing: {msg}"),
            Self::AlreadyRunning(msg) => write!(f, "already running: {msg}"),
            Self::NoActiveProject => write!(f, "no active project selected"),
            Self::Extract(msg) => write!(f, "extract: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(format!("invalid registry json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
