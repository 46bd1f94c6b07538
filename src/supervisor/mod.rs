//! Supervision core: per-daemon state machines, their async drivers, the
//! session coordinator, the shared session log and the editor log endpoint.

pub mod daemon;
pub mod log_buffer;
pub mod log_file;
pub mod process;
pub mod session;
pub mod studio_log;

pub use daemon::DaemonSupervisor;
pub use log_buffer::SessionLog;
pub use process::{RestartPolicy, SupervisedProcess};
pub use session::{SessionCoordinator, SessionOptions};
pub use studio_log::StudioLogServer;
