#![forbid(unsafe_code)]

pub mod boot;
pub mod config;
pub mod detect;
pub mod errors;
pub mod host;
pub mod models;
pub mod store;
pub mod supervisor;
pub mod util;

pub use config::LauncherConfig;
pub use errors::{AppError, Result};
