//! Persisted project registry and on-disk project discovery.
//!
//! [`ConfigStore`] and [`ProjectScanner`] are the two fallible collaborators
//! consulted during boot resolution. The JSON and glob implementations here
//! are what the binary uses; tests substitute in-memory fakes.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::models::project::{ProjectCandidate, ProjectEntry, ProjectRegistry};
use crate::{AppError, Result};

/// Storage for the project registry.
pub trait ConfigStore: Send + Sync {
    /// Load the registry. `Ok(None)` means nothing has been saved yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the registry exists but cannot be read
    /// or parsed.
    fn load(&self) -> Result<Option<ProjectRegistry>>;

    /// Persist `registry`, replacing what was stored.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the registry cannot be written.
    fn save(&self, registry: &ProjectRegistry) -> Result<()>;

    /// Whether `path` still exists on disk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if existence cannot be determined.
    fn probe_exists(&self, path: &Path) -> Result<bool>;
}

/// Finds project folders that are not (or no longer) in the registry.
pub trait ProjectScanner: Send + Sync {
    /// List project candidates under `root`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the scan cannot be performed.
    fn scan(&self, root: &Path) -> Result<Vec<ProjectCandidate>>;
}

/// Registry stored as pretty-printed camelCase JSON.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    /// Store backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the registry file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace `entry` (matched by path), mark it last active,
    /// and persist. A missing registry starts empty; an unreadable one is
    /// an error so it is never silently overwritten.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if loading or saving fails.
    pub fn upsert_project(&self, entry: ProjectEntry) -> Result<ProjectRegistry> {
        let mut registry = self.load()?.unwrap_or_default();
        registry.upsert(entry);
        self.save(&registry)?;
        Ok(registry)
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self) -> Result<Option<ProjectRegistry>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no registry saved yet");
                return Ok(None);
            }
            Err(err) => {
                return Err(AppError::Store(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )))
            }
        };
        let registry: ProjectRegistry = serde_json::from_str(&raw)?;
        Ok(Some(registry))
    }

    fn save(&self, registry: &ProjectRegistry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Store(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        let json = serde_json::to_string_pretty(registry)?;
        fs::write(&self.path, json).map_err(|err| {
            AppError::Store(format!("failed to write {}: {err}", self.path.display()))
        })?;
        info!(path = %self.path.display(), projects = registry.projects.len(), "registry saved");
        Ok(())
    }

    fn probe_exists(&self, path: &Path) -> Result<bool> {
        path.try_exists().map_err(AppError::from)
    }
}

/// Scanner matching `<root>/*/<marker>`.
#[derive(Debug, Clone)]
pub struct GlobScanner {
    marker: String,
}

impl GlobScanner {
    /// Scanner that treats directories containing `marker` as projects.
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl ProjectScanner for GlobScanner {
    fn scan(&self, root: &Path) -> Result<Vec<ProjectCandidate>> {
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
        let pattern = format!("{escaped_root}/*/{}", glob::Pattern::escape(&self.marker));
        let paths = glob::glob(&pattern)
            .map_err(|err| AppError::Io(format!("invalid scan pattern {pattern}: {err}")))?;

        let mut candidates = Vec::new();
        for marker_path in paths {
            let marker_path =
                marker_path.map_err(|err| AppError::Io(format!("scan failed: {err}")))?;
            let Some(dir) = marker_path.parent() else {
                continue;
            };
            let Some(name) = dir.file_name() else {
                continue;
            };
            candidates.push(ProjectCandidate {
                name: name.to_string_lossy().into_owned(),
                path: dir.to_path_buf(),
            });
        }
        candidates.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(root = %root.display(), found = candidates.len(), "project scan finished");
        Ok(candidates)
    }
}
