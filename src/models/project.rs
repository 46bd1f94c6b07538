//! Project identity and the persisted project registry.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registry schema version written by this crate.
pub const REGISTRY_VERSION: u32 = 1;

/// Identity of one development project.
///
/// Entries are immutable once created; edits go through
/// [`ProjectRegistry::upsert`], which replaces the whole entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEntry {
    /// Display name.
    pub name: String,
    /// Absolute path of the project directory; the registry key.
    pub path: PathBuf,
    /// Selected AI-tool identifier (`claude`, `cursor`, `vscode`, …).
    pub ai_tool: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Published place identifier, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<u64>,
    /// Published universe identifier, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universe_id: Option<u64>,
}

impl ProjectEntry {
    /// Construct a new entry stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, ai_tool: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            ai_tool: ai_tool.into(),
            created_at: Utc::now(),
            place_id: None,
            universe_id: None,
        }
    }
}

/// Persisted list of known projects plus the last one the operator used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRegistry {
    /// Schema version.
    pub version: u32,
    /// Known projects in insertion order.
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
    /// Path of the most recently active project.
    #[serde(default)]
    pub last_active_project: Option<PathBuf>,
}

impl Default for ProjectRegistry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            projects: Vec::new(),
            last_active_project: None,
        }
    }
}

impl ProjectRegistry {
    /// Insert `entry`, replacing any existing entry with the same path, and
    /// mark it as the last active project.
    pub fn upsert(&mut self, entry: ProjectEntry) {
        self.last_active_project = Some(entry.path.clone());
        if let Some(existing) = self.projects.iter_mut().find(|p| p.path == entry.path) {
            *existing = entry;
        } else {
            self.projects.push(entry);
        }
    }

    /// Look up a project by its path.
    #[must_use]
    pub fn find_by_path(&self, path: &Path) -> Option<&ProjectEntry> {
        self.projects.iter().find(|p| p.path == path)
    }
}

/// A project folder discovered on disk that is not (yet) in the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCandidate {
    /// Folder name.
    pub name: String,
    /// Absolute folder path.
    pub path: PathBuf,
}

impl ProjectCandidate {
    /// Promote the candidate to a registry entry for the chosen AI tool.
    #[must_use]
    pub fn into_entry(self, ai_tool: impl Into<String>) -> ProjectEntry {
        ProjectEntry::new(self.name, self.path, ai_tool)
    }
}
