//! Startup resolution: resume, recover, or run the wizard.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::models::boot::BootDecision;
use crate::models::project::ProjectEntry;
use crate::store::{ConfigStore, ProjectScanner};

/// Decide where the operator lands at startup.
///
/// Layers are consulted in order and the first one that produces something
/// wins:
///
/// 1. the persisted registry, filtered to projects whose path still exists;
///    the last active survivor is preferred, otherwise the first survivor,
/// 2. a scan of `projects_root` for project folders,
/// 3. the setup wizard.
///
/// Every failure inside a layer falls through to the next one, so this
/// always returns a decision.
pub fn resolve_boot(
    store: &dyn ConfigStore,
    scanner: &dyn ProjectScanner,
    projects_root: &Path,
) -> BootDecision {
    if let Some(project) = resume_candidate(store) {
        info!(project = %project.name, "resuming last project");
        return BootDecision::Resume(project);
    }

    match scanner.scan(projects_root) {
        Ok(candidates) if !candidates.is_empty() => {
            info!(found = candidates.len(), "recovering projects from disk");
            return BootDecision::Recover(candidates);
        }
        Ok(_) => debug!(root = %projects_root.display(), "scan found no projects"),
        Err(err) => warn!(%err, "project scan failed"),
    }

    info!("no projects found, starting wizard");
    BootDecision::Wizard
}

fn resume_candidate(store: &dyn ConfigStore) -> Option<ProjectEntry> {
    let registry = match store.load() {
        Ok(Some(registry)) => registry,
        Ok(None) => {
            debug!("no saved registry");
            return None;
        }
        Err(err) => {
            warn!(%err, "registry unreadable, falling back to scan");
            return None;
        }
    };

    let mut survivors: Vec<ProjectEntry> = registry
        .projects
        .into_iter()
        .filter(|project| match store.probe_exists(&project.path) {
            Ok(exists) => {
                if !exists {
                    debug!(path = %project.path.display(), "registered project is gone");
                }
                exists
            }
            Err(err) => {
                warn!(path = %project.path.display(), %err, "probe failed, treating as missing");
                false
            }
        })
        .collect();

    let last_active = registry.last_active_project.as_deref();
    let preferred = last_active.and_then(|path| survivors.iter().position(|p| p.path == path));
    match preferred {
        Some(index) => Some(survivors.swap_remove(index)),
        None => survivors.into_iter().next(),
    }
}
