//! Unit tests for startup resolution against in-memory collaborators.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use studio_launcher::boot::resolve_boot;
use studio_launcher::models::boot::BootDecision;
use studio_launcher::models::project::{ProjectCandidate, ProjectEntry, ProjectRegistry};
use studio_launcher::store::{ConfigStore, ProjectScanner};
use studio_launcher::{AppError, Result};

#[derive(Default)]
struct FakeStore {
    registry: Option<ProjectRegistry>,
    load_error: bool,
    existing: HashMap<PathBuf, bool>,
    probe_errors: Vec<PathBuf>,
}

impl FakeStore {
    fn with_projects(projects: &[(&str, bool)], last_active: Option<&str>) -> Self {
        let mut registry = ProjectRegistry::default();
        let mut existing = HashMap::new();
        for (name, exists) in projects {
            let path = project_path(name);
            existing.insert(path.clone(), *exists);
            registry.projects.push(ProjectEntry::new(*name, path, "cursor"));
        }
        registry.last_active_project = last_active.map(project_path);
        Self {
            registry: Some(registry),
            existing,
            ..Self::default()
        }
    }
}

impl ConfigStore for FakeStore {
    fn load(&self) -> Result<Option<ProjectRegistry>> {
        if self.load_error {
            return Err(AppError::Store("corrupt".into()));
        }
        Ok(self.registry.clone())
    }

    fn save(&self, _registry: &ProjectRegistry) -> Result<()> {
        Ok(())
    }

    fn probe_exists(&self, path: &Path) -> Result<bool> {
        if self.probe_errors.iter().any(|p| p == path) {
            return Err(AppError::Io("permission denied".into()));
        }
        Ok(self.existing.get(path).copied().unwrap_or(false))
    }
}

enum FakeScanner {
    Found(Vec<&'static str>),
    Fails,
}

impl ProjectScanner for FakeScanner {
    fn scan(&self, _root: &Path) -> Result<Vec<ProjectCandidate>> {
        match self {
            Self::Found(names) => Ok(names
                .iter()
                .map(|name| ProjectCandidate {
                    name: (*name).to_owned(),
                    path: project_path(name),
                })
                .collect()),
            Self::Fails => Err(AppError::Io("root unreadable".into())),
        }
    }
}

fn project_path(name: &str) -> PathBuf {
    PathBuf::from("/games").join(name)
}

fn resolve(store: &FakeStore, scanner: &FakeScanner) -> BootDecision {
    resolve_boot(store, scanner, Path::new("/games"))
}

fn resumed_name(decision: &BootDecision) -> Option<&str> {
    match decision {
        BootDecision::Resume(entry) => Some(entry.name.as_str()),
        _ => None,
    }
}

#[test]
fn resumes_last_active_project_when_present() {
    let store = FakeStore::with_projects(&[("alpha", true), ("beta", true)], Some("beta"));

    let decision = resolve(&store, &FakeScanner::Found(vec!["gamma"]));

    assert_eq!(resumed_name(&decision), Some("beta"));
}

#[test]
fn resumes_first_survivor_when_last_active_is_gone() {
    let store = FakeStore::with_projects(
        &[("alpha", false), ("beta", true), ("gamma", true)],
        Some("alpha"),
    );

    let decision = resolve(&store, &FakeScanner::Found(Vec::new()));

    assert_eq!(resumed_name(&decision), Some("beta"));
}

#[test]
fn resumes_first_survivor_without_last_active() {
    let store = FakeStore::with_projects(&[("alpha", true), ("beta", true)], None);

    let decision = resolve(&store, &FakeScanner::Found(Vec::new()));

    assert_eq!(resumed_name(&decision), Some("alpha"));
}

#[test]
fn probe_error_counts_as_missing() {
    let mut store = FakeStore::with_projects(&[("alpha", true), ("beta", true)], Some("alpha"));
    store.probe_errors.push(project_path("alpha"));

    let decision = resolve(&store, &FakeScanner::Found(Vec::new()));

    assert_eq!(resumed_name(&decision), Some("beta"));
}

#[test]
fn recovers_from_scan_when_every_registered_project_is_gone() {
    let store = FakeStore::with_projects(&[("alpha", false)], Some("alpha"));

    let decision = resolve(&store, &FakeScanner::Found(vec!["found-one", "found-two"]));

    match decision {
        BootDecision::Recover(candidates) => {
            let names: Vec<_> = candidates.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(names, ["found-one", "found-two"]);
        }
        other => panic!("expected recover, got {other:?}"),
    }
}

#[test]
fn unreadable_registry_falls_through_to_scan() {
    let store = FakeStore {
        load_error: true,
        ..FakeStore::default()
    };

    let decision = resolve(&store, &FakeScanner::Found(vec!["found"]));

    assert!(matches!(decision, BootDecision::Recover(ref c) if c.len() == 1));
}

#[test]
fn missing_registry_and_empty_scan_runs_wizard() {
    let store = FakeStore::default();

    let decision = resolve(&store, &FakeScanner::Found(Vec::new()));

    assert_eq!(decision, BootDecision::Wizard);
}

#[test]
fn scan_failure_runs_wizard() {
    let store = FakeStore {
        load_error: true,
        ..FakeStore::default()
    };

    let decision = resolve(&store, &FakeScanner::Fails);

    assert_eq!(decision, BootDecision::Wizard);
}

#[test]
fn empty_registry_falls_through_to_scan() {
    let store = FakeStore::with_projects(&[], None);

    let decision = resolve(&store, &FakeScanner::Found(vec!["found"]));

    assert!(matches!(decision, BootDecision::Recover(_)));
}

#[test]
fn every_failure_combination_still_decides() {
    for load_error in [false, true] {
        for scan_fails in [false, true] {
            let store = FakeStore {
                load_error,
                ..FakeStore::with_projects(&[("alpha", false)], None)
            };
            let scanner = if scan_fails {
                FakeScanner::Fails
            } else {
                FakeScanner::Found(Vec::new())
            };
            assert_eq!(resolve(&store, &scanner), BootDecision::Wizard);
        }
    }
}
