//! Unit tests for the JSON registry store and the glob project scanner.

use std::fs;

use studio_launcher::models::project::{ProjectEntry, ProjectRegistry};
use studio_launcher::store::{ConfigStore, GlobScanner, JsonConfigStore, ProjectScanner};
use studio_launcher::AppError;

#[test]
fn missing_registry_loads_as_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonConfigStore::new(dir.path().join("config.json"));

    assert!(store.load().expect("load").is_none());
}

#[test]
fn invalid_json_is_a_store_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.json");
    fs::write(&path, "{ not json").expect("write");
    let store = JsonConfigStore::new(&path);

    assert!(matches!(store.load(), Err(AppError::Store(_))));
}

#[test]
fn save_creates_parent_directories_and_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonConfigStore::new(dir.path().join("nested/deeper/config.json"));
    let mut registry = ProjectRegistry::default();
    registry.upsert(ProjectEntry::new("obby", "/games/obby", "cursor"));

    store.save(&registry).expect("save");

    assert_eq!(store.load().expect("load"), Some(registry));
}

#[test]
fn registry_is_written_as_camel_case() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonConfigStore::new(dir.path().join("config.json"));

    store
        .upsert_project(ProjectEntry::new("obby", "/games/obby", "claude"))
        .expect("upsert");

    let raw = fs::read_to_string(store.path()).expect("read");
    assert!(raw.contains("\"lastActiveProject\""));
    assert!(raw.contains("\"aiTool\""));
    assert!(raw.contains("\"createdAt\""));
    assert!(!raw.contains("placeId"));
}

#[test]
fn upsert_replaces_by_path_and_marks_last_active() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonConfigStore::new(dir.path().join("config.json"));

    store
        .upsert_project(ProjectEntry::new("obby", "/games/obby", "claude"))
        .expect("first");
    store
        .upsert_project(ProjectEntry::new("tycoon", "/games/tycoon", "cursor"))
        .expect("second");
    let registry = store
        .upsert_project(ProjectEntry::new("obby v2", "/games/obby", "vscode"))
        .expect("third");

    assert_eq!(registry.projects.len(), 2);
    assert_eq!(registry.projects[0].name, "obby v2");
    assert_eq!(registry.projects[0].ai_tool, "vscode");
    assert_eq!(
        registry.last_active_project.as_deref(),
        Some(std::path::Path::new("/games/obby"))
    );
    assert_eq!(store.load().expect("load"), Some(registry));
}

#[test]
fn upsert_refuses_to_overwrite_unreadable_registry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.json");
    fs::write(&path, "garbage").expect("write");
    let store = JsonConfigStore::new(&path);

    let result = store.upsert_project(ProjectEntry::new("obby", "/games/obby", "claude"));

    assert!(result.is_err());
    assert_eq!(fs::read_to_string(&path).expect("read"), "garbage");
}

#[test]
fn probe_reports_existence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonConfigStore::new(dir.path().join("config.json"));

    assert!(store.probe_exists(dir.path()).expect("probe"));
    assert!(!store.probe_exists(&dir.path().join("gone")).expect("probe"));
}

#[test]
fn scanner_finds_marked_directories_sorted() {
    let dir = tempfile::tempdir().expect("tempdir");
    for name in ["zeta", "alpha", "unmarked"] {
        fs::create_dir(dir.path().join(name)).expect("mkdir");
    }
    fs::write(dir.path().join("zeta/default.project.json"), "{}").expect("write");
    fs::write(dir.path().join("alpha/default.project.json"), "{}").expect("write");

    let found = GlobScanner::new("default.project.json")
        .scan(dir.path())
        .expect("scan");

    let names: Vec<_> = found.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["alpha", "zeta"]);
    assert_eq!(found[0].path, dir.path().join("alpha"));
}

#[test]
fn scanner_ignores_nested_markers() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("outer/inner")).expect("mkdir");
    fs::write(dir.path().join("outer/inner/default.project.json"), "{}").expect("write");

    let found = GlobScanner::new("default.project.json")
        .scan(dir.path())
        .expect("scan");

    assert!(found.is_empty());
}

#[test]
fn scanner_on_missing_root_finds_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");

    let found = GlobScanner::new("default.project.json")
        .scan(&dir.path().join("absent"))
        .expect("scan");

    assert!(found.is_empty());
}

#[test]
fn candidate_promotes_to_entry() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir(dir.path().join("obby")).expect("mkdir");
    fs::write(dir.path().join("obby/default.project.json"), "{}").expect("write");

    let candidate = GlobScanner::new("default.project.json")
        .scan(dir.path())
        .expect("scan")
        .remove(0);
    let entry = candidate.into_entry("cursor");

    assert_eq!(entry.name, "obby");
    assert_eq!(entry.ai_tool, "cursor");
    assert_eq!(entry.path, dir.path().join("obby"));
}
