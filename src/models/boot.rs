//! Outcome of the startup resolution policy.

use serde::Serialize;

use super::project::{ProjectCandidate, ProjectEntry};

/// Where the operator lands when the launcher starts.
///
/// Produced exactly once by [`crate::boot::resolve_boot`] and never mutated.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "decision", content = "data")]
pub enum BootDecision {
    /// Reopen a registered project whose directory still exists.
    Resume(ProjectEntry),
    /// No usable registry, but project folders were found on disk.
    Recover(Vec<ProjectCandidate>),
    /// Nothing to resume or recover; run the setup wizard.
    Wizard,
}
