//! Dependency tracking for warm kernel sessions.
//!
//! The setup cell of supported languages prints one JSON object on stdout
//! mapping every file the kernel has loaded to a fingerprint (its mtime).
//! When a warm session sees a previously loaded file with a different
//! fingerprint, the kernel holds stale code and must be restarted.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::document::Cell;

/// Fingerprint reported for a dependency path. Compared by equality only.
pub type Fingerprint = Value;

/// Mapping from dependency path to fingerprint.
pub type DependencyManifest = BTreeMap<String, Fingerprint>;

/// A dependency whose fingerprint changed between two runs.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleDependency {
    pub path: String,
    pub previous: Fingerprint,
    pub current: Fingerprint,
}

/// Read the manifest printed by a setup cell.
///
/// Only the first `stdout` stream output is considered. Returns `None` when
/// there is no such output (e.g. the language has no instrumentation) or when
/// it is not a JSON object.
pub fn extract(cell: &Cell) -> Option<DependencyManifest> {
    let text = cell.outputs.iter().find_map(|o| o.stdout_text())?;
    match serde_json::from_str::<DependencyManifest>(text.trim()) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            tracing::warn!("Ignoring unreadable dependency manifest: {}", e);
            None
        }
    }
}

/// Find the first path of `previous` whose fingerprint differs in `current`.
///
/// Paths missing from `current` or new in `current` never count as changes.
pub fn find_stale(
    previous: &DependencyManifest,
    current: &DependencyManifest,
) -> Option<StaleDependency> {
    current.iter().find_map(|(path, fingerprint)| {
        previous
            .get(path)
            .filter(|prev| *prev != fingerprint)
            .map(|prev| StaleDependency {
                path: path.clone(),
                previous: prev.clone(),
                current: fingerprint.clone(),
            })
    })
}

/// Whether the kernel must be restarted.
pub fn compare(previous: &DependencyManifest, current: &DependencyManifest) -> bool {
    find_stale(previous, current).is_some()
}

/// Add paths not yet seen to `manifest`. Known paths keep their fingerprint.
pub fn merge(manifest: &mut DependencyManifest, current: DependencyManifest) {
    for (path, fingerprint) in current {
        manifest.entry(path).or_insert(fingerprint);
    }
}

/// Dependency tracking state of a kernel session.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DependencyTracking {
    /// No setup cell has reported yet.
    #[default]
    Pending,
    /// Manifest accumulated across requests.
    Active(DependencyManifest),
    /// The first setup cell reported nothing; tracking is off for the session.
    Disabled,
}

impl DependencyTracking {
    /// Fold a setup cell report into the state.
    ///
    /// Returns the changed dependency if the kernel must be restarted, in
    /// which case the state is left unchanged.
    pub fn observe(&mut self, report: Option<DependencyManifest>) -> Option<StaleDependency> {
        match self {
            Self::Pending => {
                *self = match report {
                    Some(manifest) => Self::Active(manifest),
                    None => Self::Disabled,
                };
                None
            }
            Self::Active(manifest) => {
                let current = report?;
                if let Some(stale) = find_stale(manifest, &current) {
                    return Some(stale);
                }
                merge(manifest, current);
                None
            }
            Self::Disabled => None,
        }
    }

    /// Whether there is at least one dependency to validate next time.
    pub fn has_entries(&self) -> bool {
        matches!(self, Self::Active(manifest) if !manifest.is_empty())
    }
}
