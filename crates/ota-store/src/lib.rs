//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Persisted artifact status and update cycle documents."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Whole-document JSON stores loaded before a command and written back after it.
//!
//! [`ArtifactStatusStore`] keeps the deployed/rollback revision and lifecycle of every
//! artifact, [`UpdateCycleTracker`] the latest update or rollback attempt per artifact.
//! Both are keyed by `(name, kind)` and are meant to be used through their `scoped`
//! helpers (or [`with_trackers`]) which guarantee the write-back even when the
//! enclosing operation fails.

use std::path::{Path, PathBuf};

use tracing::warn;

/// Result alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for the persisted stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Wrapper for IO errors encountered while reading/writing store files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON (de)serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Another process holds the advisory store lock.
    #[error("another update agent instance is running (lock held on {})", .0.display())]
    Locked(PathBuf),
    /// A mutation targeted an artifact that has no record yet.
    #[error("cannot record {what} for unregistered {kind} artifact '{name}'")]
    Unregistered {
        /// What the caller tried to record.
        what: &'static str,
        /// Artifact name.
        name: String,
        /// Artifact kind.
        kind: ArtifactKind,
    },
}

pub mod artifacts;
pub mod cycles;
pub mod document;
pub mod lock;
pub mod model;

pub use artifacts::ArtifactStatusStore;
pub use cycles::{CycleRecord, UpdateCycleTracker};
pub use document::Durability;
pub use lock::{LazyStoreLock, StoreLock};
pub use model::{
    Artifact, ArtifactKind, ArtifactsDocument, CompletionState, LifecycleState, UpdateCycle,
    UpdateCyclesDocument,
};

/// Combine the outcome of an operation with the outcome of the write-back that follows it.
///
/// The operation's own error takes precedence; a write-back failure after a failed
/// operation is only logged.
pub fn write_back<T, E>(outcome: std::result::Result<T, E>, saved: Result<()>) -> std::result::Result<T, E>
where
    E: From<StoreError>,
{
    match (outcome, saved) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err.into()),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(save_err)) => {
            warn!(error = %save_err, "failed to write back store after a failed operation");
            Err(err)
        }
    }
}

/// Open both stores, run `op`, and write both back regardless of the outcome.
pub fn with_trackers<T, E, F>(
    artifacts_path: &Path,
    update_status_path: &Path,
    op: F,
) -> std::result::Result<T, E>
where
    E: From<StoreError>,
    F: FnOnce(&mut ArtifactStatusStore, &mut UpdateCycleTracker) -> std::result::Result<T, E>,
{
    let mut artifacts = ArtifactStatusStore::open(artifacts_path)?;
    let mut cycles = UpdateCycleTracker::open(update_status_path)?;
    let outcome = op(&mut artifacts, &mut cycles);
    let saved = artifacts.save().and(cycles.save());
    write_back(outcome, saved)
}
