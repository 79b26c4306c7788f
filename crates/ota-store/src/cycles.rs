//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Update cycle tracker with crash-safe checkpoints."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::document::{load_document, save_document, Durability};
use crate::model::{ArtifactKind, CompletionState, UpdateCycle, UpdateCyclesDocument};
use crate::{write_back, Result, StoreError};

/// One observation fed into [`UpdateCycleTracker::record_cycle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleRecord {
    /// Target revision, only taken when the cycle has none yet.
    pub revision: Option<String>,
    /// Stage reached, `None` leaves the stage untouched.
    pub completion_state: Option<CompletionState>,
    /// Outcome of the step.
    pub status: bool,
    /// Note for the operator.
    pub message: Option<String>,
}

impl CycleRecord {
    /// Successful progress to `completion_state`.
    pub fn state(completion_state: CompletionState) -> Self {
        Self {
            revision: None,
            completion_state: Some(completion_state),
            status: true,
            message: None,
        }
    }

    /// Failure of the current cycle, without changing its stage.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            revision: None,
            completion_state: None,
            status: false,
            message: Some(message.into()),
        }
    }

    /// Attach the target revision.
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Attach a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Override the outcome.
    pub fn with_status(mut self, status: bool) -> Self {
        self.status = status;
        self
    }
}

/// Persisted record of the most recent update/rollback attempt per artifact.
#[derive(Debug)]
pub struct UpdateCycleTracker {
    path: PathBuf,
    document: UpdateCyclesDocument,
}

impl UpdateCycleTracker {
    /// Load the tracker from `path`, starting empty when the file is missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = load_document(&path)?;
        Ok(Self { path, document })
    }

    /// Open the tracker, run `op`, and write it back regardless of the outcome.
    pub fn scoped<T, E, F>(path: impl AsRef<Path>, op: F) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
    {
        let mut tracker = Self::open(path)?;
        let outcome = op(&mut tracker);
        write_back(outcome, tracker.save())
    }

    /// Regular end-of-operation write-back.
    pub fn save(&self) -> Result<()> {
        save_document(&self.path, &self.document, Durability::Buffered)
    }

    /// Instant flush: persist the whole document and sync it to stable storage.
    pub fn flush(&self) -> Result<()> {
        save_document(&self.path, &self.document, Durability::Synced)
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All cycle records.
    pub fn cycles(&self) -> &[UpdateCycle] {
        &self.document.update_cycles
    }

    /// Cycle record for `(name, kind)`, if any.
    pub fn get(&self, name: &str, kind: ArtifactKind) -> Option<&UpdateCycle> {
        self.document.update_cycles.iter().find(|c| c.is(name, kind))
    }

    /// Target revision of the current or last cycle for `(name, kind)`.
    pub fn revision_of(&self, name: &str, kind: ArtifactKind) -> Option<&str> {
        self.get(name, kind).and_then(|c| c.revision.as_deref())
    }

    /// Record progress of the cycle for `(name, kind)`.
    ///
    /// A closed cycle (see [`UpdateCycle::is_closed_for`]) is replaced by a new one.
    /// An open cycle keeps its first revision and first message; only the
    /// `Confirmed -> RolledBack` transition renews the timestamp and message.
    pub fn record_cycle(&mut self, name: &str, kind: ArtifactKind, record: CycleRecord) {
        self.record_cycle_at(name, kind, record, Utc::now().timestamp());
    }

    /// [`record_cycle`](Self::record_cycle) followed by an instant flush.
    pub fn record_cycle_and_flush(
        &mut self,
        name: &str,
        kind: ArtifactKind,
        record: CycleRecord,
    ) -> Result<()> {
        self.record_cycle(name, kind, record);
        self.flush()
    }

    pub(crate) fn record_cycle_at(
        &mut self,
        name: &str,
        kind: ArtifactKind,
        record: CycleRecord,
        now: i64,
    ) {
        let CycleRecord {
            revision,
            completion_state: next,
            status,
            message,
        } = record;
        let message = message.filter(|m| !m.is_empty());

        let Some(cycle) = self
            .document
            .update_cycles
            .iter_mut()
            .find(|c| c.is(name, kind))
        else {
            debug!(artifact = name, %kind, ?next, "opening first update cycle");
            self.document.update_cycles.push(UpdateCycle {
                artifact_name: name.to_owned(),
                artifact_kind: kind,
                revision,
                timestamp: now,
                completion_state: next,
                status,
                message,
            });
            return;
        };

        if cycle.is_closed_for(next) {
            debug!(artifact = name, %kind, ?next, "opening new update cycle");
            cycle.revision = revision;
            cycle.timestamp = now;
            cycle.completion_state = next;
            cycle.status = status;
            cycle.message = message;
            return;
        }

        let opens_rollback = cycle.completion_state == Some(CompletionState::Confirmed)
            && next == Some(CompletionState::RolledBack);
        if opens_rollback {
            if revision.is_some() {
                cycle.revision = revision;
            }
            cycle.timestamp = now;
            cycle.message = message;
        } else {
            if cycle.revision.is_none() {
                cycle.revision = revision;
            }
            if cycle.message.is_none() {
                cycle.message = message;
            }
        }
        if let Some(next) = next {
            if cycle.completion_state.is_some_and(|current| next < current) {
                warn!(
                    artifact = name,
                    %kind,
                    current = ?cycle.completion_state,
                    %next,
                    "update cycle moving backwards"
                );
            }
            cycle.completion_state = Some(next);
        }
        cycle.status = status;
    }
}
