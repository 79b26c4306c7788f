//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Artifact status store: deployed revisions and lifecycle."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::document::{load_document, save_document, Durability};
use crate::model::{Artifact, ArtifactKind, ArtifactsDocument, LifecycleState};
use crate::{write_back, Result, StoreError};

/// Persisted record of every artifact's deployed/rollback revision and lifecycle state.
#[derive(Debug)]
pub struct ArtifactStatusStore {
    path: PathBuf,
    document: ArtifactsDocument,
}

impl ArtifactStatusStore {
    /// Load the store from `path`, starting empty when the file is missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = load_document(&path)?;
        Ok(Self { path, document })
    }

    /// Open the store, run `op`, and write it back regardless of the outcome.
    pub fn scoped<T, E, F>(path: impl AsRef<Path>, op: F) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
    {
        let mut store = Self::open(path)?;
        let outcome = op(&mut store);
        write_back(outcome, store.save())
    }

    /// Write the whole document back to disk.
    pub fn save(&self) -> Result<()> {
        save_document(&self.path, &self.document, Durability::Buffered)
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records in registration order.
    pub fn artifacts(&self) -> &[Artifact] {
        &self.document.artifacts
    }

    /// Records of a single kind.
    pub fn artifacts_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &Artifact> {
        self.document.artifacts.iter().filter(move |a| a.kind == kind)
    }

    /// Record for `(name, kind)`, if registered.
    pub fn get(&self, name: &str, kind: ArtifactKind) -> Option<&Artifact> {
        self.document.artifacts.iter().find(|a| a.is(name, kind))
    }

    fn get_mut(&mut self, name: &str, kind: ArtifactKind) -> Option<&mut Artifact> {
        self.document.artifacts.iter_mut().find(|a| a.is(name, kind))
    }

    /// Register an artifact or reset an existing registration.
    ///
    /// An existing record gets the new revision and lifecycle state, its status reset
    /// to success and its message cleared. The rollback revision is only replaced when
    /// one is supplied.
    pub fn record_artifact(
        &mut self,
        name: &str,
        kind: ArtifactKind,
        revision: &str,
        rollback_revision: Option<&str>,
        lifecycle_state: LifecycleState,
    ) {
        match self.get_mut(name, kind) {
            Some(artifact) => {
                artifact.deployed_revision = revision.to_owned();
                if let Some(rollback) = rollback_revision {
                    artifact.rollback_revision = Some(rollback.to_owned());
                }
                artifact.lifecycle_state = lifecycle_state;
                artifact.status = true;
                artifact.message = None;
            }
            None => {
                debug!(artifact = name, %kind, revision, "registering artifact");
                self.document.artifacts.push(Artifact::new(
                    name,
                    kind,
                    revision,
                    rollback_revision.map(str::to_owned),
                    lifecycle_state,
                ));
            }
        }
    }

    /// Record a lifecycle transition and/or an operation outcome.
    ///
    /// The retained message is replaced when `lifecycle_state` starts a new lifecycle
    /// segment (clearing it if no message is supplied) or when a non-empty message is
    /// supplied; otherwise it is kept.
    pub fn amend_lifecycle(
        &mut self,
        name: &str,
        kind: ArtifactKind,
        lifecycle_state: Option<LifecycleState>,
        status: bool,
        message: Option<&str>,
    ) -> Result<()> {
        let artifact = self
            .get_mut(name, kind)
            .ok_or_else(|| unregistered("lifecycle status", name, kind))?;
        let message = message.filter(|m| !m.is_empty());
        let new_segment = lifecycle_state
            .is_some_and(|next| artifact.lifecycle_state.initiates_new_lifecycle(next));
        if new_segment || message.is_some() {
            artifact.message = message.map(str::to_owned);
        }
        if let Some(next) = lifecycle_state {
            artifact.lifecycle_state = next;
        }
        artifact.status = status;
        Ok(())
    }

    /// Record a revision change.
    ///
    /// A forward update (`updating`) moves the current revision into the rollback slot.
    /// A revert installs `new_revision` and leaves no further rollback target.
    pub fn amend_revision(
        &mut self,
        name: &str,
        kind: ArtifactKind,
        new_revision: &str,
        updating: bool,
    ) -> Result<()> {
        let artifact = self
            .get_mut(name, kind)
            .ok_or_else(|| unregistered("revision change", name, kind))?;
        if updating {
            let previous = std::mem::replace(&mut artifact.deployed_revision, new_revision.to_owned());
            artifact.rollback_revision = Some(previous).filter(|r| !r.is_empty());
        } else {
            artifact.deployed_revision = new_revision.to_owned();
            artifact.rollback_revision = None;
        }
        Ok(())
    }

    /// Remove the record for `(name, kind)`; returns whether one existed.
    pub fn erase_artifact(&mut self, name: &str, kind: ArtifactKind) -> bool {
        let before = self.document.artifacts.len();
        self.document.artifacts.retain(|a| !a.is(name, kind));
        before != self.document.artifacts.len()
    }
}

fn unregistered(what: &'static str, name: &str, kind: ArtifactKind) -> StoreError {
    StoreError::Unregistered {
        what,
        name: name.to_owned(),
        kind,
    }
}
