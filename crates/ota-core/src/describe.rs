//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "JSON reports of artifact status and update cycles."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use ota_store::{
    Artifact, ArtifactKind, ArtifactStatusStore, ArtifactsDocument, LifecycleState, StoreError,
    UpdateCycleTracker, UpdateCyclesDocument,
};
use serde::Serialize;
use tracing::warn;

use crate::agent::TrackerPaths;
use crate::apps::AppOrchestrator;
use crate::error::Result;
use crate::platform::Sysroot;

/// Read-only views over the persisted stores, completed with live state.
pub struct ArtifactDescriber<'a> {
    distro_name: &'a str,
    paths: &'a TrackerPaths,
    sysroot: &'a dyn Sysroot,
    apps: AppOrchestrator<'a>,
}

impl<'a> ArtifactDescriber<'a> {
    pub fn new(
        distro_name: &'a str,
        paths: &'a TrackerPaths,
        sysroot: &'a dyn Sysroot,
        apps: AppOrchestrator<'a>,
    ) -> Self {
        Self {
            distro_name,
            paths,
            sysroot,
            apps,
        }
    }

    /// Every artifact, the running OS first. An empty `names` selects all of them.
    pub fn artifacts(&self, names: &[String]) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        if let Some(booted) = self.sysroot.booted_revision()? {
            artifacts.push(Artifact::new(
                self.distro_name,
                ArtifactKind::OperatingSystem,
                booted,
                self.sysroot.rollback_revision()?,
                LifecycleState::Running,
            ));
        }

        if self.paths.artifacts.exists() {
            let store = ArtifactStatusStore::open(&self.paths.artifacts)?;
            for artifact in store.artifacts() {
                match artifact.kind {
                    ArtifactKind::OperatingSystem => {}
                    ArtifactKind::Application => artifacts.push(self.refreshed(artifact.clone())),
                    ArtifactKind::Firmware => artifacts.push(artifact.clone()),
                }
            }
        } else {
            for name in self.apps.branches()? {
                let revision = self.apps.branch_head(&name)?.unwrap_or_default();
                let available = Artifact::new(
                    name,
                    ArtifactKind::Application,
                    revision,
                    None,
                    LifecycleState::Available,
                );
                artifacts.push(self.refreshed(available));
            }
        }

        artifacts.retain(|artifact| selected(names, &artifact.name));
        Ok(artifacts)
    }

    /// Update cycles of the selected artifacts. An empty `names` selects all of them.
    pub fn update_cycles(&self, names: &[String]) -> Result<Vec<ota_store::UpdateCycle>> {
        let tracker = UpdateCycleTracker::open(&self.paths.update_status)?;
        Ok(tracker
            .cycles()
            .iter()
            .filter(|cycle| selected(names, &cycle.artifact_name))
            .cloned()
            .collect())
    }

    /// Pretty printed artifact status document.
    pub fn describe_artifacts(&self, names: &[String]) -> Result<String> {
        to_json(&ArtifactsDocument {
            artifacts: self.artifacts(names)?,
        })
    }

    /// Pretty printed update cycle document.
    pub fn describe_update_status(&self, names: &[String]) -> Result<String> {
        to_json(&UpdateCyclesDocument {
            update_cycles: self.update_cycles(names)?,
        })
    }

    fn refreshed(&self, mut artifact: Artifact) -> Artifact {
        match self.apps.get_state(&artifact.name) {
            Ok(state) => artifact.lifecycle_state = state,
            Err(err) => {
                warn!(application = %artifact.name, error = %err, "keeping recorded lifecycle state")
            }
        }
        artifact
    }
}

fn selected(names: &[String], name: &str) -> bool {
    names.is_empty() || names.iter().any(|n| n == name)
}

fn to_json<T: Serialize>(document: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(document).map_err(StoreError::from)?)
}
