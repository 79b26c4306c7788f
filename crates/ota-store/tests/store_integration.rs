//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "tests"
//! ota_type: "source"
//! ota_scope: "test"
//! ota_description: "On-disk format and write-back behaviour of the stores."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::fs;

use anyhow::{anyhow, Result};
use ota_store::{
    with_trackers, ArtifactKind, ArtifactStatusStore, CompletionState, CycleRecord,
    LifecycleState, StoreError, UpdateCycleTracker,
};
use serde_json::{json, Value};
use tempfile::tempdir;

#[test]
fn artifact_file_matches_documented_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("var/artifacts.json");
    ArtifactStatusStore::scoped(&path, |store| -> Result<(), StoreError> {
        store.record_artifact("os", ArtifactKind::OperatingSystem, "r2", Some("r1"), LifecycleState::Running);
        store.record_artifact("web", ArtifactKind::Application, "a1", None, LifecycleState::Available);
        Ok(())
    })
    .unwrap();

    let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(
        value,
        json!({
            "Artifacts": [
                {
                    "Name": "os",
                    "Kind": "OperatingSystem",
                    "DeployedRevision": "r2",
                    "RollbackRevision": "r1",
                    "LifecycleState": "Running",
                    "Status": true,
                    "Message": ""
                },
                {
                    "Name": "web",
                    "Kind": "Application",
                    "DeployedRevision": "a1",
                    "RollbackRevision": "",
                    "LifecycleState": "Available",
                    "Status": true,
                    "Message": ""
                }
            ]
        })
    );
}

#[test]
fn application_update_then_rollback_keeps_revision() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("update-status.json");
    let kind = ArtifactKind::Application;
    UpdateCycleTracker::scoped(&path, |tracker| -> Result<(), StoreError> {
        tracker.record_cycle("web", kind, CycleRecord::state(CompletionState::Initiated).with_revision("revA"));
        tracker.record_cycle("web", kind, CycleRecord::state(CompletionState::Downloaded));
        tracker.record_cycle("web", kind, CycleRecord::state(CompletionState::Verified));
        tracker.record_cycle("web", kind, CycleRecord::state(CompletionState::Applied));
        tracker.record_cycle(
            "web",
            kind,
            CycleRecord::state(CompletionState::Confirmed).with_message("Application update successfully completed"),
        );
        tracker.record_cycle(
            "web",
            kind,
            CycleRecord::state(CompletionState::RolledBack).with_message("Application rolled back"),
        );
        Ok(())
    })
    .unwrap();

    let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let cycle = &value["UpdateCycles"][0];
    assert_eq!(cycle["ArtifactName"], json!("web"));
    assert_eq!(cycle["ArtifactKind"], json!("Application"));
    assert_eq!(cycle["Revision"], json!("revA"));
    assert_eq!(cycle["CompletionState"], json!("RolledBack"));
    assert_eq!(cycle["Message"], json!("Application rolled back"));
    assert!(cycle["Timestamp"].is_i64());
}

#[test]
fn firmware_initiation_is_recorded_with_blank_message() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("update-status.json");
    UpdateCycleTracker::scoped(&path, |tracker| -> Result<(), StoreError> {
        tracker.record_cycle(
            "bootrom",
            ArtifactKind::Firmware,
            CycleRecord::state(CompletionState::Initiated).with_revision("fw-1"),
        );
        Ok(())
    })
    .unwrap();
    let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["UpdateCycles"][0]["CompletionState"], json!("Initiated"));
    assert_eq!(value["UpdateCycles"][0]["Message"], json!(""));
}

#[test]
fn failed_operation_is_still_written_back() {
    let dir = tempdir().unwrap();
    let artifacts = dir.path().join("artifacts.json");
    let status = dir.path().join("update-status.json");

    let outcome: Result<()> = with_trackers(&artifacts, &status, |store, tracker| {
        store.record_artifact("web", ArtifactKind::Application, "a1", None, LifecycleState::Ready);
        tracker.record_cycle(
            "web",
            ArtifactKind::Application,
            CycleRecord::failure("checkout failed"),
        );
        Err(anyhow!("checkout failed"))
    });
    assert_eq!(outcome.unwrap_err().to_string(), "checkout failed");

    let store = ArtifactStatusStore::open(&artifacts).unwrap();
    assert!(store.get("web", ArtifactKind::Application).is_some());
    let tracker = UpdateCycleTracker::open(&status).unwrap();
    let cycle = tracker.get("web", ArtifactKind::Application).unwrap();
    assert!(!cycle.status);
    assert_eq!(cycle.message.as_deref(), Some("checkout failed"));
}

#[test]
fn documents_survive_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("artifacts.json");
    {
        let mut store = ArtifactStatusStore::open(&path).unwrap();
        store.record_artifact("web", ArtifactKind::Application, "a1", None, LifecycleState::Ready);
        store.amend_revision("web", ArtifactKind::Application, "a2", true).unwrap();
        store
            .amend_lifecycle("web", ArtifactKind::Application, Some(LifecycleState::Running), true, Some("started"))
            .unwrap();
        store.save().unwrap();
    }
    let store = ArtifactStatusStore::open(&path).unwrap();
    let web = store.get("web", ArtifactKind::Application).unwrap();
    assert_eq!(web.deployed_revision, "a2");
    assert_eq!(web.rollback_revision.as_deref(), Some("a1"));
    assert_eq!(web.lifecycle_state, LifecycleState::Running);
    assert_eq!(web.message.as_deref(), Some("started"));
}
