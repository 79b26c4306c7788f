//! ---
//! ota_section: "06-versioning-updates"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "OS update, rollback, and post-reboot finalization recorded into the stores."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::convert::Infallible;

use ota_common::{log_artifact_event, ArtifactLogContext, EventOutcome};
use ota_store::{
    with_trackers, ArtifactKind, ArtifactStatusStore, CompletionState, CycleRecord,
    LazyStoreLock, LifecycleState, UpdateCycleTracker,
};
use tracing::{info, warn};

use crate::agent::{OsSettings, TrackerPaths};
use crate::error::{Result, UpdateError};
use crate::os::engine::OsUpdateEngine;
use crate::platform::HookRunner;

/// Title of the hook validating a downloaded revision before it is staged.
pub const VERIFICATION_HOOK: &str = "OS update verification";
/// Title of the hook validating a freshly booted revision.
pub const SELF_TEST_HOOK: &str = "OS self-test";

const KIND: ArtifactKind = ArtifactKind::OperatingSystem;

/// What [`OsUpdateManager::finalize`] found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// No update or rollback was in progress.
    NothingToDo,
    /// The booted revision passed the self-test and was confirmed.
    Confirmed,
    /// The device came back on the previous revision.
    RolledBack,
}

/// OS operations as issued by the command line, with their bookkeeping.
pub struct OsUpdateManager<'a> {
    engine: OsUpdateEngine<'a>,
    hooks: &'a dyn HookRunner,
    settings: &'a OsSettings,
    paths: &'a TrackerPaths,
    lock: &'a LazyStoreLock,
}

impl<'a> OsUpdateManager<'a> {
    pub fn new(
        engine: OsUpdateEngine<'a>,
        hooks: &'a dyn HookRunner,
        settings: &'a OsSettings,
        paths: &'a TrackerPaths,
        lock: &'a LazyStoreLock,
    ) -> Self {
        Self {
            engine,
            hooks,
            settings,
            paths,
            lock,
        }
    }

    fn name(&self) -> &str {
        &self.settings.distro_name
    }

    /// Download, verify and stage `revision`, then reboot into it.
    ///
    /// `max_reboot_failures` defaults to the configured credit. A refused update
    /// leaves the update cycle file untouched.
    pub fn update(&self, revision: &str, max_reboot_failures: Option<u32>) -> Result<Infallible> {
        let credit = max_reboot_failures.unwrap_or(self.settings.max_reboot_failures);
        self.logged("update", Some(revision), || {
            self.engine.check_apply(revision)?;
            self.recorded(|_, cycles| {
                let name = self.name();
                cycles.record_cycle_and_flush(
                    name,
                    KIND,
                    CycleRecord::state(CompletionState::Initiated).with_revision(revision),
                )?;

                self.engine.pull(revision)?;
                cycles.record_cycle(name, KIND, CycleRecord::state(CompletionState::Downloaded));

                let verification = self.hooks.run(
                    VERIFICATION_HOOK,
                    self.settings.verification_command.as_deref(),
                    &[revision],
                );
                if !verification.success {
                    return Err(UpdateError::Hook(
                        verification
                            .message
                            .unwrap_or_else(|| format!("{VERIFICATION_HOOK} failed")),
                    ));
                }
                let mut verified = CycleRecord::state(CompletionState::Verified);
                verified.message = verification.message;
                cycles.record_cycle_and_flush(name, KIND, verified)?;

                self.engine.apply(revision, credit)
            })
        })
    }

    /// Reboot into the previous deployment on request.
    pub fn roll_back(&self) -> Result<Infallible> {
        self.logged("roll back", None, || {
            self.engine.check_roll_back()?;
            self.recorded(|_, cycles| {
                let booted = self.engine.booted_revision()?;
                let mut initiated = CycleRecord::state(CompletionState::Initiated);
                initiated.revision = booted;
                cycles.record_cycle_and_flush(self.name(), KIND, initiated)?;

                self.engine.roll_back()
            })
        })
    }

    /// Settle the update or rollback that led to the current boot.
    ///
    /// Runs once per boot, before applications are deployed. The OS entry of the
    /// artifact status file is refreshed whatever the outcome.
    pub fn finalize(&self) -> Result<FinalizeOutcome> {
        self.logged("finalize update of", None, || {
            self.recorded(|artifacts, cycles| {
                let booted = self.engine.booted_revision()?;
                let outcome = if self.engine.is_applying()? {
                    self.finalize_apply(cycles, booted.as_deref())
                } else if self.engine.is_rolling_back()? {
                    self.finalize_roll_back(cycles, booted.as_deref())
                } else {
                    Ok(FinalizeOutcome::NothingToDo)
                };

                let registered = match &booted {
                    Some(booted) => self.register_booted(artifacts, booted, outcome.as_ref().err()),
                    None => Ok(()),
                };
                let outcome = outcome?;
                registered?;
                Ok(outcome)
            })
        })
    }

    fn register_booted(
        &self,
        artifacts: &mut ArtifactStatusStore,
        booted: &str,
        failure: Option<&UpdateError>,
    ) -> Result<()> {
        let name = self.name();
        let rollback = self.engine.rollback_revision()?;
        artifacts.record_artifact(name, KIND, booted, rollback.as_deref(), LifecycleState::Running);
        if let Some(err) = failure.filter(|err| !err.is_reboot_pending()) {
            artifacts.amend_lifecycle(name, KIND, None, false, Some(&err.chain_message()))?;
        }
        Ok(())
    }

    fn finalize_apply(
        &self,
        cycles: &mut UpdateCycleTracker,
        booted: Option<&str>,
    ) -> Result<FinalizeOutcome> {
        let name = self.name();
        let target = cycles.revision_of(name, KIND).map(str::to_owned);
        if target.is_none() || target.as_deref() != booted {
            // The bootloader fell back before the new revision could be confirmed.
            let target = target.unwrap_or_default();
            if let Err(err) = self.engine.discard() {
                warn!(error = %err, "unable to discard failed OS update");
            }
            return Err(UpdateError::Consistency(format!(
                "Failed to apply OS revision '{target}'"
            )));
        }

        cycles.record_cycle(name, KIND, CycleRecord::state(CompletionState::Applied));
        let self_test = self.hooks.run(
            SELF_TEST_HOOK,
            self.settings.self_test_command.as_deref(),
            &[],
        );
        if !self_test.success {
            let message = self_test
                .message
                .unwrap_or_else(|| format!("{SELF_TEST_HOOK} failed"));
            cycles.record_cycle_and_flush(name, KIND, CycleRecord::failure(&message))?;
            warn!(%message, "rolling back OS update");
            self.engine.roll_back()?;
        }

        self.engine.confirm()?;
        cycles.record_cycle(
            name,
            KIND,
            CycleRecord::state(CompletionState::Confirmed)
                .with_message("OS update successfully completed"),
        );
        info!(revision = booted, "OS update confirmed");
        Ok(FinalizeOutcome::Confirmed)
    }

    fn finalize_roll_back(
        &self,
        cycles: &mut UpdateCycleTracker,
        booted: Option<&str>,
    ) -> Result<FinalizeOutcome> {
        let name = self.name();
        let target = cycles.revision_of(name, KIND).map(str::to_owned);
        if target.is_some() && target.as_deref() == booted {
            let target = target.unwrap_or_default();
            if let Err(err) = self.engine.discard() {
                warn!(error = %err, "unable to discard failed OS rollback");
            }
            return Err(UpdateError::Consistency(format!(
                "Failed to roll back OS revision '{target}'"
            )));
        }

        self.engine.discard()?;
        // A failed cycle is closed, so the rollback record may open a new one.
        let mut rolled_back = CycleRecord::state(CompletionState::RolledBack)
            .with_message("Update rolled back due to application-level or external request");
        rolled_back.revision = target;
        cycles.record_cycle(name, KIND, rolled_back);
        info!(revision = booted, "OS rollback completed");
        Ok(FinalizeOutcome::RolledBack)
    }

    /// Run `op` under the store lock and log its outcome.
    fn logged<T, F>(&self, operation: &'static str, revision: Option<&str>, op: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let name = self.name();
        let kind = KIND.to_string();
        let mut context = ArtifactLogContext::new(name, &kind);
        if let Some(revision) = revision {
            context = context.with_revision(revision);
        }

        let outcome = self.lock.hold().map_err(UpdateError::from).and_then(|_| op());
        match outcome {
            Ok(value) => {
                log_artifact_event(&context, operation, "completed", EventOutcome::Success);
                Ok(value)
            }
            Err(err) if err.is_reboot_pending() => {
                log_artifact_event(&context, operation, "rebooting", EventOutcome::Success);
                Err(err)
            }
            Err(err) => {
                log_artifact_event(&context, operation, &err.chain_message(), EventOutcome::Fault);
                Err(UpdateError::artifact(name, KIND, operation, err))
            }
        }
    }

    /// Run `op` against both stores and record its failure on the update cycle.
    ///
    /// A failure `op` already recorded is kept as is.
    fn recorded<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut ArtifactStatusStore, &mut UpdateCycleTracker) -> Result<T>,
    {
        let name = self.name();
        with_trackers(
            &self.paths.artifacts,
            &self.paths.update_status,
            |artifacts, cycles| {
                let before = cycles.get(name, KIND).cloned();
                let outcome = op(artifacts, cycles);
                if let Err(err) = &outcome {
                    let current = cycles.get(name, KIND);
                    let already_failed =
                        current != before.as_ref() && current.is_some_and(|cycle| !cycle.status);
                    if !err.is_reboot_pending() && !already_failed {
                        cycles.record_cycle(name, KIND, CycleRecord::failure(err.chain_message()));
                    }
                }
                outcome
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::engine::{APPLYING_FLAG, REBOOT_FAILURE_CREDIT, ROLLING_BACK_FLAG};
    use crate::testing::FakePlatform;
    use std::path::Path;

    struct Fixture {
        platform: FakePlatform,
        settings: OsSettings,
        paths: TrackerPaths,
        lock: LazyStoreLock,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(booted: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                platform: FakePlatform::booted(booted),
                settings: OsSettings {
                    distro_name: "os".into(),
                    verification_command: None,
                    self_test_command: None,
                    max_reboot_failures: 3,
                },
                paths: TrackerPaths {
                    artifacts: dir.path().join("artifacts.json"),
                    update_status: dir.path().join("update-status.json"),
                },
                lock: LazyStoreLock::new(dir.path().join("ota.lock")),
                _dir: dir,
            }
        }

        fn manager(&self) -> OsUpdateManager<'_> {
            let engine = OsUpdateEngine::new(
                &self.settings.distro_name,
                self.platform.os_revisions.as_ref(),
                self.platform.sysroot.as_ref(),
                self.platform.bootloader.as_ref(),
                self.platform.rebooter.as_ref(),
            );
            OsUpdateManager::new(
                engine,
                self.platform.hooks.as_ref(),
                &self.settings,
                &self.paths,
                &self.lock,
            )
        }

        fn cycle(&self) -> ota_store::UpdateCycle {
            cycles_at(&self.paths.update_status)
        }
    }

    fn cycles_at(path: &Path) -> ota_store::UpdateCycle {
        UpdateCycleTracker::open(path)
            .unwrap()
            .get("os", KIND)
            .cloned()
            .unwrap()
    }

    #[test]
    fn update_records_verified_and_reboots() {
        let fx = Fixture::new("r1");
        let err = fx.manager().update("r2", None).unwrap_err();
        assert!(err.is_reboot_pending());

        let cycle = fx.cycle();
        assert_eq!(cycle.revision.as_deref(), Some("r2"));
        assert_eq!(cycle.completion_state, Some(CompletionState::Verified));
        assert!(cycle.status);
        assert_eq!(
            fx.platform.bootloader.value(REBOOT_FAILURE_CREDIT).as_deref(),
            Some("3")
        );
        assert_eq!(
            fx.platform.hooks.calls(),
            [(VERIFICATION_HOOK.to_owned(), vec!["r2".to_owned()])]
        );
    }

    #[test]
    fn verification_failure_stops_before_staging() {
        let fx = Fixture::new("r1");
        fx.platform.hooks.fail(VERIFICATION_HOOK, "bad signature");
        let err = fx.manager().update("r2", Some(1)).unwrap_err();
        assert!(!err.is_reboot_pending());
        assert!(err.chain_message().contains("bad signature"), "{err:#}");

        let cycle = fx.cycle();
        assert_eq!(cycle.completion_state, Some(CompletionState::Downloaded));
        assert!(!cycle.status);
        assert_eq!(fx.platform.sysroot.pending(), None);
        assert_eq!(fx.platform.rebooter.reboots(), 0);
    }

    #[test]
    fn refused_update_leaves_no_cycle() {
        let fx = Fixture::new("r1");
        let err = fx.manager().update("r1", None).unwrap_err();
        assert!(err.to_string().contains("failed to update"));
        assert!(err.chain_message().contains("same revision"));
        assert!(!fx.paths.update_status.exists());
        assert!(fx.platform.os_revisions.pulled().is_empty());
    }

    #[test]
    fn refused_update_keeps_the_pending_cycle() {
        let fx = Fixture::new("r1");
        let _ = fx.manager().update("r2", None);
        let err = fx.manager().update("r3", None).unwrap_err();
        assert!(err.chain_message().contains("still about to be applied"));

        let cycle = fx.cycle();
        assert_eq!(cycle.revision.as_deref(), Some("r2"));
        assert_eq!(cycle.completion_state, Some(CompletionState::Verified));
        assert!(cycle.status);
        assert_eq!(fx.platform.rebooter.reboots(), 1);
    }

    #[test]
    fn staging_failure_is_recorded_without_reboot() {
        let fx = Fixture::new("r1");
        fx.platform.sysroot.fail_stage(true);
        let err = fx.manager().update("r2", None).unwrap_err();
        assert!(!err.is_reboot_pending());
        assert!(err.chain_message().contains("Failed to stage OS revision 'r2'"));

        let cycle = fx.cycle();
        assert_eq!(cycle.revision.as_deref(), Some("r2"));
        assert_eq!(cycle.completion_state, Some(CompletionState::Verified));
        assert!(!cycle.status);
        assert!(cycle.message.unwrap().contains("Failed to stage"));
        assert_eq!(fx.platform.bootloader.value(APPLYING_FLAG), None);
        assert_eq!(fx.platform.rebooter.reboots(), 0);
    }

    #[test]
    fn operations_wait_for_the_store_lock() {
        let fx = Fixture::new("r1");
        let other = LazyStoreLock::new(fx.lock.path());
        other.hold().unwrap();

        let err = fx.manager().update("r2", None).unwrap_err();
        assert!(err.chain_message().contains("another update agent instance"));
        assert!(!fx.paths.update_status.exists());
        assert_eq!(fx.platform.rebooter.reboots(), 0);

        drop(other);
        assert_eq!(fx.manager().finalize().unwrap(), FinalizeOutcome::NothingToDo);
        assert!(fx.lock.is_held());
    }

    #[test]
    fn finalize_confirms_booted_target() {
        let fx = Fixture::new("r1");
        fx.platform.sysroot.set_rollback(Some("r0"));
        let _ = fx.manager().update("r2", None);
        fx.platform.sysroot.boot_pending();

        assert_eq!(fx.manager().finalize().unwrap(), FinalizeOutcome::Confirmed);
        let cycle = fx.cycle();
        assert_eq!(cycle.completion_state, Some(CompletionState::Confirmed));
        assert_eq!(cycle.message.as_deref(), Some("OS update successfully completed"));
        assert_eq!(fx.platform.bootloader.value(APPLYING_FLAG), None);

        let artifacts = ArtifactStatusStore::open(&fx.paths.artifacts).unwrap();
        let os = artifacts.get("os", KIND).unwrap();
        assert_eq!(os.deployed_revision, "r2");
        assert_eq!(os.rollback_revision.as_deref(), Some("r1"));
        assert_eq!(os.lifecycle_state, LifecycleState::Running);
    }

    #[test]
    fn failed_self_test_rolls_back() {
        let fx = Fixture::new("r1");
        let _ = fx.manager().update("r2", None);
        fx.platform.sysroot.boot_pending();
        fx.platform.hooks.fail(SELF_TEST_HOOK, "watchdog missing");

        let err = fx.manager().finalize().unwrap_err();
        assert!(err.is_reboot_pending());
        let cycle = fx.cycle();
        assert_eq!(cycle.completion_state, Some(CompletionState::Applied));
        assert!(!cycle.status);
        assert!(cycle.message.unwrap().contains("watchdog missing"));
        assert_eq!(
            fx.platform.bootloader.value(ROLLING_BACK_FLAG).as_deref(),
            Some("1")
        );

        fx.platform.sysroot.boot_rollback();
        assert_eq!(fx.manager().finalize().unwrap(), FinalizeOutcome::RolledBack);
        let cycle = fx.cycle();
        assert_eq!(cycle.completion_state, Some(CompletionState::RolledBack));
        assert_eq!(cycle.revision.as_deref(), Some("r2"));
        assert!(cycle.status);
        assert_eq!(fx.platform.bootloader.value(ROLLING_BACK_FLAG), None);
        assert_eq!(fx.platform.sysroot.pending(), None);
    }

    #[test]
    fn bootloader_fallback_is_a_consistency_failure() {
        let fx = Fixture::new("r1");
        let _ = fx.manager().update("r2", None);
        // The new revision never booted: the device is still on r1.
        let err = fx.manager().finalize().unwrap_err();
        assert!(err.chain_message().contains("Failed to apply OS revision 'r2'"));
        let cycle = fx.cycle();
        assert!(!cycle.status);
        assert_eq!(fx.platform.bootloader.value(APPLYING_FLAG), None);
        assert_eq!(fx.platform.sysroot.pending(), None);
    }

    #[test]
    fn failed_roll_back_after_self_test_keeps_the_cycle() {
        let fx = Fixture::new("r1");
        let _ = fx.manager().update("r2", None);
        fx.platform.sysroot.boot_pending();
        fx.platform.sysroot.set_rollback(None);
        fx.platform.hooks.fail(SELF_TEST_HOOK, "watchdog missing");

        let err = fx.manager().finalize().unwrap_err();
        assert!(!err.is_reboot_pending());
        assert!(err.chain_message().contains("Cannot roll back"));

        let cycle = fx.cycle();
        assert_eq!(cycle.revision.as_deref(), Some("r2"));
        assert_eq!(cycle.completion_state, Some(CompletionState::Applied));
        assert!(!cycle.status);
        assert_eq!(cycle.message.as_deref(), Some("OS self-test failed: watchdog missing"));
        assert_eq!(fx.platform.rebooter.reboots(), 1);
    }

    #[test]
    fn failed_finalize_still_refreshes_os_entry() {
        let fx = Fixture::new("r1");
        let _ = fx.manager().update("r2", None);
        // Bootloader fallback: still on r1.
        fx.manager().finalize().unwrap_err();

        let artifacts = ArtifactStatusStore::open(&fx.paths.artifacts).unwrap();
        let os = artifacts.get("os", KIND).unwrap();
        assert_eq!(os.deployed_revision, "r1");
        assert_eq!(os.lifecycle_state, LifecycleState::Running);
        assert!(!os.status);
        assert!(os
            .message
            .as_deref()
            .unwrap()
            .contains("Failed to apply OS revision 'r2'"));

        assert_eq!(fx.manager().finalize().unwrap(), FinalizeOutcome::NothingToDo);
        let artifacts = ArtifactStatusStore::open(&fx.paths.artifacts).unwrap();
        assert!(artifacts.get("os", KIND).unwrap().status);
    }

    #[test]
    fn roll_back_that_did_not_take_effect_is_a_consistency_failure() {
        let fx = Fixture::new("r2");
        fx.platform.sysroot.set_rollback(Some("r1"));
        let _ = fx.manager().roll_back();
        // The device came back on the revision it tried to leave.
        let err = fx.manager().finalize().unwrap_err();
        assert!(err.chain_message().contains("Failed to roll back OS revision 'r2'"));

        let cycle = fx.cycle();
        assert_eq!(cycle.revision.as_deref(), Some("r2"));
        assert_eq!(cycle.completion_state, Some(CompletionState::Initiated));
        assert!(!cycle.status);
        assert_eq!(fx.platform.bootloader.value(ROLLING_BACK_FLAG), None);
        assert_eq!(fx.platform.bootloader.value(APPLYING_FLAG), None);
    }

    #[test]
    fn roll_back_without_previous_deployment_leaves_no_cycle() {
        let fx = Fixture::new("r1");
        let err = fx.manager().roll_back().unwrap_err();
        assert!(err.chain_message().contains("Cannot roll back"));
        assert!(!fx.paths.update_status.exists());
    }

    #[test]
    fn requested_roll_back_records_booted_revision() {
        let fx = Fixture::new("r2");
        fx.platform.sysroot.set_rollback(Some("r1"));
        let err = fx.manager().roll_back().unwrap_err();
        assert!(err.is_reboot_pending());
        let cycle = fx.cycle();
        assert_eq!(cycle.revision.as_deref(), Some("r2"));
        assert_eq!(cycle.completion_state, Some(CompletionState::Initiated));

        fx.platform.sysroot.boot_rollback();
        assert_eq!(fx.manager().finalize().unwrap(), FinalizeOutcome::RolledBack);
    }

    #[test]
    fn finalize_without_pending_change_only_registers_os() {
        let fx = Fixture::new("r1");
        assert_eq!(fx.manager().finalize().unwrap(), FinalizeOutcome::NothingToDo);
        let artifacts = ArtifactStatusStore::open(&fx.paths.artifacts).unwrap();
        assert_eq!(artifacts.get("os", KIND).unwrap().deployed_revision, "r1");
        assert!(UpdateCycleTracker::open(&fx.paths.update_status)
            .unwrap()
            .cycles()
            .is_empty());
    }
}
