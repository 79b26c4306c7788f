//! ---
//! ota_section: "06-versioning-updates"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Stage, reboot, confirm, and roll back the OS via bootloader flags."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::convert::Infallible;

use tracing::{info, warn};

use crate::error::{Result, UpdateError};
use crate::platform::{BootloaderEnv, Rebooter, RevisionStore, Sysroot};

/// Set while a staged revision is being booted into.
pub const APPLYING_FLAG: &str = "applying_os_update";
/// Set while the device reboots back into the previous revision.
pub const ROLLING_BACK_FLAG: &str = "rolling_back_os_update";
/// Remaining boot attempts of a new revision before the bootloader falls back.
pub const REBOOT_FAILURE_CREDIT: &str = "os_update_reboot_failure_credit";

/// OS update state machine.
///
/// State lives in the bootloader environment so that it survives the reboots it
/// triggers:
///
/// | applying | rolling back | state        |
/// |----------|--------------|--------------|
/// | unset    | unset        | idle         |
/// | set      | unset        | applying     |
/// | unset    | set          | rolling back |
pub struct OsUpdateEngine<'a> {
    distro_name: &'a str,
    revisions: &'a dyn RevisionStore,
    sysroot: &'a dyn Sysroot,
    bootloader: &'a dyn BootloaderEnv,
    rebooter: &'a dyn Rebooter,
}

impl<'a> OsUpdateEngine<'a> {
    pub fn new(
        distro_name: &'a str,
        revisions: &'a dyn RevisionStore,
        sysroot: &'a dyn Sysroot,
        bootloader: &'a dyn BootloaderEnv,
        rebooter: &'a dyn Rebooter,
    ) -> Self {
        Self {
            distro_name,
            revisions,
            sysroot,
            bootloader,
            rebooter,
        }
    }

    /// Fetch `revision` of the OS branch into the local store.
    pub fn pull(&self, revision: &str) -> Result<()> {
        info!(revision, distro = self.distro_name, "pulling OS revision");
        self.revisions.pull(self.distro_name, revision)
    }

    /// Revision the system is running.
    pub fn booted_revision(&self) -> Result<Option<String>> {
        self.sysroot.booted_revision()
    }

    /// Revision the system ran before the booted one.
    pub fn rollback_revision(&self) -> Result<Option<String>> {
        self.sysroot.rollback_revision()
    }

    pub fn is_applying(&self) -> Result<bool> {
        self.is_set(APPLYING_FLAG)
    }

    pub fn is_rolling_back(&self) -> Result<bool> {
        self.is_set(ROLLING_BACK_FLAG)
    }

    fn is_set(&self, key: &str) -> Result<bool> {
        Ok(self
            .bootloader
            .get(key)?
            .is_some_and(|value| !value.trim().is_empty()))
    }

    /// Refuse to apply `revision` unless the engine is idle and the system runs
    /// another revision.
    pub fn check_apply(&self, revision: &str) -> Result<()> {
        if self.is_applying()? {
            return Err(UpdateError::Precondition(
                "Cannot apply a new OS update while another one is still about to be applied"
                    .to_owned(),
            ));
        }
        if self.is_rolling_back()? {
            return Err(UpdateError::Precondition(
                "Cannot apply a new OS update while another one is still about to be rolled back"
                    .to_owned(),
            ));
        }
        let booted = self.sysroot.booted_revision()?.ok_or_else(|| {
            UpdateError::Precondition(
                "Currently running system has not been provisioned through the revision store"
                    .to_owned(),
            )
        })?;
        if booted == revision {
            return Err(UpdateError::Precondition(
                "Cannot update OS towards the same revision that is already in use".to_owned(),
            ));
        }
        Ok(())
    }

    /// Stage `revision` as the next boot target, arm the bootloader, and reboot.
    ///
    /// Nothing is staged or written when a precondition fails.
    pub fn apply(&self, revision: &str, max_reboot_failures: u32) -> Result<Infallible> {
        info!(revision, max_reboot_failures, "applying OS update");
        self.check_apply(revision)?;

        // Idle flags mean any pending deployment is a leftover of a failed discard.
        if let Some(stale) = self.sysroot.pending_revision()? {
            warn!(revision = %stale, "removing stale pending OS deployment");
            self.sysroot.undeploy_pending()?;
        }
        self.sysroot.stage(revision)?;

        let credit = max_reboot_failures.to_string();
        self.bootloader.set(APPLYING_FLAG, Some("1"))?;
        self.bootloader.set(REBOOT_FAILURE_CREDIT, Some(&credit))?;

        self.rebooter.reboot()
    }

    /// Accept the booted revision and return to idle.
    pub fn confirm(&self) -> Result<()> {
        info!("confirming OS update");
        if !self.is_applying()? {
            return Err(UpdateError::Precondition(
                "Cannot confirm OS update before any such has been applied".to_owned(),
            ));
        }
        self.bootloader.set(APPLYING_FLAG, None)?;
        self.bootloader.set(REBOOT_FAILURE_CREDIT, None)?;
        Ok(())
    }

    /// Reboot into the previous revision.
    ///
    /// The failure credit is exhausted so the bootloader picks the rollback
    /// deployment, and the applying flag is replaced by the rolling-back flag.
    pub fn roll_back(&self) -> Result<Infallible> {
        info!("rolling back OS update");
        self.check_roll_back()?;
        self.bootloader.set(APPLYING_FLAG, None)?;
        self.bootloader.set(REBOOT_FAILURE_CREDIT, Some("0"))?;
        self.bootloader.set(ROLLING_BACK_FLAG, Some("1"))?;

        self.rebooter.reboot()
    }

    /// Refuse to roll back when there is no previous deployment to boot.
    pub fn check_roll_back(&self) -> Result<()> {
        if self.sysroot.rollback_revision()?.is_none() {
            return Err(UpdateError::Precondition(
                "Cannot roll back OS update before any such has been deployed".to_owned(),
            ));
        }
        Ok(())
    }

    /// Leave the rollback (or failed apply) state and remove the abandoned deployment.
    ///
    /// Flags are cleared before the undeploy; an undeploy failure is reported but
    /// leaves the engine idle.
    pub fn discard(&self) -> Result<()> {
        info!("discarding abandoned OS update");
        if !self.is_rolling_back()? && !self.is_applying()? {
            return Err(UpdateError::Precondition(
                "Cannot discard OS update before any such has been rolled back".to_owned(),
            ));
        }
        self.bootloader.set(ROLLING_BACK_FLAG, None)?;
        self.bootloader.set(APPLYING_FLAG, None)?;
        self.bootloader.set(REBOOT_FAILURE_CREDIT, None)?;

        if self.sysroot.pending_revision()?.is_some() {
            self.sysroot.undeploy_pending().map_err(|err| {
                UpdateError::external(
                    "sysroot",
                    format!("Failed to discard rolled back OS update: {}", err.chain_message()),
                )
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;

    fn engine(platform: &FakePlatform) -> OsUpdateEngine<'_> {
        OsUpdateEngine::new(
            "os",
            platform.os_revisions.as_ref(),
            platform.sysroot.as_ref(),
            platform.bootloader.as_ref(),
            platform.rebooter.as_ref(),
        )
    }

    #[test]
    fn apply_stages_arms_and_reboots() {
        let platform = FakePlatform::booted("r1");
        let err = engine(&platform).apply("r2", 3).unwrap_err();
        assert!(err.is_reboot_pending());
        assert_eq!(platform.sysroot.pending(), Some("r2".to_owned()));
        assert_eq!(platform.bootloader.value(APPLYING_FLAG).as_deref(), Some("1"));
        assert_eq!(platform.bootloader.value(REBOOT_FAILURE_CREDIT).as_deref(), Some("3"));
        assert_eq!(platform.rebooter.reboots(), 1);
    }

    #[test]
    fn apply_same_revision_fails_without_side_effects() {
        let platform = FakePlatform::booted("r1");
        let err = engine(&platform).apply("r1", 3).unwrap_err();
        assert!(matches!(err, UpdateError::Precondition(ref m) if m.contains("same revision")));
        assert_eq!(platform.sysroot.pending(), None);
        assert_eq!(platform.bootloader.value(APPLYING_FLAG), None);
        assert_eq!(platform.rebooter.reboots(), 0);
    }

    #[test]
    fn apply_refused_while_applying_or_rolling_back() {
        let platform = FakePlatform::booted("r1");
        platform.bootloader.preset(APPLYING_FLAG, "1");
        let err = engine(&platform).apply("r2", 3).unwrap_err();
        assert!(err.to_string().contains("still about to be applied"));

        let platform = FakePlatform::booted("r1");
        platform.bootloader.preset(ROLLING_BACK_FLAG, "1");
        let err = engine(&platform).apply("r2", 3).unwrap_err();
        assert!(err.to_string().contains("still about to be rolled back"));
        assert_eq!(platform.sysroot.pending(), None);
        assert_eq!(platform.rebooter.reboots(), 0);
    }

    #[test]
    fn apply_replaces_stale_pending_deployment() {
        let platform = FakePlatform::booted("r1");
        platform.sysroot.set_pending(Some("stale"));
        let _ = engine(&platform).apply("r2", 1);
        assert_eq!(platform.sysroot.pending(), Some("r2".to_owned()));
        assert_eq!(platform.sysroot.undeploys(), 1);
    }

    #[test]
    fn staging_failure_leaves_bootloader_untouched() {
        let platform = FakePlatform::booted("r1");
        platform.sysroot.fail_stage(true);
        let err = engine(&platform).apply("r2", 3).unwrap_err();
        assert!(!err.is_reboot_pending());
        assert_eq!(err.to_string(), "ostree: Failed to stage OS revision 'r2'");
        assert_eq!(platform.sysroot.pending(), None);
        assert_eq!(platform.bootloader.value(APPLYING_FLAG), None);
        assert_eq!(platform.bootloader.value(REBOOT_FAILURE_CREDIT), None);
        assert_eq!(platform.rebooter.reboots(), 0);
    }

    #[test]
    fn check_apply_has_no_side_effects() {
        let platform = FakePlatform::booted("r1");
        engine(&platform).check_apply("r2").unwrap();
        platform.bootloader.preset(APPLYING_FLAG, "1");
        assert!(engine(&platform).check_apply("r2").is_err());
        assert_eq!(platform.sysroot.pending(), None);
        assert_eq!(platform.rebooter.reboots(), 0);
    }

    #[test]
    fn confirm_requires_applying() {
        let platform = FakePlatform::booted("r1");
        let err = engine(&platform).confirm().unwrap_err();
        assert!(matches!(err, UpdateError::Precondition(_)));

        platform.bootloader.preset(APPLYING_FLAG, "1");
        platform.bootloader.preset(REBOOT_FAILURE_CREDIT, "3");
        engine(&platform).confirm().unwrap();
        assert!(!engine(&platform).is_applying().unwrap());
        assert_eq!(platform.bootloader.value(REBOOT_FAILURE_CREDIT), None);
    }

    #[test]
    fn roll_back_requires_rollback_deployment() {
        let platform = FakePlatform::booted("r1");
        let err = engine(&platform).roll_back().unwrap_err();
        assert!(matches!(err, UpdateError::Precondition(_)));
        assert_eq!(platform.rebooter.reboots(), 0);
    }

    #[test]
    fn roll_back_switches_flags_and_reboots() {
        let platform = FakePlatform::booted("r2");
        platform.sysroot.set_rollback(Some("r1"));
        platform.bootloader.preset(APPLYING_FLAG, "1");
        let err = engine(&platform).roll_back().unwrap_err();
        assert!(err.is_reboot_pending());
        let engine = engine(&platform);
        assert!(!engine.is_applying().unwrap());
        assert!(engine.is_rolling_back().unwrap());
        assert_eq!(platform.bootloader.value(REBOOT_FAILURE_CREDIT).as_deref(), Some("0"));
    }

    #[test]
    fn discard_clears_flags_even_when_undeploy_fails() {
        let platform = FakePlatform::booted("r1");
        platform.sysroot.set_pending(Some("r2"));
        platform.sysroot.fail_undeploy(true);
        platform.bootloader.preset(ROLLING_BACK_FLAG, "1");
        let err = engine(&platform).discard().unwrap_err();
        assert!(err.to_string().contains("Failed to discard"));
        assert!(!engine(&platform).is_rolling_back().unwrap());
        assert_eq!(platform.sysroot.pending(), Some("r2".to_owned()));
    }

    #[test]
    fn discard_requires_pending_change() {
        let platform = FakePlatform::booted("r1");
        assert!(matches!(
            engine(&platform).discard().unwrap_err(),
            UpdateError::Precondition(_)
        ));
    }
}
