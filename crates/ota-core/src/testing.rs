//! ---
//! ota_section: "07-testing"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "test"
//! ota_description: "In-memory collaborators for unit and scenario tests."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
//! In-memory implementations of the [`platform`](crate::platform) traits.
//!
//! Each fake keeps its state behind a `parking_lot::Mutex` so tests can hand the
//! same instance to the core and inspect it afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::Infallible;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::agent::Platform;
use crate::error::{Result, UpdateError};
use crate::platform::{
    BootloaderEnv, ContainerRuntime, ContainerState, HookOutcome, HookRunner, Rebooter,
    RevisionStore, Sysroot,
};

/// Revision store whose remote accepts any revision.
#[derive(Debug, Default)]
pub struct FakeRevisionStore {
    branches: Mutex<IndexMap<String, Vec<String>>>,
    pulled: Mutex<Vec<(String, String)>>,
    failing_pulls: Mutex<HashSet<String>>,
    failing_checkouts: Mutex<HashSet<String>>,
    autorun: Mutex<HashSet<String>>,
}

impl FakeRevisionStore {
    /// Make `revision` the head of `branch`.
    pub fn add_revision(&self, branch: &str, revision: &str) {
        self.branches
            .lock()
            .entry(branch.to_owned())
            .or_default()
            .push(revision.to_owned());
    }

    /// Checkouts of `revision` ship the auto-run marker.
    pub fn ship_autorun(&self, revision: &str) {
        self.autorun.lock().insert(revision.to_owned());
    }

    pub fn fail_pull(&self, revision: &str) {
        self.failing_pulls.lock().insert(revision.to_owned());
    }

    pub fn fail_checkout(&self, revision: &str) {
        self.failing_checkouts.lock().insert(revision.to_owned());
    }

    /// `(branch, revision)` pairs pulled so far.
    pub fn pulled(&self) -> Vec<(String, String)> {
        self.pulled.lock().clone()
    }
}

impl RevisionStore for FakeRevisionStore {
    fn pull(&self, branch: &str, revision: &str) -> Result<()> {
        if self.failing_pulls.lock().contains(revision) {
            return Err(UpdateError::Store(format!(
                "Unable to pull revision '{revision}' from '{branch}' branch"
            )));
        }
        let mut branches = self.branches.lock();
        let known = branches.entry(branch.to_owned()).or_default();
        if !known.iter().any(|r| r == revision) {
            known.push(revision.to_owned());
        }
        self.pulled
            .lock()
            .push((branch.to_owned(), revision.to_owned()));
        Ok(())
    }

    fn checkout(&self, revision: &str, destination: &Path) -> Result<()> {
        if self.failing_checkouts.lock().contains(revision) {
            return Err(UpdateError::Store(format!(
                "Unable to check out revision '{revision}'"
            )));
        }
        if destination.exists() {
            return Err(UpdateError::Store(format!(
                "checkout destination {} already exists",
                destination.display()
            )));
        }
        let io = |err| UpdateError::io_at("populate", destination, err);
        fs::create_dir_all(destination).map_err(io)?;
        fs::write(destination.join("REVISION"), revision).map_err(io)?;
        if self.autorun.lock().contains(revision) {
            fs::write(destination.join(crate::apps::AUTORUN_MARKER), "").map_err(io)?;
        }
        Ok(())
    }

    fn resolve(&self, reference: &str) -> Result<Option<String>> {
        Ok(self
            .branches
            .lock()
            .get(reference)
            .and_then(|revisions| revisions.last().cloned()))
    }

    fn list_branches(&self) -> Result<Vec<String>> {
        Ok(self.branches.lock().keys().cloned().collect())
    }
}

#[derive(Debug, Default)]
struct SysrootState {
    booted: Option<String>,
    pending: Option<String>,
    rollback: Option<String>,
    undeploys: usize,
    fail_undeploy: bool,
    fail_stage: bool,
}

/// Sysroot tracking pending, booted, and rollback deployments.
#[derive(Debug, Default)]
pub struct FakeSysroot {
    state: Mutex<SysrootState>,
}

impl FakeSysroot {
    pub fn booted(&self) -> Option<String> {
        self.state.lock().booted.clone()
    }

    pub fn pending(&self) -> Option<String> {
        self.state.lock().pending.clone()
    }

    pub fn rollback(&self) -> Option<String> {
        self.state.lock().rollback.clone()
    }

    pub fn set_booted(&self, revision: Option<&str>) {
        self.state.lock().booted = revision.map(str::to_owned);
    }

    pub fn set_pending(&self, revision: Option<&str>) {
        self.state.lock().pending = revision.map(str::to_owned);
    }

    pub fn set_rollback(&self, revision: Option<&str>) {
        self.state.lock().rollback = revision.map(str::to_owned);
    }

    pub fn fail_undeploy(&self, fail: bool) {
        self.state.lock().fail_undeploy = fail;
    }

    pub fn fail_stage(&self, fail: bool) {
        self.state.lock().fail_stage = fail;
    }

    pub fn undeploys(&self) -> usize {
        self.state.lock().undeploys
    }

    /// Reboot that successfully boots the staged deployment.
    pub fn boot_pending(&self) {
        let mut state = self.state.lock();
        if let Some(pending) = state.pending.take() {
            state.rollback = state.booted.replace(pending);
        }
    }

    /// Reboot in which the bootloader picks the rollback deployment; the abandoned
    /// revision stays deployed above the booted one.
    pub fn boot_rollback(&self) {
        let mut state = self.state.lock();
        if let Some(rollback) = state.rollback.take() {
            state.pending = state.booted.replace(rollback);
        }
    }
}

impl Sysroot for FakeSysroot {
    fn booted_revision(&self) -> Result<Option<String>> {
        Ok(self.booted())
    }

    fn pending_revision(&self) -> Result<Option<String>> {
        Ok(self.pending())
    }

    fn rollback_revision(&self) -> Result<Option<String>> {
        Ok(self.rollback())
    }

    fn stage(&self, revision: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_stage {
            return Err(UpdateError::external(
                "ostree",
                format!("Failed to stage OS revision '{revision}'"),
            ));
        }
        state.pending = Some(revision.to_owned());
        Ok(())
    }

    fn undeploy_pending(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_undeploy {
            return Err(UpdateError::external("ostree", "undeploy refused"));
        }
        state.pending = None;
        state.undeploys += 1;
        Ok(())
    }
}

/// Bootloader environment backed by a map.
#[derive(Debug, Default)]
pub struct FakeBootloader {
    vars: Mutex<BTreeMap<String, String>>,
}

impl FakeBootloader {
    pub fn preset(&self, key: &str, value: &str) {
        self.vars.lock().insert(key.to_owned(), value.to_owned());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.vars.lock().get(key).cloned()
    }
}

impl BootloaderEnv for FakeBootloader {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.value(key))
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        let mut vars = self.vars.lock();
        match value {
            Some(value) => vars.insert(key.to_owned(), value.to_owned()),
            None => vars.remove(key),
        };
        Ok(())
    }
}

/// Container runtime keeping instance states in memory.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    containers: Mutex<BTreeMap<String, ContainerState>>,
    started: Mutex<Vec<String>>,
    failing_runs: Mutex<HashSet<String>>,
}

impl FakeRuntime {
    pub fn set_state(&self, id: &str, state: Option<ContainerState>) {
        let mut containers = self.containers.lock();
        match state {
            Some(state) => containers.insert(id.to_owned(), state),
            None => containers.remove(id),
        };
    }

    pub fn state_of(&self, id: &str) -> Option<ContainerState> {
        self.containers.lock().get(id).copied()
    }

    pub fn fail_run(&self, id: &str) {
        self.failing_runs.lock().insert(id.to_owned());
    }

    /// Ids of every instance started so far, in order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }
}

impl ContainerRuntime for FakeRuntime {
    fn state(&self, id: &str) -> Result<Option<ContainerState>> {
        Ok(self.state_of(id))
    }

    fn run(&self, id: &str, bundle: &Path) -> Result<()> {
        if self.failing_runs.lock().contains(id) {
            return Err(UpdateError::external(
                "runc",
                format!("Failed to create and run '{id}' container: exec format error"),
            ));
        }
        let io = |err| UpdateError::io_at("write logs into", bundle, err);
        fs::write(bundle.join(crate::apps::LOG_OUT_FILE), format!("{id} started\n")).map_err(io)?;
        fs::write(bundle.join(crate::apps::LOG_ERR_FILE), "").map_err(io)?;
        self.containers
            .lock()
            .insert(id.to_owned(), ContainerState::Running);
        self.started.lock().push(id.to_owned());
        Ok(())
    }

    fn kill(&self, id: &str) -> Result<()> {
        let mut containers = self.containers.lock();
        match containers.get_mut(id) {
            Some(state) => {
                *state = ContainerState::Stopped;
                Ok(())
            }
            None => Err(UpdateError::external(
                "runc",
                format!("container '{id}' does not exist"),
            )),
        }
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.containers.lock().remove(id);
        Ok(())
    }
}

/// Hook runner with scripted failures keyed by hook title.
#[derive(Debug, Default)]
pub struct FakeHooks {
    failures: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeHooks {
    pub fn fail(&self, title: &str, detail: &str) {
        self.failures
            .lock()
            .insert(title.to_owned(), detail.to_owned());
    }

    /// `(title, args)` of every hook run so far.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().clone()
    }
}

impl HookRunner for FakeHooks {
    fn run(&self, title: &str, _command: Option<&str>, args: &[&str]) -> HookOutcome {
        self.calls.lock().push((
            title.to_owned(),
            args.iter().map(|a| (*a).to_owned()).collect(),
        ));
        match self.failures.lock().get(title) {
            Some(detail) => HookOutcome {
                success: false,
                message: Some(format!("{title} failed: {detail}")),
            },
            None => HookOutcome::skipped(),
        }
    }
}

/// Rebooter counting reboot requests.
#[derive(Debug, Default)]
pub struct FakeRebooter {
    reboots: Mutex<usize>,
}

impl FakeRebooter {
    pub fn reboots(&self) -> usize {
        *self.reboots.lock()
    }
}

impl Rebooter for FakeRebooter {
    fn reboot(&self) -> Result<Infallible> {
        *self.reboots.lock() += 1;
        Err(UpdateError::RebootPending)
    }
}

/// A complete set of fakes sharing state with the [`Platform`] built from it.
#[derive(Debug, Default, Clone)]
pub struct FakePlatform {
    pub os_revisions: Arc<FakeRevisionStore>,
    pub app_revisions: Arc<FakeRevisionStore>,
    pub sysroot: Arc<FakeSysroot>,
    pub bootloader: Arc<FakeBootloader>,
    pub runtime: Arc<FakeRuntime>,
    pub hooks: Arc<FakeHooks>,
    pub rebooter: Arc<FakeRebooter>,
}

impl FakePlatform {
    /// Device running OS revision `revision`, without any pending change.
    pub fn booted(revision: &str) -> Self {
        let platform = Self::default();
        platform.sysroot.set_booted(Some(revision));
        platform
    }

    pub fn platform(&self) -> Platform {
        Platform {
            os_revisions: self.os_revisions.clone(),
            app_revisions: self.app_revisions.clone(),
            sysroot: self.sysroot.clone(),
            bootloader: self.bootloader.clone(),
            runtime: self.runtime.clone(),
            hooks: self.hooks.clone(),
            rebooter: self.rebooter.clone(),
        }
    }
}
