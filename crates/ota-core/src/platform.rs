//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Seams towards the external update mechanisms."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
//! Collaborator traits consumed by the update core.
//!
//! All calls block the calling thread; there is no cancellation.

use std::convert::Infallible;
use std::path::Path;

use strum::{Display, EnumString};

use crate::error::Result;

/// Content-addressed store of immutable revisions, organised in branches.
pub trait RevisionStore {
    /// Fetch `revision` of `branch` into the local store.
    fn pull(&self, branch: &str, revision: &str) -> Result<()>;

    /// Materialize `revision` at `destination`, which must not exist yet.
    fn checkout(&self, revision: &str, destination: &Path) -> Result<()>;

    /// Resolve a branch name to its current revision, `None` when unknown.
    fn resolve(&self, reference: &str) -> Result<Option<String>>;

    /// Names of all locally known branches.
    fn list_branches(&self) -> Result<Vec<String>>;
}

/// The deployments of the bootable OS image.
pub trait Sysroot {
    /// Revision the system is currently running.
    fn booted_revision(&self) -> Result<Option<String>>;

    /// Deployment scheduled to become the boot target, if any.
    fn pending_revision(&self) -> Result<Option<String>>;

    /// Deployment the system ran before the booted one, if any.
    fn rollback_revision(&self) -> Result<Option<String>>;

    /// Make `revision` the next boot target.
    fn stage(&self, revision: &str) -> Result<()>;

    /// Remove the pending deployment.
    fn undeploy_pending(&self) -> Result<()>;
}

/// Persistent key/value area that survives reboots.
pub trait BootloaderEnv {
    /// Current value of `key`, `None` when unset.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set `key` to `value`, or unset it when `value` is `None`.
    fn set(&self, key: &str, value: Option<&str>) -> Result<()>;
}

/// Run state reported by the container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Stopped,
}

/// Starts, stops and deletes container instances. Instances are keyed by the
/// application name.
pub trait ContainerRuntime {
    /// State of the instance, `None` when it does not exist.
    fn state(&self, id: &str) -> Result<Option<ContainerState>>;

    /// Create and start a detached instance from `bundle`, capturing its output
    /// into the bundle's log files.
    fn run(&self, id: &str, bundle: &Path) -> Result<()>;

    /// Send SIGKILL to a running instance.
    fn kill(&self, id: &str) -> Result<()>;

    /// Remove a stopped or created instance.
    fn delete(&self, id: &str) -> Result<()>;
}

/// Result of a user supplied hook command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOutcome {
    pub success: bool,
    /// `"<title> succeeded|failed[: detail]"`, `None` when no hook is configured.
    pub message: Option<String>,
}

impl HookOutcome {
    /// Outcome of an unconfigured hook.
    pub fn skipped() -> Self {
        Self {
            success: true,
            message: None,
        }
    }
}

/// Runs verification and self-test hooks.
pub trait HookRunner {
    /// Run `command` with `args` appended. An absent or blank command succeeds.
    fn run(&self, title: &str, command: Option<&str>, args: &[&str]) -> HookOutcome;
}

/// Reboots the device.
pub trait Rebooter {
    /// Request a reboot. Never returns normally: once the request has been issued it
    /// yields [`UpdateError::RebootPending`](crate::UpdateError::RebootPending).
    fn reboot(&self) -> Result<Infallible>;
}
