//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Update orchestration: OS engine, application orchestrator, describers."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
//! Update orchestration core of the OTA agent.
//!
//! The crate drives the OS update state machine ([`os::OsUpdateEngine`],
//! [`os::OsUpdateManager`]) and the containerized applications ([`apps::AppOrchestrator`])
//! against the persisted stores of `ota-store`. Every external mechanism (revision
//! store, sysroot, bootloader environment, container runtime, hooks, reboot) is
//! consumed through the traits in [`platform`]; [`adapters`] wraps the usual
//! command line tools behind them.

pub mod adapters;
pub mod agent;
pub mod apps;
pub mod describe;
pub mod error;
pub mod os;
pub mod platform;
pub mod system;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use agent::{Agent, AppSettings, OsSettings, Platform, TrackerPaths};
pub use apps::{AppLogs, AppOrchestrator, RunMode};
pub use describe::ArtifactDescriber;
pub use error::{Result, UpdateError};
pub use os::{FinalizeOutcome, OsUpdateEngine, OsUpdateManager};
pub use platform::{
    BootloaderEnv, ContainerRuntime, ContainerState, HookOutcome, HookRunner, Rebooter,
    RevisionStore, Sysroot,
};
