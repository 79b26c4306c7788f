//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Wires configuration, platform adapters, and stores into the update managers."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ota_common::AppConfig;
use ota_store::LazyStoreLock;

use crate::adapters::ostree::SYSTEM_REPO_PATH;
use crate::adapters::{CommandRebooter, OstreeRepo, OstreeSysroot, RuncCli, UBootEnv};
use crate::apps::AppOrchestrator;
use crate::describe::ArtifactDescriber;
use crate::error::Result;
use crate::os::{OsUpdateEngine, OsUpdateManager};
use crate::platform::{
    BootloaderEnv, ContainerRuntime, HookRunner, Rebooter, RevisionStore, Sysroot,
};
use crate::system::ShellHookRunner;

/// Delay between two container state polls while waiting for a stop.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// External mechanisms the agent drives.
#[derive(Clone)]
pub struct Platform {
    pub os_revisions: Arc<dyn RevisionStore>,
    pub app_revisions: Arc<dyn RevisionStore>,
    pub sysroot: Arc<dyn Sysroot>,
    pub bootloader: Arc<dyn BootloaderEnv>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub hooks: Arc<dyn HookRunner>,
    pub rebooter: Arc<dyn Rebooter>,
}

impl Platform {
    /// OSTree, U-Boot and runc backed platform described by `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let general = &config.general;
        Self {
            os_revisions: Arc::new(OstreeRepo::new(
                SYSTEM_REPO_PATH,
                &general.remote_name,
                &general.remote_url,
                general.gpg_verify,
            )),
            app_revisions: Arc::new(OstreeRepo::new(
                &config.app.repo_path,
                &general.remote_name,
                &general.remote_url,
                general.gpg_verify,
            )),
            sysroot: Arc::new(OstreeSysroot),
            bootloader: Arc::new(UBootEnv::new(
                &config.os.bootloader_print_command,
                &config.os.bootloader_set_command,
            )),
            runtime: Arc::new(RuncCli::new(&config.app.runtime_command)),
            hooks: Arc::new(ShellHookRunner),
            rebooter: Arc::new(CommandRebooter::new(&config.os.reboot_command)),
        }
    }
}

/// Operating system settings used by [`OsUpdateManager`].
#[derive(Debug, Clone)]
pub struct OsSettings {
    pub distro_name: String,
    pub verification_command: Option<String>,
    pub self_test_command: Option<String>,
    pub max_reboot_failures: u32,
}

/// Application settings used by [`AppOrchestrator`].
#[derive(Debug, Clone)]
pub struct AppSettings {
    /// Each application is checked out into `<deploy_root>/<name>`.
    pub deploy_root: PathBuf,
    /// Owner given to checked out bundles, if any.
    pub owner: Option<(u32, u32)>,
    pub stop_timeout: Duration,
    pub poll_interval: Duration,
}

impl AppSettings {
    pub fn bundle_dir(&self, name: &str) -> PathBuf {
        self.deploy_root.join(name)
    }
}

/// Locations of the two persisted stores.
#[derive(Debug, Clone)]
pub struct TrackerPaths {
    pub artifacts: PathBuf,
    pub update_status: PathBuf,
}

/// Entry point of every update operation.
pub struct Agent {
    os: OsSettings,
    apps: AppSettings,
    paths: TrackerPaths,
    lock: LazyStoreLock,
    platform: Platform,
}

impl Agent {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::with_platform(config, Platform::from_config(config))
    }

    /// Agent driving `platform` instead of the system tools.
    pub fn with_platform(config: &AppConfig, platform: Platform) -> Self {
        let owner = match (config.app.uid, config.app.gid) {
            (Some(uid), Some(gid)) => Some((uid, gid)),
            _ => None,
        };
        Self {
            os: OsSettings {
                distro_name: config.os.distro_name.clone(),
                verification_command: config.os.verification_command.clone(),
                self_test_command: config.os.self_test_command.clone(),
                max_reboot_failures: config.os.max_reboot_failures,
            },
            apps: AppSettings {
                deploy_root: config.app.deploy_root.clone(),
                owner,
                stop_timeout: config.app.container_stop_timeout,
                poll_interval: STOP_POLL_INTERVAL,
            },
            paths: TrackerPaths {
                artifacts: config.general.artifacts_path.clone(),
                update_status: config.general.update_status_path.clone(),
            },
            lock: LazyStoreLock::new(&config.general.lock_path),
            platform,
        }
    }

    /// Take the process-wide lock guarding every mutating operation.
    ///
    /// Mutating operations take it on their own; calling this up front only makes
    /// contention fail before any work starts. The lock is held until the agent
    /// is dropped.
    pub fn lock(&self) -> Result<()> {
        self.lock.hold()?;
        Ok(())
    }

    pub fn os_settings(&self) -> &OsSettings {
        &self.os
    }

    pub fn paths(&self) -> &TrackerPaths {
        &self.paths
    }

    pub fn os_manager(&self) -> OsUpdateManager<'_> {
        let platform = &self.platform;
        let engine = OsUpdateEngine::new(
            &self.os.distro_name,
            platform.os_revisions.as_ref(),
            platform.sysroot.as_ref(),
            platform.bootloader.as_ref(),
            platform.rebooter.as_ref(),
        );
        OsUpdateManager::new(
            engine,
            platform.hooks.as_ref(),
            &self.os,
            &self.paths,
            &self.lock,
        )
    }

    pub fn apps(&self) -> AppOrchestrator<'_> {
        AppOrchestrator::new(
            &self.apps,
            &self.paths,
            self.platform.app_revisions.as_ref(),
            self.platform.runtime.as_ref(),
            &self.lock,
        )
    }

    pub fn describer(&self) -> ArtifactDescriber<'_> {
        ArtifactDescriber::new(
            &self.os.distro_name,
            &self.paths,
            self.platform.sysroot.as_ref(),
            self.apps(),
        )
    }
}
