//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Agent configuration model and loader."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_artifacts_path() -> PathBuf {
    PathBuf::from("/var/lib/ota/artifacts.json")
}

fn default_update_status_path() -> PathBuf {
    PathBuf::from("/var/lib/ota/update-status.json")
}

fn default_lock_path() -> PathBuf {
    PathBuf::from("/run/ota/ota.lock")
}

fn default_remote_name() -> String {
    "ota".to_owned()
}

fn default_remote_url() -> String {
    "https://updates.example.invalid".to_owned()
}

fn default_distro_name() -> String {
    "os".to_owned()
}

fn default_reboot_command() -> String {
    "reboot --force".to_owned()
}

fn default_max_reboot_failures() -> u32 {
    3
}

fn default_bootloader_print_command() -> String {
    "fw_printenv".to_owned()
}

fn default_bootloader_set_command() -> String {
    "fw_setenv".to_owned()
}

fn default_app_repo_path() -> PathBuf {
    PathBuf::from("/var/lib/ota/apps/repo")
}

fn default_app_deploy_root() -> PathBuf {
    PathBuf::from("/var/lib/ota/apps/deploy")
}

fn default_app_owner() -> Option<u32> {
    Some(1000)
}

fn default_runtime_command() -> String {
    "runc".to_owned()
}

fn default_container_stop_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object for the update agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub os: OsConfig,
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "OTA_CONFIG";
    pub const SYSTEM_CONFIG_PATH: &'static str = "/etc/ota.toml";
    pub const USER_CONFIG_FILE: &'static str = ".ota.toml";

    /// Standard lookup order: an explicit path first, then the user file in the
    /// home directory, then the system-wide file.
    pub fn default_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(path) = explicit {
            candidates.push(path.to_path_buf());
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(Self::USER_CONFIG_FILE));
        }
        candidates.push(PathBuf::from(Self::SYSTEM_CONFIG_PATH));
        candidates
    }

    /// Load configuration from disk, respecting the `OTA_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.general.validate()?;
        self.os.validate()?;
        self.app.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

fn require_absolute(field: &str, path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(anyhow!(
            "{field} must be an absolute path, got {}",
            path.display()
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_artifacts_path")]
    pub artifacts_path: PathBuf,
    #[serde(default = "default_update_status_path")]
    pub update_status_path: PathBuf,
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,
    #[serde(default)]
    pub gpg_verify: bool,
    #[serde(default = "default_remote_name")]
    pub remote_name: String,
    #[serde(default = "default_remote_url")]
    pub remote_url: String,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub stacktrace: bool,
}

impl GeneralConfig {
    fn validate(&self) -> Result<()> {
        require_absolute("general.artifacts_path", &self.artifacts_path)?;
        require_absolute("general.update_status_path", &self.update_status_path)?;
        require_absolute("general.lock_path", &self.lock_path)?;
        if self.remote_name.trim().is_empty() {
            return Err(anyhow!("general.remote_name must not be empty"));
        }
        Ok(())
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            artifacts_path: default_artifacts_path(),
            update_status_path: default_update_status_path(),
            lock_path: default_lock_path(),
            gpg_verify: false,
            remote_name: default_remote_name(),
            remote_url: default_remote_url(),
            verbose: false,
            debug: false,
            stacktrace: false,
        }
    }
}

/// Operating system update settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsConfig {
    #[serde(default = "default_distro_name")]
    pub distro_name: String,
    #[serde(default = "default_reboot_command")]
    pub reboot_command: String,
    /// Hook run between download and apply; receives the revision as `$1`.
    #[serde(default)]
    pub verification_command: Option<String>,
    /// Hook run at boot before an applied revision is confirmed.
    #[serde(default)]
    pub self_test_command: Option<String>,
    #[serde(default = "default_max_reboot_failures")]
    pub max_reboot_failures: u32,
    #[serde(default = "default_bootloader_print_command")]
    pub bootloader_print_command: String,
    #[serde(default = "default_bootloader_set_command")]
    pub bootloader_set_command: String,
}

impl OsConfig {
    fn validate(&self) -> Result<()> {
        if self.distro_name.trim().is_empty() {
            return Err(anyhow!("os.distro_name must not be empty"));
        }
        if self.reboot_command.trim().is_empty() {
            return Err(anyhow!("os.reboot_command must not be empty"));
        }
        if self.max_reboot_failures == 0 {
            return Err(anyhow!("os.max_reboot_failures must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for OsConfig {
    fn default() -> Self {
        Self {
            distro_name: default_distro_name(),
            reboot_command: default_reboot_command(),
            verification_command: None,
            self_test_command: None,
            max_reboot_failures: default_max_reboot_failures(),
            bootloader_print_command: default_bootloader_print_command(),
            bootloader_set_command: default_bootloader_set_command(),
        }
    }
}

/// Containerized application settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_repo_path")]
    pub repo_path: PathBuf,
    #[serde(default = "default_app_deploy_root")]
    pub deploy_root: PathBuf,
    #[serde(default = "default_app_owner")]
    pub uid: Option<u32>,
    #[serde(default = "default_app_owner")]
    pub gid: Option<u32>,
    #[serde(default = "default_runtime_command")]
    pub runtime_command: String,
    #[serde(
        default = "default_container_stop_timeout",
        rename = "container_stop_timeout_secs"
    )]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub container_stop_timeout: Duration,
}

impl AppSection {
    fn validate(&self) -> Result<()> {
        require_absolute("app.repo_path", &self.repo_path)?;
        require_absolute("app.deploy_root", &self.deploy_root)?;
        Ok(())
    }
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            repo_path: default_app_repo_path(),
            deploy_root: default_app_deploy_root(),
            uid: default_app_owner(),
            gid: default_app_owner(),
            runtime_command: default_runtime_command(),
            container_stop_timeout: default_container_stop_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling log file; console-only when absent.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
