//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Shared primitives for the update agent binaries."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
//! Shared primitives for the OTA update agent.
//! This crate exposes configuration loading, tracing initialisation, artifact
//! event logging, and build version metadata consumed across the workspace.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{AppConfig, AppSection, GeneralConfig, LoadedAppConfig, LoggingConfig, OsConfig};
pub use logging::{
    init_tracing, log_artifact_event, ArtifactLogContext, EventOutcome, LogFormat, Verbosity,
};
pub use version::VersionInfo;
