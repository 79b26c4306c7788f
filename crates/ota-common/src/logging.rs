//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Tracing initialisation and structured artifact events."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "OTA_LOG";

/// Available log formats for the agent binaries.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Console verbosity requested through flags or configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Quiet,
    Verbose,
    Debug,
}

impl Verbosity {
    /// Combine the `--verbose`/`--debug` switches, the most detailed one wins.
    pub fn from_flags(verbose: bool, debug: bool) -> Self {
        if debug {
            Verbosity::Debug
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Quiet
        }
    }

    fn default_directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Debug => "debug",
        }
    }
}

/// Keeps the background file writer alive; drop it only when the process exits.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops the log file writer"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// * `OTA_LOG` overrides the filter (e.g. `info`, `debug,ota_core=trace`). When unset
///   the standard `RUST_LOG` variable is honoured, finally defaulting to the level
///   implied by `verbosity`.
/// * Console output always goes to stderr so that stdout stays reserved for command
///   output such as the JSON printed by the describe commands.
/// * A daily rolling JSON log file is added when `directory` is configured.
pub fn init_tracing(
    service_name: &str,
    config: &LoggingConfig,
    verbosity: Verbosity,
) -> Result<LogGuard> {
    let fallback = verbosity.default_directive();
    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); defaulting to {} logging",
                LOG_ENV, err, fallback
            );
            EnvFilter::new(fallback)
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
    };

    let console_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let mut guard = LogGuard::default();
    let directory = config
        .directory
        .as_ref()
        .filter(|dir| !dir.as_os_str().is_empty());
    let file_layer = match directory {
        Some(directory) => {
            std::fs::create_dir_all(directory).with_context(|| {
                format!("unable to create log directory {}", directory.display())
            })?;
            let prefix = config
                .file_prefix
                .clone()
                .unwrap_or_else(|| service_name.to_owned());
            let appender = daily(directory, format!("{prefix}.log"));
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard._file = Some(file_guard);
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_timer(fmt::time::UtcTime::rfc_3339())
                    .json()
                    .with_writer(writer)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(service = %service_name, format = %config.format, ?verbosity, "tracing initialised");
    Ok(guard)
}

/// Identity of the artifact an event refers to.
#[derive(Debug, Default, Clone)]
pub struct ArtifactLogContext<'a> {
    pub name: &'a str,
    pub kind: &'a str,
    pub revision: Option<&'a str>,
}

impl<'a> ArtifactLogContext<'a> {
    pub fn new(name: &'a str, kind: &'a str) -> Self {
        Self {
            name,
            kind,
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: &'a str) -> Self {
        self.revision = Some(revision);
        self
    }
}

/// High-level outcome of an artifact operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EventOutcome {
    Success,
    Fault,
}

/// Emit a standardized artifact event with a success/fault outcome.
pub fn log_artifact_event(
    context: &ArtifactLogContext,
    event: &str,
    message: &str,
    outcome: EventOutcome,
) {
    let revision = context.revision.unwrap_or("");
    match outcome {
        EventOutcome::Success => tracing::info!(
            event,
            outcome = %outcome,
            artifact = context.name,
            kind = context.kind,
            revision,
            message = %message
        ),
        EventOutcome::Fault => tracing::error!(
            event,
            outcome = %outcome,
            artifact = context.name,
            kind = context.kind,
            revision,
            message = %message
        ),
    }
}
