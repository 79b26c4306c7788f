//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Error taxonomy of the update core."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::error::Error as StdError;
use std::path::Path;

use ota_store::{ArtifactKind, StoreError};

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Error type for update orchestration.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Revision store unreachable, revision not found, checkout failure.
    #[error("{0}")]
    Store(String),
    /// Operation requested in a state that does not allow it.
    #[error("{0}")]
    Precondition(String),
    /// Bootloader, container runtime, or other system tool failed.
    #[error("{tool}: {message}")]
    External { tool: String, message: String },
    /// A verification or self-test hook reported failure.
    #[error("{0}")]
    Hook(String),
    /// The booted revision contradicts the tracked update cycle.
    #[error("{0}")]
    Consistency(String),
    /// Reading or writing a persisted store failed.
    #[error(transparent)]
    Tracker(#[from] StoreError),
    /// Local file system operation failed.
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    /// A single-artifact operation failed; the failure has been recorded.
    #[error("failed to {operation} {kind} '{name}'")]
    Artifact {
        name: String,
        kind: ArtifactKind,
        operation: &'static str,
        #[source]
        source: Box<UpdateError>,
    },
    /// At least one artifact of a batch failed.
    #[error("failed to {operation} one or several applications (run 'otactl describe-artifacts' to get more details)")]
    Batch {
        operation: &'static str,
        failed: Vec<String>,
    },
    /// A reboot has been requested; the process is about to be terminated.
    #[error("system reboot in progress")]
    RebootPending,
}

impl UpdateError {
    pub(crate) fn external(tool: impl Into<String>, message: impl Into<String>) -> Self {
        UpdateError::External {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        UpdateError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("failed to {action} {}", path.display()), source)
    }

    pub(crate) fn artifact(
        name: &str,
        kind: ArtifactKind,
        operation: &'static str,
        source: UpdateError,
    ) -> Self {
        UpdateError::Artifact {
            name: name.to_owned(),
            kind,
            operation,
            source: Box::new(source),
        }
    }

    /// Whether the error only signals a reboot that is already under way.
    pub fn is_reboot_pending(&self) -> bool {
        matches!(self.root(), UpdateError::RebootPending)
    }

    /// The innermost error once artifact wrappers are peeled off.
    pub fn root(&self) -> &UpdateError {
        match self {
            UpdateError::Artifact { source, .. } => source.root(),
            other => other,
        }
    }

    /// Message without the tool prefix of [`UpdateError::External`].
    pub fn detail(&self) -> String {
        match self {
            UpdateError::External { message, .. } => message.clone(),
            other => other.chain_message(),
        }
    }

    /// One-line message including every cause, as recorded into the stores.
    pub fn chain_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = StdError::source(self);
        while let Some(err) = source {
            let part = err.to_string();
            if !message.ends_with(&part) {
                message.push_str(": ");
                message.push_str(&part);
            }
            source = err.source();
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_message_joins_causes() {
        let err = UpdateError::artifact(
            "web",
            ArtifactKind::Application,
            "update",
            UpdateError::io(
                "failed to remove /apps/web",
                std::io::Error::other("busy"),
            ),
        );
        assert_eq!(
            err.chain_message(),
            "failed to update Application 'web': failed to remove /apps/web: busy"
        );
    }

    #[test]
    fn reboot_pending_is_seen_through_wrappers() {
        let err = UpdateError::artifact(
            "os",
            ArtifactKind::OperatingSystem,
            "update",
            UpdateError::RebootPending,
        );
        assert!(err.is_reboot_pending());
        assert!(!UpdateError::Hook("x".into()).is_reboot_pending());
    }

    #[test]
    fn batch_error_points_to_describe_command() {
        let err = UpdateError::Batch {
            operation: "deploy or run",
            failed: vec!["b".into()],
        };
        assert!(err.to_string().contains("describe-artifacts"));
    }
}
