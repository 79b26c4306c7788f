//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Persisted artifact and update cycle records."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Kind of a managed artifact.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum ArtifactKind {
    /// The operating system image.
    OperatingSystem,
    /// A containerized application.
    Application,
    /// A firmware component.
    Firmware,
}

/// Run-state of an artifact, independent of update progress.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum LifecycleState {
    /// Known but not materialized.
    Available,
    /// Materialized on disk, not started.
    Ready,
    /// Started.
    Running,
    /// Terminated on its own.
    Finished,
}

impl LifecycleState {
    /// Whether moving to `next` starts a fresh lifecycle segment, which drops the
    /// message retained from the previous one.
    pub fn initiates_new_lifecycle(self, next: LifecycleState) -> bool {
        next == LifecycleState::Ready
    }
}

/// Stage reached within one update or rollback attempt, in order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
pub enum CompletionState {
    /// Attempt requested.
    Initiated,
    /// Revision fetched into the local store.
    Downloaded,
    /// Revision passed verification.
    Verified,
    /// Revision staged or checked out.
    Applied,
    /// Revision confirmed as the active one.
    Confirmed,
    /// Attempt reverted to the previous revision.
    RolledBack,
}

fn default_status() -> bool {
    true
}

/// One managed unit and its current deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Artifact {
    /// Identity, unique within its kind.
    pub name: String,
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// Revision currently on disk or active.
    #[serde(default)]
    pub deployed_revision: String,
    /// Immediately prior revision, if any.
    #[serde(default, with = "blank_as_none")]
    pub rollback_revision: Option<String>,
    /// Current run-state.
    pub lifecycle_state: LifecycleState,
    /// Whether the last operation on this artifact succeeded.
    #[serde(default = "default_status")]
    pub status: bool,
    /// Latest note retained across the current lifecycle segment.
    #[serde(default, with = "blank_as_none")]
    pub message: Option<String>,
}

impl Artifact {
    /// Fresh record with a successful status and no message.
    pub fn new(
        name: impl Into<String>,
        kind: ArtifactKind,
        deployed_revision: impl Into<String>,
        rollback_revision: Option<String>,
        lifecycle_state: LifecycleState,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            deployed_revision: deployed_revision.into(),
            rollback_revision,
            lifecycle_state,
            status: true,
            message: None,
        }
    }

    /// Whether this record is keyed by `(name, kind)`.
    pub fn is(&self, name: &str, kind: ArtifactKind) -> bool {
        self.name == name && self.kind == kind
    }
}

/// The in-progress or last completed update/rollback attempt for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateCycle {
    /// Artifact name.
    pub artifact_name: String,
    /// Artifact kind.
    pub artifact_kind: ArtifactKind,
    /// Target revision of the cycle, sticky until the cycle ends.
    #[serde(default, with = "blank_as_none")]
    pub revision: Option<String>,
    /// Cycle start as Unix seconds.
    #[serde(default)]
    pub timestamp: i64,
    /// Stage reached so far.
    #[serde(default, with = "blank_as_none")]
    pub completion_state: Option<CompletionState>,
    /// Whether the attempt is still healthy.
    #[serde(default = "default_status")]
    pub status: bool,
    /// First message recorded in the cycle.
    #[serde(default, with = "blank_as_none")]
    pub message: Option<String>,
}

impl UpdateCycle {
    /// Whether this record is keyed by `(name, kind)`.
    pub fn is(&self, name: &str, kind: ArtifactKind) -> bool {
        self.artifact_name == name && self.artifact_kind == kind
    }

    /// Whether recording `next` must open a new cycle instead of amending this one.
    ///
    /// A cycle is closed once confirmed (unless `next` rolls it back), once rolled
    /// back, or once it failed. An explicit `Initiated` always opens a new cycle.
    pub fn is_closed_for(&self, next: Option<CompletionState>) -> bool {
        !self.status
            || next == Some(CompletionState::Initiated)
            || match self.completion_state {
                Some(CompletionState::RolledBack) => true,
                Some(CompletionState::Confirmed) => next != Some(CompletionState::RolledBack),
                _ => false,
            }
    }
}

/// Top-level layout of the artifact status file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactsDocument {
    /// All artifact records, in registration order.
    #[serde(rename = "Artifacts", default)]
    pub artifacts: Vec<Artifact>,
}

/// Top-level layout of the update cycle file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCyclesDocument {
    /// All cycle records, in first-seen order.
    #[serde(rename = "UpdateCycles", default)]
    pub update_cycles: Vec<UpdateCycle>,
}

/// Optional values are persisted as `""` rather than `null`.
mod blank_as_none {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        match value {
            Some(value) => serializer.collect_str(value),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|err| D::Error::custom(format!("invalid value '{raw}': {err}"))),
        }
    }
}
