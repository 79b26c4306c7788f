//! ---
//! ota_section: "06-versioning-updates"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Operating system update state machine and its command flows."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
pub mod engine;
pub mod manager;

pub use engine::{OsUpdateEngine, APPLYING_FLAG, REBOOT_FAILURE_CREDIT, ROLLING_BACK_FLAG};
pub use manager::{FinalizeOutcome, OsUpdateManager};
