//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Platform trait implementations backed by system tools."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
//! Thin wrappers around the command line tools of an OSTree/U-Boot/runc device.
//!
//! Each adapter only translates between a [`platform`](crate::platform) trait and
//! one tool invocation; no update logic lives here.

pub mod ostree;
pub mod reboot;
pub mod runc;
pub mod uboot;

pub use ostree::{OstreeRepo, OstreeSysroot};
pub use reboot::CommandRebooter;
pub use runc::RuncCli;
pub use uboot::UBootEnv;
