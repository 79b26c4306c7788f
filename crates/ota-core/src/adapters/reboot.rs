//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "System reboot through a configured command."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::convert::Infallible;

use tracing::warn;

use crate::error::{Result, UpdateError};
use crate::platform::Rebooter;
use crate::system::{command_line, run_tool};

/// Reboots the device by running a command such as `reboot --force`.
#[derive(Debug, Clone)]
pub struct CommandRebooter {
    command: String,
}

impl CommandRebooter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Rebooter for CommandRebooter {
    fn reboot(&self) -> Result<Infallible> {
        warn!(command = %self.command, "rebooting system");
        run_tool("reboot", &mut command_line(&self.command)?).map_err(|err| {
            UpdateError::external("reboot", format!("Failed to reboot system: {}", err.detail()))
        })?;
        Err(UpdateError::RebootPending)
    }
}
