//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "U-Boot environment adapter built on fw_printenv/fw_setenv."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use tracing::debug;

use crate::error::{Result, UpdateError};
use crate::platform::BootloaderEnv;
use crate::system::{command_line, process_outcome, run_tool};

const TOOL: &str = "bootloader";

/// Bootloader environment accessed through the U-Boot userspace tools.
#[derive(Debug, Clone)]
pub struct UBootEnv {
    print_command: String,
    set_command: String,
}

impl UBootEnv {
    pub fn new(print_command: impl Into<String>, set_command: impl Into<String>) -> Self {
        Self {
            print_command: print_command.into(),
            set_command: set_command.into(),
        }
    }
}

impl BootloaderEnv for UBootEnv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut command = command_line(&self.print_command)?;
        command.args(["-n", key]);
        debug!(?command, "reading bootloader variable");
        let output = command
            .output()
            .map_err(|err| UpdateError::external(TOOL, format!("unable to launch: {err}")))?;
        if output.status.success() {
            let value = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            return Ok(Some(value));
        }
        let detail = process_outcome(&output);
        if is_undefined_variable(&detail) {
            Ok(None)
        } else {
            Err(UpdateError::external(
                TOOL,
                format!("Failed to read '{key}': {detail}"),
            ))
        }
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        let mut command = command_line(&self.set_command)?;
        command.arg(key);
        if let Some(value) = value {
            command.arg(value);
        }
        run_tool(TOOL, &mut command).map_err(|err| {
            UpdateError::external(TOOL, format!("Failed to set '{key}': {}", err.detail()))
        })?;
        Ok(())
    }
}

fn is_undefined_variable(detail: &str) -> bool {
    detail.contains("not defined")
}
