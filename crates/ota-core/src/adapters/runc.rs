//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "OCI container runtime adapter driving the runc command line."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

use serde::Deserialize;
use tracing::debug;

use crate::apps::{LOG_ERR_FILE, LOG_OUT_FILE};
use crate::error::{Result, UpdateError};
use crate::platform::{ContainerRuntime, ContainerState};
use crate::system::{read_last_lines, run_tool};

/// Lines of `log.err` quoted when a container fails to start.
const FAILURE_LOG_LINES: usize = 10;

#[derive(Debug, Deserialize)]
struct StateReport {
    status: String,
}

/// Container runtime reached through a runc compatible binary.
#[derive(Debug, Clone)]
pub struct RuncCli {
    program: String,
}

impl RuncCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.program)
    }
}

impl Default for RuncCli {
    fn default() -> Self {
        Self::new("runc")
    }
}

impl ContainerRuntime for RuncCli {
    fn state(&self, id: &str) -> Result<Option<ContainerState>> {
        // `runc state` fails for unknown containers.
        let Ok(report) = run_tool(&self.program, self.command().args(["state", id])) else {
            return Ok(None);
        };
        parse_state(&report).map(Some)
    }

    fn run(&self, id: &str, bundle: &Path) -> Result<()> {
        let create = |name: &str| {
            let path = bundle.join(name);
            File::create(&path).map_err(|err| UpdateError::io_at("create", &path, err))
        };
        let stdout = create(LOG_OUT_FILE)?;
        let stderr = create(LOG_ERR_FILE)?;

        let mut command = self.command();
        command
            .args(["run", "--detach", "--bundle"])
            .arg(bundle)
            .arg(id)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        debug!(?command, "starting container");
        let status = command
            .status()
            .map_err(|err| UpdateError::external(&self.program, format!("unable to launch: {err}")))?;
        if status.success() {
            return Ok(());
        }
        let log = read_last_lines(&bundle.join(LOG_ERR_FILE), FAILURE_LOG_LINES)?;
        Err(UpdateError::external(
            &self.program,
            format!("Failed to create and run '{id}' container: {log}"),
        ))
    }

    fn kill(&self, id: &str) -> Result<()> {
        run_tool(&self.program, self.command().args(["kill", id, "KILL"]))?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        run_tool(&self.program, self.command().args(["delete", id]))?;
        Ok(())
    }
}

fn parse_state(report: &str) -> Result<ContainerState> {
    let report: StateReport = serde_json::from_str(report)
        .map_err(|err| UpdateError::external("runc", format!("unreadable state report: {err}")))?;
    report.status.parse().map_err(|_| {
        UpdateError::external(
            "runc",
            format!("unsupported container status '{}'", report.status),
        )
    })
}
