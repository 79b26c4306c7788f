//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "binary"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Operating system update commands of the control CLI."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use anyhow::Result;
use clap::{Args, Subcommand};
use ota_core::{Agent, FinalizeOutcome};

/// Operating system commands.
#[derive(Debug, Subcommand)]
pub enum OsCommand {
    /// Download, verify and stage an OS revision, then reboot into it.
    UpdateOs(UpdateOsArgs),
    /// Reboot into the previously deployed OS revision.
    RollBackOs,
    /// Confirm or roll back the OS change that led to the current boot.
    FinalizeOsChange,
}

#[derive(Debug, Args)]
pub struct UpdateOsArgs {
    /// Revision to install.
    #[arg(short, long, value_name = "REVISION")]
    pub revision: String,
    /// Boot attempts of the new revision before the bootloader falls back.
    #[arg(short, long, value_name = "COUNT")]
    pub max_reboot_failures: Option<u32>,
}

/// Execute the supplied OS command.
pub fn run(command: OsCommand, agent: &Agent) -> Result<()> {
    let manager = agent.os_manager();
    match command {
        OsCommand::UpdateOs(args) => match manager.update(&args.revision, args.max_reboot_failures)? {},
        OsCommand::RollBackOs => match manager.roll_back()? {},
        OsCommand::FinalizeOsChange => {
            let message = match manager.finalize()? {
                FinalizeOutcome::NothingToDo => "No OS change to finalize",
                FinalizeOutcome::Confirmed => "OS update confirmed",
                FinalizeOutcome::RolledBack => "OS rollback completed",
            };
            println!("{message}");
            Ok(())
        }
    }
}
