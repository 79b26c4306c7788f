//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "binary"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Status reporting commands of the control CLI."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use anyhow::Result;
use clap::{Args, Subcommand};
use ota_core::Agent;

/// Read-only status reports, printed as JSON.
#[derive(Debug, Subcommand)]
pub enum DescribeCommand {
    /// Print the deployed revision and lifecycle state of every artifact.
    DescribeArtifacts(NamesArgs),
    /// Print the latest update cycle of every artifact.
    DescribeUpdateStatus(NamesArgs),
}

#[derive(Debug, Args)]
pub struct NamesArgs {
    /// Restrict the report to these artifacts.
    #[arg(short, long = "name", value_name = "NAME")]
    pub names: Vec<String>,
}

/// Execute the supplied describe command.
pub fn run(command: DescribeCommand, agent: &Agent) -> Result<()> {
    let describer = agent.describer();
    let report = match command {
        DescribeCommand::DescribeArtifacts(args) => describer.describe_artifacts(&args.names)?,
        DescribeCommand::DescribeUpdateStatus(args) => {
            describer.describe_update_status(&args.names)?
        }
    };
    println!("{report}");
    Ok(())
}
