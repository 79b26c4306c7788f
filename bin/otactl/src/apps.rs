//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "binary"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Application commands of the control CLI."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use anyhow::Result;
use clap::{Args, Subcommand};
use ota_core::apps::DEFAULT_LOG_LINES;
use ota_core::{Agent, RunMode};

/// Application commands.
#[derive(Debug, Subcommand)]
pub enum AppCommand {
    /// Deploy every known application and start the auto-run ones.
    DeployApps,
    /// Choose whether an application starts automatically after deployment.
    ConfigureApp(ConfigureArgs),
    /// Start an application.
    RunApp(NameArgs),
    /// Print the latest output of an application.
    ReadAppLogs(LogArgs),
    /// Stop an application.
    HaltApp(NameArgs),
    /// Move an application to another revision.
    UpdateApp(UpdateArgs),
    /// Return an application to its previous revision.
    RollBackApp(NameArgs),
    /// Stop an application and remove it from the device.
    DeleteApp(NameArgs),
}

#[derive(Debug, Args)]
pub struct NameArgs {
    /// Application name.
    #[arg(short, long)]
    pub name: String,
}

#[derive(Debug, Args)]
pub struct ConfigureArgs {
    /// Application name.
    #[arg(short, long)]
    pub name: String,
    /// Run mode: `auto` or `manual`.
    #[arg(short, long)]
    pub mode: RunMode,
}

#[derive(Debug, Args)]
pub struct LogArgs {
    /// Application name.
    #[arg(short, long)]
    pub name: String,
    /// Lines to print from each stream.
    #[arg(short, long, default_value_t = DEFAULT_LOG_LINES)]
    pub lines: usize,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Application name.
    #[arg(short, long)]
    pub name: String,
    /// Revision to install.
    #[arg(short, long, value_name = "REVISION")]
    pub revision: String,
}

/// Execute the supplied application command.
pub fn run(command: AppCommand, agent: &Agent) -> Result<()> {
    let apps = agent.apps();
    match command {
        AppCommand::DeployApps => apps.deploy_all()?,
        AppCommand::ConfigureApp(args) => apps.configure(&args.name, args.mode)?,
        AppCommand::RunApp(args) => {
            let state = apps.run(&args.name)?;
            println!("{}: {state}", args.name);
        }
        AppCommand::ReadAppLogs(args) => {
            let logs = apps.read_logs(&args.name, args.lines)?;
            println!("==> stdout <==\n{}\n==> stderr <==\n{}", logs.stdout, logs.stderr);
        }
        AppCommand::HaltApp(args) => apps.halt(&args.name)?,
        AppCommand::UpdateApp(args) => apps.update(&args.name, &args.revision)?,
        AppCommand::RollBackApp(args) => apps.roll_back(&args.name)?,
        AppCommand::DeleteApp(args) => apps.delete(&args.name)?,
    }
    Ok(())
}
