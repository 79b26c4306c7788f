//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "binary"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Control CLI for operators driving OS and application updates."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use ota_common::{init_tracing, AppConfig, VersionInfo, Verbosity};
use ota_core::{Agent, UpdateError};
use tracing::debug;

mod apps;
mod describe;
mod os;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "OTA update agent control utility",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Log progress information")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Log debugging information")]
    debug: bool,

    #[arg(
        short,
        long,
        global = true,
        help = "Print the full cause chain of a failure"
    )]
    stacktrace: bool,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(flatten)]
    Os(os::OsCommand),
    #[command(flatten)]
    Apps(apps::AppCommand),
    #[command(flatten)]
    Describe(describe::DescribeCommand),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return ExitCode::SUCCESS;
    }

    let mut stacktrace = cli.stacktrace;
    let outcome = load_config(&cli).and_then(|config| {
        stacktrace |= config.general.stacktrace;
        execute(cli, &config)
    });

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if is_reboot_pending(&err) => {
            println!("System is rebooting");
            ExitCode::SUCCESS
        }
        Err(err) => {
            if stacktrace {
                eprintln!("Error: {err:?}");
            } else {
                eprintln!("Error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let candidates = AppConfig::default_candidates(cli.config.as_deref());
    AppConfig::load(&candidates)
}

fn execute(cli: Cli, config: &AppConfig) -> Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let verbosity = Verbosity::from_flags(
        cli.verbose || config.general.verbose,
        cli.debug || config.general.debug,
    );
    let _log = init_tracing("otactl", &config.logging, verbosity)?;
    debug!(version = %VersionInfo::current().banner(), ?command, "running command");

    let agent = Agent::from_config(config);
    // Read-only reports run alongside other instances.
    if !matches!(command, Commands::Describe(_)) {
        agent.lock().context("unable to start operation")?;
    }

    match command {
        Commands::Os(cmd) => os::run(cmd, &agent),
        Commands::Apps(cmd) => apps::run(cmd, &agent),
        Commands::Describe(cmd) => describe::run(cmd, &agent),
    }
}

fn is_reboot_pending(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<UpdateError>()
            .is_some_and(UpdateError::is_reboot_pending)
    })
}
