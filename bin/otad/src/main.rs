//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "binary"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Binary entrypoint for the boot-time update agent."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use ota_common::{init_tracing, AppConfig, VersionInfo, Verbosity};
use ota_core::{Agent, UpdateError};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Finalize the pending OS change and start applications at boot",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Log progress information")]
    verbose: bool,

    #[arg(short, long, help = "Log debugging information")]
    debug: bool,

    #[arg(long, help = "Only finalize the OS change, leave applications alone")]
    skip_apps: bool,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return ExitCode::SUCCESS;
    }

    match run(&cli, &version) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err)
            if err
                .downcast_ref::<UpdateError>()
                .is_some_and(UpdateError::is_reboot_pending) =>
        {
            println!("System is rebooting");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, version: &VersionInfo) -> Result<()> {
    let candidates = AppConfig::default_candidates(cli.config.as_deref());
    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    let verbosity = Verbosity::from_flags(
        cli.verbose || config.general.verbose,
        cli.debug || config.general.debug,
    );
    let _log = init_tracing("otad", &config.logging, verbosity)?;
    info!(version = %version.banner(), config = %loaded.source.display(), "update agent starting");

    let agent = Agent::from_config(&config);
    agent.lock().context("unable to start update agent")?;

    let mut failures = Vec::new();
    match agent.os_manager().finalize() {
        Ok(outcome) => info!(?outcome, "OS change finalized"),
        Err(err) if err.is_reboot_pending() => return Err(err.into()),
        Err(err) => {
            error!(error = %err.chain_message(), "OS finalization failed");
            failures.push(err.chain_message());
        }
    }

    if cli.skip_apps {
        info!("application deployment skipped");
    } else if let Err(err) = agent.apps().deploy_all() {
        error!(error = %err.chain_message(), "application deployment failed");
        failures.push(err.chain_message());
    }

    if failures.is_empty() {
        info!("update agent finished");
        Ok(())
    } else {
        Err(anyhow!(failures.join("; ")))
    }
}
