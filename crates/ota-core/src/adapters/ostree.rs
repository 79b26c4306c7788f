//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "OSTree repository and sysroot adapters."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::process::Command;

use indexmap::IndexSet;
use tracing::debug;

use crate::error::{Result, UpdateError};
use crate::platform::{RevisionStore, Sysroot};
use crate::system::run_tool;

const TOOL: &str = "ostree";
/// Only the requested commit is fetched, not its history.
const PULL_DEPTH: u32 = 1;
/// Repository of the booted sysroot.
pub const SYSTEM_REPO_PATH: &str = "/ostree/repo";

/// An OSTree repository reached through the `ostree` command line tool.
#[derive(Debug, Clone)]
pub struct OstreeRepo {
    repo: PathBuf,
    remote_name: String,
    remote_url: String,
    gpg_verify: bool,
}

impl OstreeRepo {
    pub fn new(
        repo: impl Into<PathBuf>,
        remote_name: impl Into<String>,
        remote_url: impl Into<String>,
        gpg_verify: bool,
    ) -> Self {
        Self {
            repo: repo.into(),
            remote_name: remote_name.into(),
            remote_url: remote_url.into(),
            gpg_verify,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(TOOL);
        command.arg(format!("--repo={}", self.repo.display()));
        command
    }

    fn require_repo(&self) -> Result<()> {
        if self.repo.exists() {
            Ok(())
        } else {
            Err(UpdateError::Store(format!(
                "no revision store available at {}",
                self.repo.display()
            )))
        }
    }

    fn ensure_remote(&self) -> Result<()> {
        debug!(remote = %self.remote_name, url = %self.remote_url, "ensuring remote");
        run_tool(
            TOOL,
            self.command()
                .args(["remote", "add", "--if-not-exists"])
                .arg(format!("--set=gpg-verify={}", self.gpg_verify))
                .args([&self.remote_name, &self.remote_url]),
        )
        .map_err(|err| {
            UpdateError::Store(format!(
                "Failed to add remote '{}' to local revision store: {}",
                self.remote_name,
                err.detail()
            ))
        })?;
        Ok(())
    }

    fn rev_parse(&self, reference: &str) -> Option<String> {
        run_tool(TOOL, self.command().args(["rev-parse", reference]))
            .ok()
            .map(|out| out.trim().to_owned())
            .filter(|rev| !rev.is_empty())
    }
}

impl RevisionStore for OstreeRepo {
    fn pull(&self, branch: &str, revision: &str) -> Result<()> {
        self.require_repo()?;
        self.ensure_remote()?;
        run_tool(
            TOOL,
            self.command()
                .arg("pull")
                .arg(format!("--depth={PULL_DEPTH}"))
                .arg(format!("--commit={revision}"))
                .arg(&self.remote_name)
                .arg(branch),
        )
        .map_err(|err| {
            UpdateError::Store(format!(
                "Unable to pull revision '{revision}' from '{branch}' branch at remote '{}': {}",
                self.remote_name,
                err.detail()
            ))
        })?;
        Ok(())
    }

    fn checkout(&self, revision: &str, destination: &Path) -> Result<()> {
        self.require_repo()?;
        run_tool(
            TOOL,
            self.command()
                .args(["checkout", "--user-mode", "--union-identical", revision])
                .arg(destination),
        )
        .map_err(|err| {
            UpdateError::Store(format!(
                "Unable to check out revision '{revision}': {}",
                err.detail()
            ))
        })?;
        Ok(())
    }

    fn resolve(&self, reference: &str) -> Result<Option<String>> {
        if !self.repo.exists() {
            return Ok(None);
        }
        let remote_ref = format!("{}:{reference}", self.remote_name);
        Ok(self
            .rev_parse(&remote_ref)
            .or_else(|| self.rev_parse(reference)))
    }

    fn list_branches(&self) -> Result<Vec<String>> {
        if !self.repo.exists() {
            return Ok(Vec::new());
        }
        let listing = run_tool(TOOL, self.command().arg("refs"))?;
        Ok(parse_refs(&listing))
    }
}

fn parse_refs(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.split_once(':').map_or(line, |(_, branch)| branch))
        .map(str::to_owned)
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

/// One entry of `ostree admin status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub osname: String,
    pub revision: String,
    pub booted: bool,
}

/// Deployments of the running system, listed newest first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AdminStatus {
    pub deployments: Vec<Deployment>,
}

impl AdminStatus {
    fn booted_index(&self) -> Option<usize> {
        self.deployments.iter().position(|d| d.booted)
    }

    pub fn booted(&self) -> Option<&Deployment> {
        self.booted_index().map(|i| &self.deployments[i])
    }

    /// Deployment listed above the booted one.
    pub fn pending(&self) -> Option<&Deployment> {
        self.booted_index()
            .and_then(|i| i.checked_sub(1))
            .map(|i| &self.deployments[i])
    }

    /// Deployment listed below the booted one.
    pub fn rollback(&self) -> Option<&Deployment> {
        self.booted_index()
            .and_then(|i| self.deployments.get(i + 1))
    }
}

/// Parse the human readable output of `ostree admin status`.
///
/// Deployment lines are indented by two columns (or start with `* ` for the booted
/// one) and read `<osname> <checksum>.<serial> [(annotation)]`; deeper indented
/// detail lines are skipped.
pub fn parse_admin_status(output: &str) -> AdminStatus {
    let deployments = output
        .lines()
        .filter_map(|line| {
            let (booted, rest) = if let Some(rest) = line.strip_prefix("* ") {
                (true, rest)
            } else if let Some(rest) = line.strip_prefix("  ") {
                if rest.starts_with(char::is_whitespace) {
                    return None;
                }
                (false, rest)
            } else {
                return None;
            };
            let mut tokens = rest.split_whitespace();
            let osname = tokens.next()?;
            let checksum = tokens.next()?;
            let revision = checksum.split('.').next()?;
            if revision.is_empty() || !revision.chars().all(|c| c.is_ascii_hexdigit()) {
                return None;
            }
            Some(Deployment {
                osname: osname.to_owned(),
                revision: revision.to_owned(),
                booted,
            })
        })
        .collect();
    AdminStatus { deployments }
}

/// The deployments of the booted sysroot, managed with `ostree admin`.
#[derive(Debug, Clone, Default)]
pub struct OstreeSysroot;

impl OstreeSysroot {
    fn status(&self) -> Result<AdminStatus> {
        let output = run_tool(TOOL, Command::new(TOOL).args(["admin", "status"]))?;
        Ok(parse_admin_status(&output))
    }
}

impl Sysroot for OstreeSysroot {
    fn booted_revision(&self) -> Result<Option<String>> {
        Ok(self.status()?.booted().map(|d| d.revision.clone()))
    }

    fn pending_revision(&self) -> Result<Option<String>> {
        Ok(self.status()?.pending().map(|d| d.revision.clone()))
    }

    fn rollback_revision(&self) -> Result<Option<String>> {
        Ok(self.status()?.rollback().map(|d| d.revision.clone()))
    }

    fn stage(&self, revision: &str) -> Result<()> {
        let status = self.status()?;
        let booted = status.booted().ok_or_else(|| {
            UpdateError::Precondition(
                "Currently running system has not been provisioned through OSTree".to_owned(),
            )
        })?;
        run_tool(
            TOOL,
            Command::new(TOOL)
                .args(["admin", "deploy", "--stage"])
                .arg(format!("--os={}", booted.osname))
                .arg(revision),
        )
        .map_err(|err| {
            UpdateError::external(
                TOOL,
                format!("Failed to stage OS revision '{revision}': {}", err.detail()),
            )
        })?;
        Ok(())
    }

    fn undeploy_pending(&self) -> Result<()> {
        // Index 0 is the deployment listed first, i.e. the pending one.
        run_tool(TOOL, Command::new(TOOL).args(["admin", "undeploy", "0"]))?;
        Ok(())
    }
}
