//! ---
//! ota_section: "05-networking-external-interfaces"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Process, hook, and file helpers shared by adapters and managers."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::error::{Result, UpdateError};
use crate::platform::{HookOutcome, HookRunner};

/// Run a tool to completion and return its stdout, mapping failures to
/// [`UpdateError::External`].
pub fn run_tool(tool: &str, command: &mut Command) -> Result<String> {
    debug!(?command, "launching subprocess");
    let output = command
        .output()
        .map_err(|err| UpdateError::external(tool, format!("unable to launch: {err}")))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(UpdateError::external(tool, process_outcome(&output)))
    }
}

/// Build a [`Command`] from a configured command line using shell quoting rules.
pub fn command_line(line: &str) -> Result<Command> {
    let words = shell_words::split(line)
        .map_err(|err| UpdateError::Precondition(format!("invalid command line '{line}': {err}")))?;
    let (program, args) = words
        .split_first()
        .ok_or_else(|| UpdateError::Precondition("empty command line".to_owned()))?;
    let mut command = Command::new(program);
    command.args(args);
    Ok(command)
}

/// Trimmed stderr, else trimmed stdout, else the exit code for failed processes.
pub fn process_outcome(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        return stderr.trim().to_owned();
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        return stdout.trim().to_owned();
    }
    match output.status.code() {
        Some(code) if !output.status.success() => format!("Exit code {code}"),
        None => "terminated by signal".to_owned(),
        _ => String::new(),
    }
}

/// Hook runner spawning the configured command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellHookRunner;

impl HookRunner for ShellHookRunner {
    fn run(&self, title: &str, command: Option<&str>, args: &[&str]) -> HookOutcome {
        let Some(command) = command.filter(|c| !c.trim().is_empty()) else {
            return HookOutcome::skipped();
        };
        info!(hook = title, "running hook");

        let words = match shell_words::split(command) {
            Ok(words) if !words.is_empty() => words,
            Ok(_) => return HookOutcome::skipped(),
            Err(err) => return failed(title, &format!("invalid command line: {err}")),
        };
        let (program, fixed) = (words[0].as_str(), &words[1..]);

        let mut cmd = Command::new(program);
        cmd.args(fixed);
        // `bash -c '...'` maps its first trailing argument to $0; pass the shell name
        // there so that hook arguments land in $1, $2, ...
        if is_shell_script(program, fixed) {
            cmd.arg(program);
        }
        cmd.args(args);

        debug!(?cmd, "launching hook");
        let output = match cmd.output() {
            Ok(output) => output,
            Err(err) => return failed(title, &format!("unable to launch {program}: {err}")),
        };
        let detail = process_outcome(&output);
        if output.status.success() {
            let message = if detail.is_empty() {
                format!("{title} succeeded")
            } else {
                format!("{title} succeeded: {detail}")
            };
            info!("{message}");
            HookOutcome {
                success: true,
                message: Some(message),
            }
        } else {
            failed(title, &detail)
        }
    }
}

fn is_shell_script(program: &str, args: &[String]) -> bool {
    let name = Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(program);
    matches!(name, "sh" | "bash" | "dash" | "ash") && args.iter().any(|arg| arg == "-c")
}

fn failed(title: &str, detail: &str) -> HookOutcome {
    let message = format!("{title} failed: {detail}");
    error!("{message}");
    HookOutcome {
        success: false,
        message: Some(message),
    }
}

/// Last `max_lines` lines of a text file, ignoring trailing whitespace. A missing or
/// empty file yields an empty string.
pub fn read_last_lines(path: &Path, max_lines: usize) -> Result<String> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(err) => return Err(UpdateError::io_at("read", path, err)),
    };
    let text = String::from_utf8_lossy(&content);
    let text = text.trim_end();
    if max_lines == 0 || text.is_empty() {
        return Ok(String::new());
    }
    let start = text
        .rmatch_indices('\n')
        .nth(max_lines - 1)
        .map(|(index, _)| index + 1)
        .unwrap_or(0);
    Ok(text[start..].trim().to_owned())
}

/// Change the owner of `root` and everything below it, without following links.
pub fn chown_tree(root: &Path, uid: u32, gid: u32) -> Result<()> {
    debug!(path = %root.display(), uid, gid, "changing ownership of tree");
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            let source = err
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("file system loop"));
            UpdateError::io_at("walk", &path, source)
        })?;
        std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid))
            .map_err(|err| UpdateError::io_at("change owner of", entry.path(), err))?;
    }
    Ok(())
}
