//! Detached launch through the shell
//!
//! The command runs inside a wrapper shell started as
//! `sh -c '<body>' <token>`, so the token sits verbatim in the wrapper's argv
//! where the resolver can find it. The wrapper is itself started in the
//! background by a short-lived outer shell whose exit is awaited right away;
//! the wrapper is then re-parented to init (or the nearest subreaper) and the
//! caller keeps no child handle.
//!
//! After the command finishes, the wrapper writes `$?` into the exit status
//! file of the scratch directory.

use std::fs::File;
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::{
    config::{ProcessConfig, Redirect},
    error::Result,
    token::Token,
};

/// Captured stdout file name inside the scratch directory
pub const STDOUT_FILE: &str = "stdout.log";
/// Captured stderr file name inside the scratch directory
pub const STDERR_FILE: &str = "stderr.log";
/// Exit status file name inside the scratch directory
pub const EXIT_STATUS_FILE: &str = "exit_status";

/// Everything one launch produced
#[derive(Debug)]
pub struct Launch {
    /// Token embedded in the wrapper's command line
    pub token: Token,
    /// Per-launch scratch directory (captured output, exit status)
    pub scratch: TempDir,
    /// Readable stdout file, None when discarded
    pub stdout: Option<PathBuf>,
    /// Readable stderr file, None when discarded
    pub stderr: Option<PathBuf>,
    /// File the wrapper writes the exit code into
    pub status_path: PathBuf,
}

/// Launch `config` detached from the caller
///
/// Returns as soon as the outer shell has backgrounded the wrapper. A command
/// that cannot be started is not reported here; its token never resolves.
pub fn launch(config: &ProcessConfig) -> Result<Launch> {
    config.validate()?;

    let token = Token::generate();
    let scratch = tempfile::Builder::new().prefix("procwatch-").tempdir()?;
    let status_path = scratch.path().join(EXIT_STATUS_FILE);

    let (stdout_stdio, stdout) = open_target(&config.stdout, scratch.path(), STDOUT_FILE)?;
    let (stderr_stdio, stderr) = open_target(&config.stderr, scratch.path(), STDERR_FILE)?;

    let wrapper = wrapper_command_line(config, &token, &status_path);
    debug!(token = %token, wrapper = %wrapper, "Launching wrapper");

    let mut outer = Command::new(&config.shell);
    outer
        .arg("-c")
        .arg(format!("{} &", wrapper))
        .stdin(Stdio::null())
        .stdout(stdout_stdio)
        .stderr(stderr_stdio)
        .envs(&config.env);

    if let Some(ref dir) = config.working_dir {
        outer.current_dir(dir);
    }

    // Keep terminal-generated signals aimed at the caller away from the wrapper
    #[cfg(unix)]
    outer.process_group(0);

    match outer.status() {
        Ok(status) if status.success() => {
            info!(token = %token, command = %config.command, "Process launched");
        }
        Ok(status) => {
            warn!(
                token = %token,
                command = %config.command,
                status = %status,
                "Launcher shell exited abnormally"
            );
        }
        Err(e) => {
            warn!(
                token = %token,
                command = %config.command,
                error = %e,
                "Failed to start launcher shell"
            );
        }
    }

    Ok(Launch {
        token,
        scratch,
        stdout,
        stderr,
        status_path,
    })
}

/// Open the file backing a redirection target
fn open_target(
    target: &Redirect,
    scratch: &Path,
    capture_name: &str,
) -> Result<(Stdio, Option<PathBuf>)> {
    match target {
        Redirect::Discard => Ok((Stdio::null(), None)),
        Redirect::AutoCapture => {
            let path = scratch.join(capture_name);
            let file = File::create(&path)?;
            Ok((Stdio::from(file), Some(path)))
        }
        Redirect::Path(path) => {
            let file = File::create(path)?;
            Ok((Stdio::from(file), Some(path.clone())))
        }
    }
}

/// Build `sh -c '<command> <args>; record $?' <token>`
pub(crate) fn wrapper_command_line(
    config: &ProcessConfig,
    token: &Token,
    status_path: &Path,
) -> String {
    let invocation = std::iter::once(config.command.as_str())
        .chain(config.args.iter().map(String::as_str))
        .map(shell_words::quote)
        .collect::<Vec<_>>()
        .join(" ");

    let status_path = status_path.to_string_lossy();
    let body = format!(
        "{}\nprintf '%s\\n' \"$?\" > {}",
        invocation,
        shell_words::quote(&status_path)
    );

    let shell = config.shell.to_string_lossy();
    format!(
        "{} -c {} {}",
        shell_words::quote(&shell),
        shell_words::quote(&body),
        shell_words::quote(token.as_str())
    )
}
