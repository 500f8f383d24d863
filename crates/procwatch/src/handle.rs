//! Process handle - lifecycle record of one supervised command

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    config::ProcessConfig,
    error::{ProcessError, Result},
    killer::{self, KillReport},
    launcher::{self, Launch},
    output::OutputStream,
    resolver,
    token::Token,
};

/// Exit status recorded for a killed process whose wrapper left no status
pub const KILLED_EXIT_STATUS: i32 = 128 + 15;

/// Exit status recorded when the wrapper left no status and was not killed
pub const UNKNOWN_EXIT_STATUS: i32 = -1;

/// Lifecycle state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Launched, not yet observed in the process table
    Created,
    /// Last scan found the process
    Running,
    /// A scan no longer found the process
    Exited,
    /// `kill()` ran against the process
    Killed,
}

/// Supervises one detached command
///
/// The handle never holds an OS-level child handle. Liveness, waiting and
/// killing all go through the spawn token and a fresh process table scan.
///
/// Dropping the handle closes both output streams and removes its scratch
/// directory. It does not stop the process.
#[derive(Debug)]
pub struct ProcessHandle {
    config: ProcessConfig,
    token: Token,
    pid: Option<u32>,
    state: ProcessState,
    exit_status: Option<i32>,
    last_kill: Option<KillReport>,
    status_path: PathBuf,
    stdout: OutputStream,
    stderr: OutputStream,
    // Dropped after the streams above
    scratch: TempDir,
}

impl ProcessHandle {
    /// Validate `config`, launch it detached, and resolve its pid once
    ///
    /// # Examples
    /// ```no_run
    /// use procwatch::{ProcessConfig, ProcessHandle, Redirect};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ProcessConfig::new("sh")
    ///     .args(["-c", "echo hello"])
    ///     .stdout(Redirect::AutoCapture);
    /// let mut handle = ProcessHandle::new(config)?;
    /// handle.wait().await?;
    /// assert_eq!(handle.read_output_lines(), vec!["hello"]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: ProcessConfig) -> Result<Self> {
        config.validate()?;
        let launch = launcher::launch(&config)?;
        let mut handle = Self::from_launch(config, launch);
        handle.is_alive();
        Ok(handle)
    }

    fn from_launch(config: ProcessConfig, launch: Launch) -> Self {
        Self {
            config,
            token: launch.token,
            pid: None,
            state: ProcessState::Created,
            exit_status: None,
            last_kill: None,
            status_path: launch.status_path,
            stdout: OutputStream::new(launch.stdout),
            stderr: OutputStream::new(launch.stderr),
            scratch: launch.scratch,
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Pid found by the most recent scan
    ///
    /// Informational only; liveness is always decided by a new scan.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Report of the last `kill()` that found a live process
    pub fn last_kill(&self) -> Option<&KillReport> {
        self.last_kill.as_ref()
    }

    pub fn stdout_path(&self) -> Option<&Path> {
        self.stdout.path()
    }

    pub fn stderr_path(&self) -> Option<&Path> {
        self.stderr.path()
    }

    /// Scratch directory of the current incarnation
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Scan the process table for this handle's token
    pub fn is_alive(&mut self) -> bool {
        self.pid = resolver::resolve(self.token.as_str(), false);
        self.state = match (self.pid, self.state) {
            (_, ProcessState::Killed) => ProcessState::Killed,
            (Some(_), _) => ProcessState::Running,
            (None, _) => ProcessState::Exited,
        };
        self.pid.is_some()
    }

    /// Block until the process is gone, then record its exit status
    ///
    /// Returns immediately if the process is already gone. Unbounded unless
    /// the configuration sets `wait_timeout`.
    pub async fn wait(&mut self) -> Result<()> {
        match self.config.wait_timeout {
            Some(timeout) => self.wait_timeout(timeout).await,
            None => {
                self.poll_until_gone().await;
                Ok(())
            }
        }
    }

    /// `wait()` with an explicit bound
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.poll_until_gone())
            .await
            .map_err(|_| ProcessError::Timeout {
                millis: timeout.as_millis() as u64,
            })
    }

    async fn poll_until_gone(&mut self) {
        let interval = self.config.poll_interval;
        while self.is_alive() {
            sleep(interval).await;
        }
        self.record_exit_status();
    }

    fn record_exit_status(&mut self) {
        let recorded = std::fs::read_to_string(&self.status_path)
            .ok()
            .and_then(|content| content.trim().parse::<i32>().ok());

        let status = match recorded {
            Some(code) => code,
            None if self.state == ProcessState::Killed => KILLED_EXIT_STATUS,
            None => {
                warn!(
                    token = %self.token,
                    path = %self.status_path.display(),
                    "No exit status recorded"
                );
                UNKNOWN_EXIT_STATUS
            }
        };
        debug!(token = %self.token, status, "Recorded exit status");
        self.exit_status = Some(status);
    }

    /// Exit code, available only after `wait()` observed the process finish
    ///
    /// A process that ended without `wait()` being called still reports
    /// `None`: once it is gone from the process table there is nothing left
    /// to query, and this accessor does not try to recover the code.
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    /// Terminate the process and its descendants
    ///
    /// No-op when the process is not found. Never fails.
    pub async fn kill(&mut self, grace: Duration) -> &mut Self {
        if !self.is_alive() {
            debug!(token = %self.token, "Kill skipped, process not found");
            return self;
        }

        if let Some(pid) = self.pid {
            let report = killer::kill_tree(pid, self.token.as_str(), grace).await;
            self.last_kill = Some(report);
            self.state = ProcessState::Killed;
        }
        self.is_alive();
        self
    }

    /// Kill if running, then launch the same configuration under a new token
    pub async fn restart(&mut self) -> Result<&mut Self> {
        if self.is_alive() {
            self.kill(self.config.kill_grace).await;
        }

        let launch = launcher::launch(&self.config)?;
        info!(
            old_token = %self.token,
            new_token = %launch.token,
            command = %self.config.command,
            "Restarting process"
        );

        // Old streams close and the old scratch dir goes away here
        *self = Self::from_launch(self.config.clone(), launch);
        self.is_alive();
        Ok(self)
    }

    /// Complete stdout lines written since the previous read
    pub fn read_output_lines(&mut self) -> Vec<String> {
        let alive = self.stream_alive(true);
        self.stdout.read_lines(alive)
    }

    /// Complete stderr lines written since the previous read
    pub fn read_error_lines(&mut self) -> Vec<String> {
        let alive = self.stream_alive(false);
        self.stderr.read_lines(alive)
    }

    pub fn can_read_output(&mut self) -> bool {
        self.stdout.can_read()
    }

    pub fn can_read_error(&mut self) -> bool {
        self.stderr.can_read()
    }

    /// Process gone and stdout drained
    pub fn is_eof_output(&mut self) -> bool {
        let alive = self.stream_alive(true);
        self.stdout.is_eof(alive)
    }

    /// Process gone and stderr drained
    pub fn is_eof_error(&mut self) -> bool {
        let alive = self.stream_alive(false);
        self.stderr.is_eof(alive)
    }

    pub fn close_output(&mut self) {
        self.stdout.close();
    }

    pub fn close_error(&mut self) {
        self.stderr.close();
    }

    /// Liveness for a stream decision; discarded streams skip the scan
    fn stream_alive(&mut self, stdout: bool) -> bool {
        let stream = if stdout { &self.stdout } else { &self.stderr };
        if stream.is_discarded() {
            return false;
        }
        self.is_alive()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.stdout.close();
        self.stderr.close();
        debug!(token = %self.token, "Released process handle");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected_before_spawn() {
        let err = ProcessHandle::new(ProcessConfig::new("")).unwrap_err();
        assert!(matches!(err, ProcessError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_unknown_command_is_never_alive() {
        let mut handle = ProcessHandle::new(ProcessConfig::new("procwatch_nonexistent_12345"))
            .unwrap();
        handle.wait().await.unwrap();
        assert!(!handle.is_alive());
        assert_eq!(handle.state(), ProcessState::Exited);
        assert_eq!(handle.exit_status(), Some(127));
    }

    #[tokio::test]
    async fn test_discarded_streams() {
        let mut handle = ProcessHandle::new(ProcessConfig::new("true")).unwrap();
        assert!(handle.stdout_path().is_none());
        assert!(handle.read_output_lines().is_empty());
        assert!(!handle.can_read_error());
        assert!(handle.is_eof_output());
        assert!(handle.is_eof_error());
    }
}
