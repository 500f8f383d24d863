//! Process configuration

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProcessError, Result};

/// Default interval between liveness scans in `wait()`
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default grace period between signal escalation steps
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(100);

/// Default POSIX shell used for the indirect launch
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Where a stream of the launched process goes
///
/// Serialized as `"discard"`, `"auto"`, or a path string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Redirect {
    /// Send output to the null device; nothing is readable
    Discard,
    /// Capture into a file inside the handle's scratch directory
    AutoCapture,
    /// Write to this file, truncating it on every launch
    Path(PathBuf),
}

impl Redirect {
    /// Whether reads against this target can ever produce data
    pub fn is_readable(&self) -> bool {
        !matches!(self, Redirect::Discard)
    }
}

impl Default for Redirect {
    fn default() -> Self {
        Redirect::Discard
    }
}

impl From<String> for Redirect {
    fn from(value: String) -> Self {
        match value.as_str() {
            "discard" => Redirect::Discard,
            "auto" => Redirect::AutoCapture,
            _ => Redirect::Path(PathBuf::from(value)),
        }
    }
}

impl From<Redirect> for String {
    fn from(value: Redirect) -> Self {
        match value {
            Redirect::Discard => "discard".to_string(),
            Redirect::AutoCapture => "auto".to_string(),
            Redirect::Path(path) => path.to_string_lossy().into_owned(),
        }
    }
}

impl From<&Path> for Redirect {
    fn from(path: &Path) -> Self {
        Redirect::Path(path.to_path_buf())
    }
}

/// Configuration for launching and supervising a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Executable command
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Standard output target
    pub stdout: Redirect,
    /// Standard error target
    pub stderr: Redirect,
    /// Working directory (None = current dir)
    pub working_dir: Option<PathBuf>,
    /// Environment variables (added to parent env)
    pub env: HashMap<String, String>,
    /// Shell used to start the detached wrapper
    pub shell: PathBuf,
    /// Interval between liveness scans while waiting
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
    /// Grace period used by `restart()` when it has to kill first
    #[serde(rename = "kill_grace_ms", with = "duration_ms")]
    pub kill_grace: Duration,
    /// Upper bound for `wait()` (None = block until the process is gone)
    #[serde(rename = "wait_timeout_ms", with = "optional_duration_ms")]
    pub wait_timeout: Option<Duration>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl ProcessConfig {
    /// Create new process configuration
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: vec![],
            stdout: Redirect::Discard,
            stderr: Redirect::Discard,
            working_dir: None,
            env: HashMap::new(),
            shell: PathBuf::from(DEFAULT_SHELL),
            poll_interval: DEFAULT_POLL_INTERVAL,
            kill_grace: DEFAULT_KILL_GRACE,
            wait_timeout: None,
        }
    }

    /// Load a configuration from TOML; durations are given in milliseconds
    ///
    /// ```
    /// use procwatch::{ProcessConfig, Redirect};
    ///
    /// let config = ProcessConfig::from_toml_str(r#"
    ///     command = "sleep"
    ///     args = ["5"]
    ///     stdout = "auto"
    ///     poll_interval_ms = 50
    /// "#).unwrap();
    /// assert_eq!(config.stdout, Redirect::AutoCapture);
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| ProcessError::InvalidArgument(e.to_string()))
    }

    /// Set command arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the standard output target
    pub fn stdout(mut self, target: Redirect) -> Self {
        self.stdout = target;
        self
    }

    /// Set the standard error target
    pub fn stderr(mut self, target: Redirect) -> Self {
        self.stderr = target;
        self
    }

    /// Set working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Use a different POSIX shell for the launch
    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Set the liveness poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the kill grace period
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Bound `wait()`
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Reject configurations that cannot be launched
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(ProcessError::InvalidArgument(
                "command must not be empty".to_string(),
            ));
        }
        if self.command.contains('\0') {
            return Err(ProcessError::InvalidArgument(
                "command contains a NUL byte".to_string(),
            ));
        }
        if let Some(index) = self.args.iter().position(|arg| arg.contains('\0')) {
            return Err(ProcessError::InvalidArgument(format!(
                "argument {} contains a NUL byte",
                index
            )));
        }
        for (name, target) in [("stdout", &self.stdout), ("stderr", &self.stderr)] {
            if let Redirect::Path(path) = target {
                if path.as_os_str().is_empty() {
                    return Err(ProcessError::InvalidArgument(format!(
                        "{} redirection path must not be empty",
                        name
                    )));
                }
            }
        }
        if self.shell.as_os_str().is_empty() {
            return Err(ProcessError::InvalidArgument(
                "shell must not be empty".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ProcessError::InvalidArgument(
                "poll interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
