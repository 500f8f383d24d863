//! Error types for process supervision

use std::io;
use thiserror::Error;

/// Process supervision errors
///
/// Only local setup problems surface here. A command that fails to start at
/// the OS level is not an error: its token simply never resolves, and
/// `is_alive()` reports `false` from the first call on.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Rejected configuration, raised before any spawn attempt
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Local I/O failure while preparing a launch (scratch dir, redirection file)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bounded wait elapsed while the process was still present
    #[error("Process still running after {millis}ms")]
    Timeout { millis: u64 },
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
