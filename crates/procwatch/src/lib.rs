//! # procwatch
//!
//! **Purpose**: Launch and supervise detached operating-system processes
//!
//! Processes are started through the shell, fully detached from the caller,
//! and re-identified afterwards by a unique token embedded in their command
//! line. There is no native child handle: liveness, waiting and termination
//! all work by scanning the process table.
//!
//! ## Features
//!
//! - **Detached Launch**: Background start through `sh`, no retained child
//! - **Token Resolution**: Locate the launched process by command line token
//! - **Liveness Polling**: `is_alive()` rescans on every call
//! - **Tree Kill**: SIGTERM→SIGKILL escalation over descendants, then the process
//! - **Output Capture**: Non-blocking line reads with a heuristic end of stream
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use procwatch::{ProcessConfig, ProcessHandle, Redirect};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProcessConfig::new("sh")
//!     .args(["-c", "echo started; sleep 30"])
//!     .stdout(Redirect::AutoCapture);
//!
//! let mut handle = ProcessHandle::new(config)?;
//! assert!(handle.is_alive());
//!
//! for line in handle.read_output_lines() {
//!     println!("{}", line);
//! }
//!
//! handle.kill(Duration::from_millis(100)).await;
//! assert!(!handle.is_alive());
//! # Ok(())
//! # }
//! ```

#[cfg(not(unix))]
compile_error!("procwatch relies on a POSIX shell and Unix signals");

pub mod config;
pub mod error;
pub mod handle;
pub mod killer;
pub mod launcher;
pub mod output;
pub mod resolver;
pub mod token;

pub use config::{ProcessConfig, Redirect};
pub use error::{ProcessError, Result};
pub use handle::{ProcessHandle, ProcessState};
pub use killer::{kill_tree, KillReport};
pub use output::OutputStream;
pub use resolver::{resolve, ProcessEntry, ProcessTable};
pub use token::Token;
