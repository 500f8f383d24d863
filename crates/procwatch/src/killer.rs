//! Escalating process tree termination
//!
//! Launched processes are re-parented away from the caller, so signalling a
//! single pid would leave its children running. The protocol signals the
//! descendants first, then the process itself:
//!
//! 1. SIGTERM every descendant
//! 2. wait `grace`
//! 3. SIGKILL every descendant that is still the same process, plus any that
//!    appeared under the process meanwhile
//! 4. SIGTERM the process
//! 5. wait `grace`
//! 6. SIGKILL the process if the token still resolves to it
//!
//! Every signal is best effort. A target that is already gone, or one we may
//! not signal, is logged and skipped.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::resolver::{self, ProcessTable};

/// What a kill run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillReport {
    /// Main pid the protocol ran against
    pub pid: u32,
    /// Descendants signalled, in discovery order
    pub descendants: Vec<u32>,
    /// Number of signals the OS accepted
    pub delivered: usize,
}

/// Deliver `signal` to `pid`, reporting whether the OS accepted it
///
/// Pid 0 and values outside the positive `pid_t` range address process
/// groups, so they are never signalled.
pub fn send_signal(pid: u32, signal: Signal) -> bool {
    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => {
            debug!(pid = %pid, "Refusing to signal non-process pid");
            return false;
        }
    };

    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => {
            debug!(pid = %pid, signal = ?signal, "Sent signal");
            true
        }
        Err(Errno::ESRCH) => {
            debug!(pid = %pid, signal = ?signal, "Process already exited");
            false
        }
        Err(e) => {
            debug!(pid = %pid, signal = ?signal, error = %e, "Failed to send signal");
            false
        }
    }
}

/// Run the termination protocol against `pid` and its descendants
///
/// `token` guards the last step: the forceful signal is only sent while the
/// token still resolves to `pid`, so a recycled pid is never hit.
pub async fn kill_tree(pid: u32, token: &str, grace: Duration) -> KillReport {
    debug!(pid = %pid, grace = ?grace, "Killing process tree");

    let mut report = KillReport {
        pid,
        ..KillReport::default()
    };

    let before = ProcessTable::snapshot();
    report.descendants = before.descendants(pid);
    for &child in &report.descendants {
        report.delivered += usize::from(send_signal(child, Signal::SIGTERM));
    }

    sleep(grace).await;

    let after = ProcessTable::snapshot();
    for child in escalation_targets(&before, &after, pid, token) {
        if !report.descendants.contains(&child) {
            report.descendants.push(child);
        }
        report.delivered += usize::from(send_signal(child, Signal::SIGKILL));
    }

    report.delivered += usize::from(send_signal(pid, Signal::SIGTERM));

    sleep(grace).await;

    if resolver::resolve(token, false) == Some(pid) {
        report.delivered += usize::from(send_signal(pid, Signal::SIGKILL));
    }

    info!(
        pid = %pid,
        descendants = report.descendants.len(),
        delivered = report.delivered,
        "Process tree killed"
    );
    report
}

/// Descendants that get the forceful signal after the grace period
///
/// A descendant recorded in `before` still qualifies when `after` shows the
/// same argv under the same parent, or under a new parent because the old one
/// exited and it was re-parented. Anything else at that pid is a stranger
/// that reused it. Descendants that appeared meanwhile are only taken while
/// `pid` is still marked by `token`.
pub(crate) fn escalation_targets(
    before: &ProcessTable,
    after: &ProcessTable,
    pid: u32,
    token: &str,
) -> Vec<u32> {
    let mut targets: Vec<u32> = before
        .descendants(pid)
        .into_iter()
        .filter(|&child| {
            let (Some(old), Some(new)) = (before.get(child), after.get(child)) else {
                return false;
            };
            let reparented = old.parent.map_or(true, |parent| !after.contains(parent));
            old.cmd == new.cmd && (old.parent == new.parent || reparented)
        })
        .collect();

    if after.find_token(token, false) == Some(pid) {
        for child in after.descendants(pid) {
            if !targets.contains(&child) {
                targets.push(child);
            }
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ProcessEntry;

    const TOKEN: &str = "procwatch-0123456789abcdef0123456789abcdef";

    fn before() -> ProcessTable {
        ProcessTable::from_entries(vec![
            ProcessEntry::new(1, None, &["/sbin/init"]),
            ProcessEntry::new(40, Some(1), &["/bin/sh", "-c", "x", TOKEN]),
            ProcessEntry::new(41, Some(40), &["sleep", "30"]),
            ProcessEntry::new(42, Some(40), &["/bin/sh", "-c", "x", TOKEN]),
            ProcessEntry::new(43, Some(42), &["cat"]),
        ])
    }

    #[test]
    fn test_escalation_skips_reused_pids() {
        let after = ProcessTable::from_entries(vec![
            ProcessEntry::new(1, None, &["/sbin/init"]),
            ProcessEntry::new(40, Some(1), &["/bin/sh", "-c", "x", TOKEN]),
            // 41 exited and its pid went to an unrelated process
            ProcessEntry::new(41, Some(1), &["vim"]),
            // 42 exited, so 43 was re-parented to init
            ProcessEntry::new(43, Some(1), &["cat"]),
            ProcessEntry::new(44, Some(40), &["sleep", "5"]),
        ]);

        let mut targets = escalation_targets(&before(), &after, 40, TOKEN);
        targets.sort_unstable();
        assert_eq!(targets, vec![43, 44]);
    }

    #[test]
    fn test_escalation_ignores_children_of_recycled_main_pid() {
        let after = ProcessTable::from_entries(vec![
            ProcessEntry::new(1, None, &["/sbin/init"]),
            ProcessEntry::new(40, Some(1), &["postgres"]),
            ProcessEntry::new(41, Some(40), &["postgres: writer"]),
            ProcessEntry::new(45, Some(40), &["postgres: walwriter"]),
        ]);

        assert!(escalation_targets(&before(), &after, 40, TOKEN).is_empty());
    }

    #[test]
    fn test_escalation_keeps_survivors() {
        let mut targets = escalation_targets(&before(), &before(), 40, TOKEN);
        targets.sort_unstable();
        assert_eq!(targets, vec![41, 42, 43]);
    }

    #[test]
    fn test_signal_nonexistent_process() {
        // Above the largest pid_max Linux allows
        assert!(!send_signal(4_194_305, Signal::SIGTERM));
    }

    #[test]
    fn test_refuses_group_addresses() {
        assert!(!send_signal(0, Signal::SIGKILL));
        assert!(!send_signal(u32::MAX, Signal::SIGKILL));
    }

    #[tokio::test]
    async fn test_kill_tree_on_missing_pid_is_noop() {
        let report = kill_tree(4_194_305, "procwatch-absent", Duration::from_millis(10)).await;
        assert_eq!(report.pid, 4_194_305);
        assert!(report.descendants.is_empty());
        assert_eq!(report.delivered, 0);
    }
}
