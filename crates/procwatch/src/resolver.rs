//! Identity resolution through the process table
//!
//! Launched processes are detached, so no native child handle exists to ask
//! whether they are still running. Instead every query takes a fresh snapshot
//! of the process table and looks for the spawn token in command lines.
//!
//! The launcher passes the token as `$0` of a `-c` invocation, so a marked
//! process has an argv ending in `-c <script> <token>`. Processes that only
//! mention the token somewhere in their arguments (a shell running
//! `procwatch kill <token>`, for one) are not marked.
//!
//! A missing match is deliberately ambiguous: the process may not be visible
//! yet, or it may already be gone. Callers treat both the same way.

use std::collections::{HashMap, VecDeque};

use sysinfo::{ProcessRefreshKind, ProcessStatus, System, UpdateKind};
use tracing::debug;

/// One row of a process table snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub parent: Option<u32>,
    pub cmd: Vec<String>,
}

impl ProcessEntry {
    pub fn new(pid: u32, parent: Option<u32>, cmd: &[&str]) -> Self {
        Self {
            pid,
            parent,
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Whether the argv ends in `-c <script> <token>`
    pub fn marked_by(&self, token: &str) -> bool {
        matches!(
            self.cmd.as_slice(),
            [.., flag, _, last] if flag == "-c" && last == token
        )
    }
}

/// Point-in-time view of the live process table
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    entries: Vec<ProcessEntry>,
}

impl ProcessTable {
    /// Scan the live process table
    ///
    /// Zombies and threads are skipped, and so is the calling process: a
    /// supervisor that was handed a token on its own command line must not
    /// find itself.
    pub fn snapshot() -> Self {
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessRefreshKind::new().with_cmd(UpdateKind::Always));

        let own_pid = std::process::id();
        let entries = system
            .processes()
            .values()
            // Linux lists every thread as its own entry with the process argv
            .filter(|process| process.thread_kind().is_none())
            .filter(|process| process.status() != ProcessStatus::Zombie)
            .filter(|process| process.pid().as_u32() != own_pid)
            .map(|process| ProcessEntry {
                pid: process.pid().as_u32(),
                parent: process.parent().map(|p| p.as_u32()),
                cmd: process.cmd().to_vec(),
            })
            .collect();

        Self::from_entries(entries)
    }

    /// Build a table from explicit entries
    pub fn from_entries(mut entries: Vec<ProcessEntry>) -> Self {
        entries.sort_by_key(|entry| entry.pid);
        Self { entries }
    }

    pub fn entries(&self) -> &[ProcessEntry] {
        &self.entries
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.get(pid).is_some()
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessEntry> {
        self.entries
            .binary_search_by_key(&pid, |entry| entry.pid)
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Find the process marked by `token`
    ///
    /// Without descendants only the marked process itself matches: a marked
    /// entry whose parent is not marked. Forked subshells inherit the
    /// wrapper's command line, so they are excluded here. With descendants,
    /// any marked entry in the subtree is acceptable.
    pub fn find_token(&self, token: &str, include_descendants: bool) -> Option<u32> {
        if token.is_empty() {
            return None;
        }

        let marked: Vec<&ProcessEntry> =
            self.entries.iter().filter(|e| e.marked_by(token)).collect();

        let direct = marked.iter().find(|entry| {
            entry
                .parent
                .and_then(|parent| self.get(parent))
                .map_or(true, |parent| !parent.marked_by(token))
        });

        match direct {
            Some(entry) => Some(entry.pid),
            None if include_descendants => marked.first().map(|entry| entry.pid),
            None => None,
        }
    }

    /// All processes whose ancestry leads to `pid`, excluding `pid` itself
    ///
    /// Breadth-first, so parents come before their children.
    pub fn descendants(&self, pid: u32) -> Vec<u32> {
        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for entry in &self.entries {
            if let Some(parent) = entry.parent {
                if parent != entry.pid {
                    children.entry(parent).or_default().push(entry.pid);
                }
            }
        }

        let mut found = Vec::new();
        let mut queue = VecDeque::from([pid]);
        while let Some(current) = queue.pop_front() {
            for &child in children.get(&current).into_iter().flatten() {
                if child != pid && !found.contains(&child) {
                    found.push(child);
                    queue.push_back(child);
                }
            }
        }
        found
    }
}

/// Resolve a spawn token to a live pid
///
/// Rescans the process table on every call.
pub fn resolve(token: &str, include_descendants: bool) -> Option<u32> {
    let pid = ProcessTable::snapshot().find_token(token, include_descendants);
    debug!(token = %token, pid = ?pid, include_descendants, "Resolved token");
    pid
}
