use crate::error::TerminationIssue;
use std::collections::HashSet;
use std::fmt::Debug;
use sysinfo::{Pid, Signal, System};
use tracing::{debug, warn};

/// Issues a forceful kill request for a process, optionally with its descendants.
///
/// Implementations may block; the manager calls them from a blocking task.
pub trait ProcessTerminator: Send + Sync + Debug {
    fn terminate(&self, pid: u32, include_children: bool) -> Result<(), TerminationIssue>;
}

/// Signal-based backend built on the `sysinfo` process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoTerminator;

/// Collects every descendant of `root`, parents before their children.
fn descendants_of(system: &System, root: Pid) -> Vec<Pid> {
    let mut found: Vec<Pid> = Vec::new();
    let mut known: HashSet<Pid> = HashSet::from([root]);
    let mut frontier = vec![root];

    while !frontier.is_empty() {
        let mut next = Vec::new();
        for (pid, process) in system.processes() {
            if known.contains(pid) {
                continue;
            }
            if process.parent().map_or(false, |parent| frontier.contains(&parent)) {
                known.insert(*pid);
                next.push(*pid);
            }
        }
        found.extend(next.iter().copied());
        frontier = next;
    }
    found
}

fn kill_pid(system: &System, pid: Pid) -> Option<bool> {
    let process = system.process(pid)?;
    // Signal::Kill is unsupported on some platforms; fall back to the native kill.
    Some(process.kill_with(Signal::Kill).unwrap_or_else(|| process.kill()))
}

impl ProcessTerminator for SysinfoTerminator {
    fn terminate(&self, pid: u32, include_children: bool) -> Result<(), TerminationIssue> {
        let mut system = System::new();
        system.refresh_processes();

        let root = Pid::from_u32(pid);
        if system.process(root).is_none() {
            return Err(TerminationIssue::ProcessNotFound(pid));
        }

        if include_children {
            // Deepest first, so nothing gets a chance to respawn a sibling.
            for child in descendants_of(&system, root).into_iter().rev() {
                match kill_pid(&system, child) {
                    Some(true) => debug!(root_pid = pid, pid = %child, "Killed child process"),
                    Some(false) => warn!(root_pid = pid, pid = %child, "Failed to kill child process"),
                    None => debug!(root_pid = pid, pid = %child, "Child process already gone"),
                }
            }
        }

        match kill_pid(&system, root) {
            Some(true) => Ok(()),
            Some(false) => Err(TerminationIssue::SignalFailed {
                pid,
                reason: "kill signal was rejected by the OS".to_string(),
            }),
            None => Err(TerminationIssue::ProcessNotFound(pid)),
        }
    }
}
