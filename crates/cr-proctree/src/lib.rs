//! Process-tree enumeration and termination.
//!
//! Termination is two-phase: a polite terminate across the whole tree,
//! a grace window, then a forceful kill for anything still alive. On
//! POSIX the child's process group is signalled as a fast path; a
//! snapshot walker covers processes that left the group and is the only
//! mechanism on Windows.

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, Signal, System};
use tracing::debug;

pub mod priority;

/// One live descendant as observed in a process-table snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessNode {
    pub pid: u32,
    pub parent: u32,
    /// Process start time (seconds since the epoch); used to detect PID
    /// reuse between snapshots.
    pub start_time: u64,
    pub name: String,
}

/// What [`terminate_tree`] did, for the caller's log events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KillReport {
    /// Processes that received the polite terminate.
    pub terminated: usize,
    /// Processes still alive after the grace window that were killed.
    pub killed: usize,
    /// True when the forceful phase had anything left to do.
    pub escalated: bool,
    /// PIDs that survived both phases (normally empty).
    pub survivors: Vec<u32>,
}

/// Enumerate every live descendant of `root`, breadth-first.
///
/// Orphaned descendants that were reparented away before the snapshot are
/// not reachable from `root` and are not returned.
pub fn descendants(root: u32) -> Vec<ProcessNode> {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    snapshot_descendants(&sys, root)
}

fn snapshot_descendants(sys: &System, root: u32) -> Vec<ProcessNode> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, proc) in sys.processes() {
        if let Some(parent) = proc.parent() {
            children
                .entry(parent.as_u32())
                .or_default()
                .push(pid.as_u32());
        }
    }

    let mut out = Vec::new();
    let mut seen: HashSet<u32> = HashSet::from([root]);
    let mut queue: VecDeque<u32> = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        let Some(kids) = children.get(&pid) else {
            continue;
        };
        for &child in kids {
            if !seen.insert(child) {
                continue;
            }
            if let Some(proc) = sys.process(Pid::from_u32(child)) {
                out.push(ProcessNode {
                    pid: child,
                    parent: pid,
                    start_time: proc.start_time(),
                    name: proc.name().to_string_lossy().into_owned(),
                });
            }
            queue.push_back(child);
        }
    }
    out
}

/// Terminate `root` and every live descendant.
///
/// Phase one delivers SIGTERM (or the platform terminate request) across
/// the tree, youngest-first, then the root. After `grace`, the process
/// table is re-read to catch late-born children of grandchildren, and
/// anything still alive is killed forcefully. A PID observed with a newer
/// start time than in the first snapshot has been reused by an unrelated
/// process and is left alone.
pub async fn terminate_tree(root: u32, grace: Duration) -> KillReport {
    let mut report = KillReport::default();

    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    let mut first_pass = snapshot_descendants(&sys, root);
    // Youngest-first so children go before the parents that could
    // otherwise respawn them.
    first_pass.sort_by(|a, b| b.start_time.cmp(&a.start_time));

    let first_seen: HashMap<u32, u64> = first_pass
        .iter()
        .map(|node| (node.pid, node.start_time))
        .chain(
            sys.process(Pid::from_u32(root))
                .map(|p| (root, p.start_time())),
        )
        .collect();

    #[cfg(unix)]
    signal_group(root, libc::SIGTERM);

    for node in &first_pass {
        if let Some(proc) = sys.process(Pid::from_u32(node.pid)) {
            if request_terminate(proc) {
                report.terminated += 1;
            }
        }
    }
    if let Some(proc) = sys.process(Pid::from_u32(root)) {
        if request_terminate(proc) {
            report.terminated += 1;
        }
    }
    debug!(
        root,
        descendants = first_pass.len(),
        "requested terminate across process tree"
    );

    tokio::time::sleep(grace).await;

    sys.refresh_processes(ProcessesToUpdate::All, true);
    let mut second_pass = snapshot_descendants(&sys, root);
    second_pass.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    second_pass.push(ProcessNode {
        pid: root,
        parent: root,
        start_time: first_seen.get(&root).copied().unwrap_or(0),
        name: String::new(),
    });

    #[cfg(unix)]
    if second_pass.iter().any(|node| is_alive(node.pid)) {
        signal_group(root, libc::SIGKILL);
    }

    for node in &second_pass {
        let Some(proc) = sys.process(Pid::from_u32(node.pid)) else {
            continue;
        };
        if let Some(&original) = first_seen.get(&node.pid) {
            if proc.start_time() > original {
                // PID reuse across the grace window.
                debug!(pid = node.pid, "skipping reused PID");
                continue;
            }
        }
        if !is_live_entry(proc) {
            continue;
        }
        report.escalated = true;
        if proc.kill() {
            report.killed += 1;
        }
    }

    let pids: Vec<Pid> = second_pass
        .iter()
        .map(|node| Pid::from_u32(node.pid))
        .collect();
    sys.refresh_processes(ProcessesToUpdate::Some(&pids), true);
    report.survivors = second_pass
        .iter()
        .map(|node| node.pid)
        .filter(|&pid| {
            sys.process(Pid::from_u32(pid))
                .is_some_and(is_live_entry)
        })
        .collect();
    report
}

/// A table entry that is actually running, as opposed to a zombie
/// awaiting its parent's reap.
fn is_live_entry(proc: &Process) -> bool {
    !matches!(proc.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
}

/// Polite phase: SIGTERM where the platform has one, otherwise the
/// platform terminate request.
fn request_terminate(proc: &Process) -> bool {
    match proc.kill_with(Signal::Term) {
        Some(delivered) => delivered,
        None => proc.kill(),
    }
}

/// Signal the entire process group rooted at `pgid`.
#[cfg(unix)]
fn signal_group(pgid: u32, sig: libc::c_int) {
    // SAFETY: kill() is async-signal-safe; negative PID targets the group.
    unsafe {
        libc::kill(-(pgid as libc::pid_t), sig);
    }
}

/// Liveness probe that does not require signal permissions to succeed.
pub fn is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // SAFETY: `kill(pid, 0)` performs an existence/permission probe only.
        let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if ret == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        sys.process(Pid::from_u32(pid)).is_some()
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
