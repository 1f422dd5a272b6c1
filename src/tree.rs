//! Best-effort process tree termination.
//!
//! Descendants are found by snapshotting the OS process table and walking
//! parent links. The walk is racy: a descendant that forks after the
//! snapshot is missed. On Unix every service leads its own process group,
//! and the group signal reaches children that stayed in it.

use std::collections::{HashMap, VecDeque};

use sysinfo::System;

/// Returns every descendant of `root`, parents before children.
pub fn descendants(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes();

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children
                .entry(parent.as_u32())
                .or_default()
                .push(pid.as_u32());
        }
    }
    walk(root, &children)
}

fn walk(root: u32, children: &HashMap<u32, Vec<u32>>) -> Vec<u32> {
    let mut found = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        for &child in children.get(&pid).into_iter().flatten() {
            // Guard against cycles from pid reuse between refreshes.
            if child != root && !found.contains(&child) {
                found.push(child);
                queue.push_back(child);
            }
        }
    }
    found
}

/// Requests termination of every descendant of `root`, then of `root`.
/// Does not wait for anything to exit.
pub fn terminate_tree(root: u32) {
    let descendants = descendants(root);
    tracing::debug!(pid = root, descendants = ?descendants, "terminating process tree");
    for pid in descendants {
        terminate(pid);
    }
    terminate_group(root);
    terminate(root);
}

#[cfg(unix)]
fn terminate(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        tracing::debug!(pid, error = %std::io::Error::last_os_error(), "SIGTERM failed");
    }
}

#[cfg(unix)]
fn terminate_group(leader: u32) {
    let Ok(pid) = i32::try_from(leader) else {
        return;
    };
    unsafe {
        let _ = libc::kill(-pid, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(pid: u32) {
    let mut system = System::new();
    let pid = sysinfo::Pid::from_u32(pid);
    if system.refresh_process(pid) {
        if let Some(process) = system.process(pid) {
            if !process.kill() {
                tracing::debug!(pid = pid.as_u32(), "kill failed");
            }
        }
    }
}

#[cfg(not(unix))]
fn terminate_group(_leader: u32) {}
