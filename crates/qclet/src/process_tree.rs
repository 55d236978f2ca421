//! Process-tree enumeration and teardown helpers.
//!
//! The model server forks its own children (CUDA worker pools, data
//! loaders). Killing only the parent leaves those children holding the GPU
//! and the listen socket, so teardown walks the OS process table and
//! signals descendants explicitly.

use std::collections::HashMap;

use sysinfo::{Pid, ProcessesToUpdate, Signal, System};

/// Snapshot the current process table.
pub fn refreshed_system() -> System {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    sys
}

/// Transitive children of `root` in the given snapshot.
///
/// Only finds processes still linked to `root` by parent ancestry; children
/// reparented after their parent died are not discoverable this way.
pub fn descendants(sys: &System, root: Pid) -> Vec<Pid> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in sys.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(next) = frontier.pop() {
        if let Some(kids) = children.get(&next) {
            for kid in kids {
                found.push(*kid);
                frontier.push(*kid);
            }
        }
    }
    found
}

/// Ask a process to exit: SIGTERM where the platform supports it, hard
/// kill elsewhere. Returns false if the process is already gone.
pub fn terminate(sys: &System, pid: Pid) -> bool {
    match sys.process(pid) {
        Some(process) => process
            .kill_with(Signal::Term)
            .unwrap_or_else(|| process.kill()),
        None => false,
    }
}

/// Unconditionally kill a process. Returns false if it is already gone.
pub fn force_kill(sys: &System, pid: Pid) -> bool {
    match sys.process(pid) {
        Some(process) => process.kill(),
        None => false,
    }
}

pub fn is_alive(sys: &System, pid: Pid) -> bool {
    sys.process(pid).is_some()
}
