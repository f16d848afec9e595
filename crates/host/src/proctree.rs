//! Process-tree enumeration and descendant termination.
//!
//! Some launched commands fork long-lived children that outlive the
//! direct child if only the direct child is signaled. Before closing such
//! a session, the coordinator enumerates the root pid's descendants and
//! signals each one individually, then closes the root through the
//! registry. Enumeration is platform-specific and hidden behind the
//! [`ProcessTree`] capability so call sites stay free of OS checks.

use std::sync::Arc;

/// Platform capability: list the direct children of a process.
pub trait ProcessTree: Send + Sync {
    /// Returns the pids of `pid`'s direct children. Processes that
    /// cannot be inspected are skipped.
    fn children(&self, pid: u32) -> Vec<u32>;
}

/// Returns the process-tree implementation for this platform.
pub fn platform_process_tree() -> Arc<dyn ProcessTree> {
    Arc::new(ProcListing)
}

/// All descendants of `root`, deepest first.
///
/// Walks the tree breadth-first via [`ProcessTree::children`] and
/// reverses the result so leaves come before their parents, which is the
/// correct termination order.
pub fn descendants(tree: &dyn ProcessTree, root: u32) -> Vec<u32> {
    let mut found = Vec::new();
    let mut queue = std::collections::VecDeque::from([root]);

    while let Some(pid) = queue.pop_front() {
        for child in tree.children(pid) {
            // Defend against cycles from pid reuse between queries.
            if child == root || found.contains(&child) {
                continue;
            }
            found.push(child);
            queue.push_back(child);
        }
    }

    found.reverse();
    found
}

/// Signals termination to every descendant of `root`, leaves first.
///
/// Best-effort: a descendant that already exited between enumeration and
/// kill, or that cannot be signaled, is skipped. The root itself is not
/// signaled; the registry's close takes it down afterwards. Returns the
/// number of descendants signaled.
pub fn terminate_descendants(tree: &dyn ProcessTree, root: u32) -> usize {
    let targets = descendants(tree, root);
    let mut signaled = 0;

    for pid in &targets {
        if terminate_pid(*pid) {
            signaled += 1;
        }
    }

    if !targets.is_empty() {
        tracing::info!(
            root,
            descendants = targets.len(),
            signaled,
            "terminated descendant processes"
        );
    }
    signaled
}

/// Parent-filtered process listing for Linux, via `/proc`.
#[cfg(target_os = "linux")]
pub struct ProcListing;

#[cfg(target_os = "linux")]
impl ProcessTree for ProcListing {
    fn children(&self, pid: u32) -> Vec<u32> {
        let entries = match std::fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read /proc");
                return Vec::new();
            }
        };

        let mut children = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Ok(candidate) = name.to_string_lossy().parse::<u32>() else {
                continue;
            };

            // The process may exit between readdir and this read.
            let Ok(status) = std::fs::read_to_string(format!("/proc/{candidate}/status")) else {
                continue;
            };

            let ppid = status
                .lines()
                .find_map(|line| line.strip_prefix("PPid:\t"))
                .and_then(|val| val.trim().parse::<u32>().ok());

            if ppid == Some(pid) {
                children.push(candidate);
            }
        }
        children
    }
}

/// Parent-filtered process listing for macOS, via libproc.
#[cfg(target_os = "macos")]
pub struct ProcListing;

#[cfg(target_os = "macos")]
impl ProcessTree for ProcListing {
    fn children(&self, pid: u32) -> Vec<u32> {
        use std::mem;

        // PROC_ALL_PIDS = 1, the stable value from <sys/proc_info.h>.
        const PROC_ALL_PIDS: u32 = 1;

        let num_bytes = unsafe { libc::proc_listpids(PROC_ALL_PIDS, 0, std::ptr::null_mut(), 0) };
        if num_bytes <= 0 {
            tracing::warn!("proc_listpids size query failed");
            return Vec::new();
        }

        // Headroom for processes appearing between the two calls.
        let pid_count = (num_bytes as usize / mem::size_of::<libc::pid_t>()) + 64;
        let mut pids: Vec<libc::pid_t> = vec![0; pid_count];
        let buf_size = (pid_count * mem::size_of::<libc::pid_t>()) as libc::c_int;

        let actual_bytes =
            unsafe { libc::proc_listpids(PROC_ALL_PIDS, 0, pids.as_mut_ptr().cast(), buf_size) };
        if actual_bytes <= 0 {
            tracing::warn!("proc_listpids data query failed");
            return Vec::new();
        }
        pids.truncate(actual_bytes as usize / mem::size_of::<libc::pid_t>());

        let bsdinfo_size = mem::size_of::<libc::proc_bsdinfo>() as libc::c_int;
        let mut children = Vec::new();

        for &candidate in &pids {
            if candidate <= 0 {
                continue;
            }

            let mut info: libc::proc_bsdinfo = unsafe { mem::zeroed() };
            let ret = unsafe {
                libc::proc_pidinfo(
                    candidate,
                    libc::PROC_PIDTBSDINFO,
                    0,
                    (&mut info as *mut libc::proc_bsdinfo).cast(),
                    bsdinfo_size,
                )
            };
            // Returns <= 0 when the process has already exited.
            if ret <= 0 {
                continue;
            }

            if info.pbi_ppid == pid {
                children.push(candidate as u32);
            }
        }
        children
    }
}

/// Process-snapshot query for Windows.
#[cfg(windows)]
pub struct ProcListing;

#[cfg(windows)]
impl ProcessTree for ProcListing {
    fn children(&self, pid: u32) -> Vec<u32> {
        use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );

        let parent = sysinfo::Pid::from_u32(pid);
        system
            .processes()
            .iter()
            .filter(|(_, process)| process.parent() == Some(parent))
            .map(|(child, _)| child.as_u32())
            .collect()
    }
}

/// Signals one pid. Already-dead (ESRCH) and not-permitted (EPERM)
/// targets are tolerated.
#[cfg(unix)]
fn terminate_pid(pid: u32) -> bool {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => {
            tracing::debug!(pid, "sent SIGTERM to descendant");
            true
        }
        Err(nix::errno::Errno::ESRCH) => {
            tracing::debug!(pid, "descendant already dead");
            false
        }
        Err(e) => {
            tracing::warn!(pid, error = %e, "could not signal descendant");
            false
        }
    }
}

#[cfg(windows)]
fn terminate_pid(pid: u32) -> bool {
    use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sysinfo::Pid::from_u32(pid)]),
        true,
        ProcessRefreshKind::nothing(),
    );
    system
        .process(sysinfo::Pid::from_u32(pid))
        .map(|process| process.kill())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::process::Command;
    use std::time::Duration;

    /// Scripted tree for exercising the traversal without real processes.
    struct FakeTree {
        edges: HashMap<u32, Vec<u32>>,
    }

    impl ProcessTree for FakeTree {
        fn children(&self, pid: u32) -> Vec<u32> {
            self.edges.get(&pid).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn descendants_are_ordered_leaves_first() {
        let tree = FakeTree {
            edges: HashMap::from([(1, vec![2, 3]), (2, vec![4]), (4, vec![5])]),
        };

        let order = descendants(&tree, 1);
        assert_eq!(order.len(), 4);
        // Every child must appear before its parent.
        let position = |pid: u32| order.iter().position(|&p| p == pid).unwrap();
        assert!(position(5) < position(4));
        assert!(position(4) < position(2));
    }

    #[test]
    fn descendants_of_a_leaf_are_empty() {
        let tree = FakeTree {
            edges: HashMap::new(),
        };
        assert!(descendants(&tree, 42).is_empty());
    }

    #[test]
    fn descendants_tolerate_cycles() {
        // pid reuse between queries can make the tree look cyclic.
        let tree = FakeTree {
            edges: HashMap::from([(1, vec![2]), (2, vec![1, 2, 3])]),
        };
        let order = descendants(&tree, 1);
        assert_eq!(order.len(), 2);
        assert!(order.contains(&2));
        assert!(order.contains(&3));
    }

    #[test]
    fn platform_listing_finds_forked_children() {
        // A shell that forks a sleeping grandchild.
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("sleep 30 & wait")
            .spawn()
            .expect("failed to spawn tree");
        let root = child.id();

        // Give the shell time to fork.
        std::thread::sleep(Duration::from_millis(500));

        let tree = platform_process_tree();
        let found = descendants(&*tree, root);
        assert!(
            !found.is_empty(),
            "expected at least the sleep child of {root}"
        );

        let signaled = terminate_descendants(&*tree, root);
        assert!(signaled >= 1, "expected to signal the sleep child");

        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn terminating_descendants_of_childless_process_is_safe() {
        let mut child = Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("failed to spawn sleep");
        let root = child.id();
        std::thread::sleep(Duration::from_millis(200));

        let tree = platform_process_tree();
        assert_eq!(terminate_descendants(&*tree, root), 0);

        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn terminating_a_dead_pid_is_tolerated() {
        let mut child = Command::new("sleep").arg("0").spawn().unwrap();
        let pid = child.id();
        let _ = child.wait();

        // The pid is gone (or reused); either way this must not panic.
        let tree = platform_process_tree();
        let _ = descendants(&*tree, pid);
    }
}
