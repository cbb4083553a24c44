//! Process lifecycle monitoring by proc-dir polling.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use nodemapper_common::error::Result;
use nodemapper_procfs::list_processes;

/// Receives process lifecycle events from [`ProcessMonitor::poll`].
///
/// Handlers must not call back into the monitor.
pub trait ProcessEventHandler {
    /// Called once for a PID that was absent from the previous poll.
    fn on_new(&mut self, pid: u32, pdir: &Path);

    /// Called once for a PID seen on the previous poll but gone now.
    fn on_exit(&mut self, pid: u32);
}

/// Diffs successive scans of a proc directory into new/exit events.
#[derive(Debug)]
pub struct ProcessMonitor {
    proc_dir: PathBuf,
    known: HashSet<u32>,
}

impl ProcessMonitor {
    /// Creates a monitor over `proc_dir` with no known processes.
    #[must_use]
    pub fn new(proc_dir: impl Into<PathBuf>) -> Self {
        Self {
            proc_dir: proc_dir.into(),
            known: HashSet::new(),
        }
    }

    /// Returns the proc directory being scanned.
    #[must_use]
    pub fn proc_dir(&self) -> &Path {
        &self.proc_dir
    }

    /// Returns the PIDs seen on the last successful poll.
    #[must_use]
    pub const fn known_pids(&self) -> &HashSet<u32> {
        &self.known
    }

    /// Scans the proc directory once and reports lifecycle transitions.
    ///
    /// All exit events of a poll are delivered before any new event. This
    /// ordering is deliberate: a handler keyed by IP sees the previous owner
    /// of a recycled address leave before the next owner claims it, so the
    /// new binding is never removed by a late exit. The known PID set is
    /// replaced only after a complete scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the proc directory cannot be listed. No events are
    /// emitted in that case and the previous PID set is kept.
    pub fn poll(&mut self, handler: &mut impl ProcessEventHandler) -> Result<()> {
        let processes = list_processes(&self.proc_dir)?;
        let current: HashSet<u32> = processes.iter().map(|p| p.pid).collect();

        let mut exited: Vec<u32> = self.known.difference(&current).copied().collect();
        exited.sort_unstable();
        for pid in exited {
            tracing::trace!(pid, "process exited");
            handler.on_exit(pid);
        }

        for process in processes.iter().filter(|p| !self.known.contains(&p.pid)) {
            tracing::trace!(pid = process.pid, "process started");
            handler.on_new(process.pid, &process.path);
        }

        self.known = current;
        Ok(())
    }
}
