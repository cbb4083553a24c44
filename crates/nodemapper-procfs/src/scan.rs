//! Process directory enumeration.

use std::path::{Path, PathBuf};

use nodemapper_common::error::{MapperError, Result};

/// A live process directory under the host proc mount.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessDir {
    /// Process ID.
    pub pid: u32,
    /// Path to `<proc>/<pid>`.
    pub path: PathBuf,
}

/// Lists every numeric entry of `proc_dir`, sorted by PID.
///
/// Non-numeric entries (`self`, `net`, `sys`, ...) are skipped. The listing
/// is all-or-nothing: any directory read error aborts it.
///
/// # Errors
///
/// Returns `MapperError::Io` if the directory cannot be read.
pub fn list_processes(proc_dir: &Path) -> Result<Vec<ProcessDir>> {
    let entries = std::fs::read_dir(proc_dir).map_err(|e| MapperError::io(proc_dir, e))?;

    let mut processes = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| MapperError::io(proc_dir, e))?;
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        processes.push(ProcessDir {
            pid,
            path: entry.path(),
        });
    }
    processes.sort_by_key(|p| p.pid);
    tracing::trace!(count = processes.len(), dir = %proc_dir.display(), "listed processes");
    Ok(processes)
}
