//! IP-to-identity resolution backed by the host proc directory.
//!
//! Bindings live in an arena keyed by [`BindingId`]. The address index and
//! the PID index both point into the arena, so a binding superseded in the
//! address index stays alive for the PIDs still holding it, and its last
//! release can tell it is no longer the indexed one.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use nodemapper_common::error::Result;
use nodemapper_common::types::{Identity, normalize_ip};
use nodemapper_procfs::process;

use crate::process_monitor::{ProcessEventHandler, ProcessMonitor};

/// Answers "which identity owns this IP right now".
pub trait IpResolver {
    /// Returns the identity currently bound to `ip`, if any.
    fn resolve_ip(&self, ip: IpAddr) -> Option<Identity>;

    /// Brings the binding table up to date with the running processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the process list cannot be read.
    fn refresh(&mut self) -> Result<()>;
}

/// Arena handle of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BindingId(u64);

#[derive(Debug)]
struct Binding {
    ip: IpAddr,
    identity: Identity,
    ref_count: usize,
}

/// Ref-counted IP bindings indexed by address and by PID.
#[derive(Debug, Default)]
pub struct BindingTable {
    bindings: HashMap<BindingId, Binding>,
    by_addr: HashMap<IpAddr, BindingId>,
    by_pid: HashMap<u32, BindingId>,
    next_id: u64,
}

impl BindingTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identity indexed under `ip`.
    #[must_use]
    pub fn resolve(&self, ip: IpAddr) -> Option<&Identity> {
        let id = self.by_addr.get(&normalize_ip(ip))?;
        self.bindings.get(id).map(|b| &b.identity)
    }

    /// Returns the process count of the binding indexed under `ip`.
    #[must_use]
    pub fn ref_count(&self, ip: IpAddr) -> Option<usize> {
        let id = self.by_addr.get(&normalize_ip(ip))?;
        self.bindings.get(id).map(|b| b.ref_count)
    }

    /// Number of addresses currently indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    /// Whether no address is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }

    /// Records that `pid` holds `ip` as `identity`.
    ///
    /// Shares the indexed binding when the identity matches; otherwise the
    /// address is re-indexed to a fresh binding and the old one is left to
    /// the PIDs still referencing it.
    pub fn bind(&mut self, pid: u32, ip: IpAddr, identity: Identity) {
        let ip = normalize_ip(ip);
        if self.by_pid.contains_key(&pid) {
            self.release(pid);
        }

        if let Some(&id) = self.by_addr.get(&ip) {
            if let Some(binding) = self.bindings.get_mut(&id) {
                if binding.identity == identity {
                    binding.ref_count += 1;
                    let _ = self.by_pid.insert(pid, id);
                    tracing::debug!(pid, %ip, identity = %identity, ref_count = binding.ref_count, "shared existing binding");
                    return;
                }
                tracing::warn!(
                    pid,
                    %ip,
                    previous = %binding.identity,
                    current = %identity,
                    "IP address already bound to another identity, replacing"
                );
            }
        }

        let id = BindingId(self.next_id);
        self.next_id += 1;
        tracing::debug!(pid, %ip, identity = %identity, "new binding");
        let _ = self.bindings.insert(
            id,
            Binding {
                ip,
                identity,
                ref_count: 1,
            },
        );
        let _ = self.by_addr.insert(ip, id);
        let _ = self.by_pid.insert(pid, id);
    }

    /// Drops `pid`'s reference to its binding.
    ///
    /// At zero references the binding is freed, and its address index entry
    /// is removed only if it still points to this binding.
    pub fn release(&mut self, pid: u32) {
        let Some(id) = self.by_pid.remove(&pid) else {
            return;
        };
        let Some(binding) = self.bindings.get_mut(&id) else {
            return;
        };
        binding.ref_count = binding.ref_count.saturating_sub(1);
        if binding.ref_count > 0 {
            return;
        }

        let ip = binding.ip;
        if self.by_addr.get(&ip) == Some(&id) {
            let _ = self.by_addr.remove(&ip);
            tracing::debug!(pid, %ip, "released last reference, unbinding address");
        } else {
            tracing::debug!(pid, %ip, "released superseded binding");
        }
        let _ = self.bindings.remove(&id);
    }
}

impl ProcessEventHandler for BindingTable {
    fn on_new(&mut self, pid: u32, pdir: &Path) {
        let hostname = match process::extract_hostname(pdir) {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!(pid, error = %e, "skipping process without hostname");
                return;
            }
        };
        let ip = match process::extract_ip_addr(pdir) {
            Ok(ip) => ip,
            Err(e) => {
                tracing::debug!(pid, error = %e, "skipping process without IP address");
                return;
            }
        };
        let identity = Identity {
            name: hostname,
            namespace: process::extract_namespace(pdir),
        };
        self.bind(pid, IpAddr::V4(ip), identity);
    }

    fn on_exit(&mut self, pid: u32) {
        self.release(pid);
    }
}

/// [`IpResolver`] that polls the host proc directory on every refresh.
#[derive(Debug)]
pub struct ProcFsIpResolver {
    monitor: ProcessMonitor,
    table: BindingTable,
}

impl ProcFsIpResolver {
    /// Creates a resolver over `host_proc_dir`. Nothing is bound until the
    /// first [`IpResolver::refresh`].
    #[must_use]
    pub fn new(host_proc_dir: impl Into<PathBuf>) -> Self {
        Self {
            monitor: ProcessMonitor::new(host_proc_dir),
            table: BindingTable::new(),
        }
    }

    /// Read access to the current bindings.
    #[must_use]
    pub const fn table(&self) -> &BindingTable {
        &self.table
    }
}

impl IpResolver for ProcFsIpResolver {
    fn resolve_ip(&self, ip: IpAddr) -> Option<Identity> {
        self.table.resolve(ip).cloned()
    }

    fn refresh(&mut self) -> Result<()> {
        self.monitor.poll(&mut self.table)
    }
}
