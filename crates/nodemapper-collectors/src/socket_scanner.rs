//! Point-in-time scan of kernel TCP socket tables.
//!
//! An established socket whose local port is not one the process listens
//! on was opened by the process, so it is recorded as an outbound call to
//! the remote address.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use nodemapper_common::error::Result;
use nodemapper_common::types::{CaptureSource, Identity, RecordedDestinationsForSrc};
use nodemapper_procfs::tcp_table::{SocketEntry, TcpState, read_tcp_table};
use nodemapper_procfs::{list_processes, process};

use crate::collector::{NetworkCollector, UniqueRequest};

const TCP_TABLES: [&str; 2] = ["tcp", "tcp6"];

/// Records client-side TCP connections found in `/proc/<pid>/net/tcp{,6}`.
#[derive(Debug)]
pub struct SocketScanner {
    proc_dir: PathBuf,
    collector: NetworkCollector,
}

impl SocketScanner {
    /// Creates a scanner over `host_proc_dir`.
    #[must_use]
    pub fn new(host_proc_dir: impl Into<PathBuf>) -> Self {
        Self {
            proc_dir: host_proc_dir.into(),
            collector: NetworkCollector::new(CaptureSource::SocketScan),
        }
    }

    /// Scans every process once. Processes whose identity or tables cannot
    /// be read are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the proc directory itself cannot be listed.
    pub fn scan(&mut self) -> Result<()> {
        let now = Utc::now();
        let processes = list_processes(&self.proc_dir)?;
        for proc_dir in &processes {
            self.scan_process(proc_dir.pid, &proc_dir.path, now);
        }
        tracing::debug!(
            processes = processes.len(),
            requests = self.collector.len(),
            "socket scan finished"
        );
        Ok(())
    }

    /// Drains recorded facts.
    pub fn collect_results(&mut self) -> Vec<RecordedDestinationsForSrc> {
        self.collector.collect_results()
    }

    fn scan_process(&mut self, pid: u32, pdir: &Path, now: DateTime<Utc>) {
        let hostname = match process::extract_hostname(pdir) {
            Ok(h) => h,
            Err(e) => {
                tracing::trace!(pid, error = %e, "skipping process without hostname");
                return;
            }
        };
        let identity = Identity {
            name: hostname,
            namespace: process::extract_namespace(pdir),
        };

        let mut sockets: Vec<SocketEntry> = Vec::new();
        for table in TCP_TABLES {
            match read_tcp_table(&pdir.join("net").join(table)) {
                Ok(entries) => sockets.extend(entries),
                Err(e) => tracing::trace!(pid, table, error = %e, "socket table unreadable"),
            }
        }

        for request in client_connections(&sockets, &identity) {
            self.collector.add_captured_request(request, now, None, None);
        }
    }
}

/// Classifies established sockets on non-listening local ports as outbound.
fn client_connections(sockets: &[SocketEntry], identity: &Identity) -> Vec<UniqueRequest> {
    let listening: HashSet<u16> = sockets
        .iter()
        .filter(|s| s.state == TcpState::Listen)
        .map(|s| s.local.port())
        .collect();

    sockets
        .iter()
        .filter(|s| s.state == TcpState::Established)
        .filter(|s| !listening.contains(&s.local.port()))
        .filter(|s| !s.local.ip().is_loopback() && !s.remote.ip().is_loopback())
        .map(|s| UniqueRequest {
            src_ip: s.local.ip(),
            src_hostname: identity.name.clone(),
            src_namespace: identity.namespace.clone(),
            destination: s.remote.ip().to_string(),
            destination_ip: Some(s.remote.ip()),
            destination_port: None,
        })
        .collect()
}
