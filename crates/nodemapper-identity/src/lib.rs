//! # nodemapper-identity
//!
//! Maps pod IP addresses to the identity of the processes holding them.
//!
//! The [`process_monitor::ProcessMonitor`] diffs successive proc-dir scans
//! into new/exit events; the [`resolver::ProcFsIpResolver`] turns those
//! events into ref-counted IP bindings and answers point-in-time lookups.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod process_monitor;
pub mod resolver;

pub use resolver::{IpResolver, ProcFsIpResolver};
