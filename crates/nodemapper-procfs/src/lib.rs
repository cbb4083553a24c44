//! # nodemapper-procfs
//!
//! Readers for the host's `/proc` tree, mounted into the agent container.
//!
//! - **Scan**: enumerate numeric process directories.
//! - **Process**: extract a process's hostname, namespace, and pod IP.
//! - **TCP table**: parse `net/tcp` and `net/tcp6` socket tables.
//!
//! Processes routinely exit mid-scan, so per-process readers return errors
//! that callers are expected to log and skip.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod process;
pub mod scan;
pub mod tcp_table;

pub use scan::{ProcessDir, list_processes};
