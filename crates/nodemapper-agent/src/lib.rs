//! # nodemapper-agent
//!
//! Runs the node agent: one event loop multiplexing packet capture,
//! identity refresh and periodic reporting.
//!
//! - **Orchestrator**: owns the sniffers, the socket scanner and the
//!   resolver; drains collectors on the report timer.
//! - **Report**: the upstream report client trait and its HTTP
//!   implementation.
//! - **Cloud**: startup detection of the cloud environment.
//! - **Metrics** and **Server**: reported-connection counters and the
//!   `/metrics` and `/healthz` endpoints.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cloud;
pub mod metrics;
pub mod orchestrator;
pub mod report;
pub mod server;

pub use metrics::ReportMetrics;
pub use orchestrator::{Orchestrator, PacketStreams};
pub use report::{MapperClient, ReportClient};
