//! Prometheus counters for reported connections.
//!
//! One counter per capture source, bumped by the number of destinations in
//! every batch the mapper accepted.

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

use nodemapper_common::error::{MapperError, Result};
use nodemapper_common::types::{CaptureSource, RecordedDestinationsForSrc};

/// Connections reported upstream, by source.
#[derive(Debug, Clone)]
pub struct ReportMetrics {
    registry: Registry,
    dns: IntCounter,
    tcp: IntCounter,
    socket_scan: IntCounter,
}

impl ReportMetrics {
    /// Creates the counters on a private registry.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Metrics` if a counter cannot be registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let dns = register(
            &registry,
            "dns_reported_connections",
            "The total number of DNS-based reported connections",
        )?;
        let tcp = register(
            &registry,
            "tcp_reported_connections",
            "The total number of TCP SYN-based reported connections",
        )?;
        let socket_scan = register(
            &registry,
            "socketscan_reported_connections",
            "The total number of socket scan-based reported connections",
        )?;
        Ok(Self {
            registry,
            dns,
            tcp,
            socket_scan,
        })
    }

    /// Adds `connections` accepted by the mapper to the `source` counter.
    pub fn record_reported(&self, source: CaptureSource, connections: u64) {
        self.counter(source).inc_by(connections);
    }

    /// Current total for `source`.
    #[must_use]
    pub fn reported(&self, source: CaptureSource) -> u64 {
        self.counter(source).get()
    }

    /// Renders every counter in the Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Metrics` if encoding fails.
    pub fn encode(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(metrics_err)?;
        String::from_utf8(buf).map_err(|e| MapperError::Metrics {
            message: e.to_string(),
        })
    }

    const fn counter(&self, source: CaptureSource) -> &IntCounter {
        match source {
            CaptureSource::Dns => &self.dns,
            CaptureSource::TcpSyn => &self.tcp,
            CaptureSource::SocketScan => &self.socket_scan,
        }
    }
}

/// Destinations across every source entry of a batch.
#[must_use]
pub fn connection_count(results: &[RecordedDestinationsForSrc]) -> u64 {
    results.iter().map(|r| r.destinations.len() as u64).sum()
}

fn register(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(name, help).map_err(metrics_err)?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(metrics_err)?;
    Ok(counter)
}

fn metrics_err(e: prometheus::Error) -> MapperError {
    MapperError::Metrics {
        message: e.to_string(),
    }
}
