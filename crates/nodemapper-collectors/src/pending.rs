//! Two-phase capture: resolve at capture time, confirm at refresh time.

use std::net::IpAddr;

use chrono::{DateTime, Utc};

use nodemapper_common::error::Result;
use nodemapper_common::types::Identity;
use nodemapper_identity::IpResolver;

use crate::collector::{NetworkCollector, UniqueRequest};

/// A captured fact awaiting identity confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCapture {
    /// Local pod address the fact belongs to.
    pub local_ip: IpAddr,
    /// Identity resolved for `local_ip` at capture time.
    pub identity: Identity,
    /// Destination hostname or IP address.
    pub destination: String,
    /// Destination address, when known.
    pub destination_ip: Option<IpAddr>,
    /// Destination port, when known.
    pub destination_port: Option<u16>,
    /// DNS TTL, when known.
    pub ttl: Option<u32>,
    /// Peer source port, when known.
    pub source_port: Option<u16>,
    /// Capture time.
    pub captured_at: DateTime<Utc>,
}

/// Outcome of one confirmation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfirmStats {
    /// Captures promoted to the collector.
    pub promoted: usize,
    /// Captures dropped as stale.
    pub dropped: usize,
}

/// Captures recorded since the last confirmation pass.
#[derive(Debug, Default)]
pub struct PendingQueue {
    captures: Vec<PendingCapture>,
}

impl PendingQueue {
    /// Creates an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            captures: Vec::new(),
        }
    }

    /// Queues a capture.
    pub fn push(&mut self, capture: PendingCapture) {
        self.captures.push(capture);
    }

    /// Number of queued captures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.captures.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    /// Polls the resolver, then confirms the queue against the fresh view.
    ///
    /// Without a successful poll there is nothing to compare against, so
    /// the queue is discarded and nothing is promoted.
    ///
    /// # Errors
    ///
    /// Returns the resolver's refresh error.
    pub fn refresh_and_confirm(
        &mut self,
        resolver: &mut impl IpResolver,
        collector: &mut NetworkCollector,
    ) -> Result<ConfirmStats> {
        if let Err(e) = resolver.refresh() {
            let discarded = self.discard();
            tracing::debug!(
                source = %collector.source(),
                discarded,
                "IP mapping refresh failed, discarding pending captures"
            );
            return Err(e);
        }
        Ok(self.confirm(&*resolver, collector))
    }

    /// Empties the queue without promoting anything. Returns how many
    /// captures were discarded.
    pub fn discard(&mut self) -> usize {
        let discarded = self.captures.len();
        self.captures.clear();
        discarded
    }

    /// Re-resolves every queued capture and promotes those whose local
    /// identity is unchanged. The queue is always emptied.
    pub fn confirm(
        &mut self,
        resolver: &impl IpResolver,
        collector: &mut NetworkCollector,
    ) -> ConfirmStats {
        let mut stats = ConfirmStats::default();
        for capture in self.captures.drain(..) {
            let current = resolver.resolve_ip(capture.local_ip);
            if current.as_ref() != Some(&capture.identity) {
                tracing::debug!(
                    source = %collector.source(),
                    local_ip = %capture.local_ip,
                    captured = %capture.identity,
                    current = ?current.map(|i| i.to_string()),
                    destination = %capture.destination,
                    "dropping stale capture"
                );
                stats.dropped += 1;
                continue;
            }
            collector.add_captured_request(
                UniqueRequest {
                    src_ip: capture.local_ip,
                    src_hostname: capture.identity.name,
                    src_namespace: capture.identity.namespace,
                    destination: capture.destination,
                    destination_ip: capture.destination_ip,
                    destination_port: capture.destination_port,
                },
                capture.captured_at,
                capture.ttl,
                capture.source_port,
            );
            stats.promoted += 1;
        }
        stats
    }
}
