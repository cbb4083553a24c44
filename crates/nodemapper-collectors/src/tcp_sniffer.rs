//! Inbound TCP SYN sniffer.
//!
//! A SYN arriving at a pod records that the remote peer opened a connection
//! to it, so the pod is the fact's source and the peer its destination.

use nodemapper_capture::{CapturedPacket, Transport, decode};
use nodemapper_common::error::Result;
use nodemapper_common::types::{CaptureSource, RecordedDestinationsForSrc};
use nodemapper_identity::IpResolver;

use crate::collector::NetworkCollector;
use crate::pending::{ConfirmStats, PendingCapture, PendingQueue};

/// Turns captured inbound SYNs into (pod, peer) facts.
#[derive(Debug)]
pub struct TcpSniffer {
    pending: PendingQueue,
    collector: NetworkCollector,
}

impl Default for TcpSniffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpSniffer {
    /// Creates a sniffer with empty pending and collected state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: PendingQueue::new(),
            collector: NetworkCollector::new(CaptureSource::TcpSyn),
        }
    }

    /// Number of captures awaiting confirmation.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Records a connection-opening SYN as a pending capture.
    pub fn handle_packet(&mut self, packet: &CapturedPacket, resolver: &impl IpResolver) {
        let Some(decoded) = decode(packet.link_type, &packet.data) else {
            return;
        };
        if !decoded.is_tcp_syn() {
            return;
        }
        let Transport::Tcp {
            src_port, dst_port, ..
        } = decoded.transport
        else {
            return;
        };

        let local_ip = decoded.dst_ip;
        let Some(identity) = resolver.resolve_ip(local_ip) else {
            tracing::debug!(%local_ip, "SYN for unresolved address");
            return;
        };
        tracing::debug!(
            %local_ip,
            identity = %identity,
            peer = %decoded.src_ip,
            port = dst_port,
            "captured TCP SYN"
        );
        self.pending.push(PendingCapture {
            local_ip,
            identity,
            destination: decoded.src_ip.to_string(),
            destination_ip: None,
            destination_port: Some(dst_port),
            ttl: None,
            source_port: Some(src_port),
            captured_at: packet.capture_time(),
        });
    }

    /// Refreshes the resolver, then confirms every pending capture.
    ///
    /// # Errors
    ///
    /// Returns the resolver's refresh error; pending captures are then
    /// discarded unconfirmed.
    pub fn refresh_hosts_mapping(
        &mut self,
        resolver: &mut impl IpResolver,
    ) -> Result<ConfirmStats> {
        self.pending.refresh_and_confirm(resolver, &mut self.collector)
    }

    /// Drains confirmed facts.
    pub fn collect_results(&mut self) -> Vec<RecordedDestinationsForSrc> {
        self.collector.collect_results()
    }
}
