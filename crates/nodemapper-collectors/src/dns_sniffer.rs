//! DNS response sniffer.
//!
//! A DNS response arriving at a pod tells us which external hostname the
//! pod is about to contact. The packet's destination address is the pod.

use std::collections::HashMap;
use std::net::IpAddr;

use nodemapper_capture::dns::{DnsMessage, RData};
use nodemapper_capture::{CapturedPacket, Transport, decode};
use nodemapper_common::error::Result;
use nodemapper_common::types::{CaptureSource, RecordedDestinationsForSrc};
use nodemapper_identity::IpResolver;

use crate::collector::NetworkCollector;
use crate::pending::{ConfirmStats, PendingCapture, PendingQueue};

/// Turns captured DNS responses into (pod, hostname) facts.
#[derive(Debug)]
pub struct DnsSniffer {
    pending: PendingQueue,
    collector: NetworkCollector,
}

impl Default for DnsSniffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsSniffer {
    /// Creates a sniffer with empty pending and collected state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: PendingQueue::new(),
            collector: NetworkCollector::new(CaptureSource::Dns),
        }
    }

    /// Number of captures awaiting confirmation.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Records the address answers of a successful DNS response as pending
    /// captures. Packets for unresolved pods are dropped.
    pub fn handle_packet(&mut self, packet: &CapturedPacket, resolver: &impl IpResolver) {
        let Some(decoded) = decode(packet.link_type, &packet.data) else {
            return;
        };
        let Transport::Udp { payload, .. } = decoded.transport else {
            return;
        };
        let message = match DnsMessage::parse(payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(error = %e, "failed to parse DNS payload");
                return;
            }
        };
        if !message.is_successful_query_response() {
            return;
        }

        let local_ip = decoded.dst_ip;
        let Some(identity) = resolver.resolve_ip(local_ip) else {
            tracing::debug!(%local_ip, "DNS response for unresolved address");
            return;
        };

        let captured_at = packet.capture_time();
        let aliases = cname_aliases(&message);
        for answer in &message.answers {
            let ip: IpAddr = match answer.data {
                RData::A(v4) => v4.into(),
                RData::Aaaa(v6) => v6.into(),
                RData::Cname(_) | RData::Other(_) => continue,
            };
            let destination = translate(&aliases, &answer.name);
            tracing::debug!(
                %local_ip,
                identity = %identity,
                destination = %destination,
                %ip,
                ttl = answer.ttl,
                "captured DNS answer"
            );
            self.pending.push(PendingCapture {
                local_ip,
                identity: identity.clone(),
                destination,
                destination_ip: Some(ip),
                destination_port: None,
                ttl: Some(answer.ttl),
                source_port: None,
                captured_at,
            });
        }
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

/// Maps each CNAME target back to the name it aliases.
fn cname_aliases(message: &DnsMessage) -> HashMap<String, String> {
    let mut aliases = HashMap::new();
    for answer in &message.answers {
        if let RData::Cname(target) = &answer.data {
            if let Some(previous) = aliases.insert(target.clone(), answer.name.clone()) {
                tracing::debug!(
                    target = %target,
                    previous = %previous,
                    alias = %answer.name,
                    "CNAME target has several aliases, keeping the last"
                );
            }
        }
    }
    aliases
}

/// Follows CNAME aliases back to the name originally queried.
fn translate(aliases: &HashMap<String, String>, name: &str) -> String {
    let mut current = name;
    for _ in 0..=aliases.len() {
        match aliases.get(current) {
            Some(alias) if alias != name => current = alias.as_str(),
            _ => break,
        }
    }
    current.to_string()
}
