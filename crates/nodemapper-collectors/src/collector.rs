//! Deduplicating fact sink with drain-and-reset semantics.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;

use chrono::{DateTime, Utc};

use nodemapper_common::types::{CaptureSource, Destination, RecordedDestinationsForSrc};

/// Dedup key of a collected fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueRequest {
    /// Source (local pod) address.
    pub src_ip: IpAddr,
    /// Source hostname at capture time.
    pub src_hostname: String,
    /// Source namespace, when known.
    pub src_namespace: Option<String>,
    /// Destination hostname or IP address.
    pub destination: String,
    /// Destination address, when known.
    pub destination_ip: Option<IpAddr>,
    /// Destination port, when known.
    pub destination_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Sighting {
    last_seen: DateTime<Utc>,
    ttl: Option<u32>,
    source_ports: BTreeSet<u16>,
}

/// Accumulates unique requests until [`NetworkCollector::collect_results`].
///
/// Not synchronized: a collector is owned by exactly one producer and
/// driven from a single task.
#[derive(Debug)]
pub struct NetworkCollector {
    source: CaptureSource,
    captured_requests: HashMap<UniqueRequest, Sighting>,
}

impl NetworkCollector {
    /// Creates an empty collector tagged with its fact source.
    #[must_use]
    pub fn new(source: CaptureSource) -> Self {
        Self {
            source,
            captured_requests: HashMap::new(),
        }
    }

    /// Fact source this collector is tagged with.
    #[must_use]
    pub const fn source(&self) -> CaptureSource {
        self.source
    }

    /// Upserts `request`. The stored last-seen time only moves forward; the
    /// TTL follows the newest sighting. Source ports accumulate across
    /// sightings until the next drain.
    pub fn add_captured_request(
        &mut self,
        request: UniqueRequest,
        seen_at: DateTime<Utc>,
        ttl: Option<u32>,
        source_port: Option<u16>,
    ) {
        let sighting = self
            .captured_requests
            .entry(request)
            .or_insert_with(|| Sighting {
                last_seen: seen_at,
                ttl,
                source_ports: BTreeSet::new(),
            });
        if seen_at >= sighting.last_seen {
            sighting.last_seen = seen_at;
            sighting.ttl = ttl;
        }
        if let Some(port) = source_port {
            let _ = sighting.source_ports.insert(port);
        }
    }

    /// Number of unique requests held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.captured_requests.len()
    }

    /// Whether nothing has been collected since the last drain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.captured_requests.is_empty()
    }

    /// Drains the collector, grouping destinations by source.
    ///
    /// The internal map is swapped for an empty one before grouping. Groups
    /// are ordered by source address and hostname, destinations by name.
    pub fn collect_results(&mut self) -> Vec<RecordedDestinationsForSrc> {
        let drained = std::mem::take(&mut self.captured_requests);
        let source = self.source;

        let mut groups: BTreeMap<(IpAddr, String, Option<String>), Vec<Destination>> =
            BTreeMap::new();
        for (request, sighting) in drained {
            groups
                .entry((request.src_ip, request.src_hostname, request.src_namespace))
                .or_default()
                .push(Destination {
                    destination: request.destination,
                    destination_ip: request.destination_ip,
                    destination_port: request.destination_port,
                    last_seen: sighting.last_seen,
                    ttl: sighting.ttl,
                    src_ports: sighting.source_ports.into_iter().collect(),
                });
        }

        groups
            .into_iter()
            .map(|((src_ip, src_hostname, src_namespace), mut destinations)| {
                destinations.sort_by(|a, b| {
                    (&a.destination, a.destination_ip, a.destination_port).cmp(&(
                        &b.destination,
                        b.destination_ip,
                        b.destination_port,
                    ))
                });
                tracing::debug!(
                    source = %source,
                    %src_ip,
                    src_hostname = %src_hostname,
                    destinations = destinations.len(),
                    "collected results"
                );
                for dest in &destinations {
                    tracing::debug!(
                        source = %source,
                        destination = %dest.destination,
                        last_seen = %dest.last_seen,
                        "  destination"
                    );
                }
                RecordedDestinationsForSrc {
                    src_ip,
                    src_hostname,
                    src_namespace,
                    destinations,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn request(src: &str, host: &str, dest: &str) -> UniqueRequest {
        UniqueRequest {
            src_ip: src.parse().unwrap(),
            src_hostname: host.into(),
            src_namespace: None,
            destination: dest.into(),
            destination_ip: None,
            destination_port: None,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn collect_results_groups_by_source() {
        let mut collector = NetworkCollector::new(CaptureSource::Dns);
        collector.add_captured_request(request("10.0.0.1", "a", "x.com"), at(0), None, None);
        collector.add_captured_request(request("10.0.0.1", "a", "y.com"), at(1), None, None);
        collector.add_captured_request(request("10.0.0.2", "b", "x.com"), at(2), None, None);

        let results = collector.collect_results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].src_hostname, "a");
        let names: Vec<_> = results[0]
            .destinations
            .iter()
            .map(|d| d.destination.as_str())
            .collect();
        assert_eq!(names, vec!["x.com", "y.com"]);
        assert_eq!(results[1].destinations[0].last_seen, at(2));
    }

    #[test]
    fn collect_results_resets_the_collector() {
        let mut collector = NetworkCollector::new(CaptureSource::TcpSyn);
        collector.add_captured_request(request("10.0.0.1", "a", "x.com"), at(0), None, None);
        assert_eq!(collector.collect_results().len(), 1);
        assert!(collector.is_empty());
        assert!(collector.collect_results().is_empty());
    }

    #[test]
    fn add_captured_request_keeps_latest_sighting() {
        let mut collector = NetworkCollector::new(CaptureSource::Dns);
        collector.add_captured_request(request("10.0.0.1", "a", "x.com"), at(5), Some(30), None);
        collector.add_captured_request(request("10.0.0.1", "a", "x.com"), at(1), Some(10), None);
        assert_eq!(collector.len(), 1);

        let results = collector.collect_results();
        let dest = &results[0].destinations[0];
        assert_eq!(dest.last_seen, at(5));
        assert_eq!(dest.ttl, Some(30));
    }

    #[test]
    fn add_captured_request_distinguishes_ports() {
        let mut collector = NetworkCollector::new(CaptureSource::TcpSyn);
        let mut first = request("10.0.0.1", "a", "10.0.0.9");
        first.destination_port = Some(80);
        let mut second = first.clone();
        second.destination_port = Some(443);
        collector.add_captured_request(first, at(0), None, None);
        collector.add_captured_request(second, at(0), None, None);
        assert_eq!(collector.len(), 2);
        assert_eq!(collector.collect_results()[0].destinations.len(), 2);
    }

    #[test]
    fn add_captured_request_accumulates_source_ports() {
        let mut collector = NetworkCollector::new(CaptureSource::TcpSyn);
        let req = request("10.0.0.1", "a", "10.0.0.9");
        collector.add_captured_request(req.clone(), at(0), None, Some(50_002));
        collector.add_captured_request(req.clone(), at(1), None, Some(50_001));
        collector.add_captured_request(req.clone(), at(2), None, Some(50_002));
        collector.add_captured_request(req, at(3), None, None);

        let results = collector.collect_results();
        assert_eq!(results[0].destinations[0].src_ports, vec![50_001, 50_002]);
        assert_eq!(results[0].destinations[0].last_seen, at(3));

        collector.add_captured_request(request("10.0.0.1", "a", "10.0.0.9"), at(4), None, None);
        assert!(collector.collect_results()[0].destinations[0].src_ports.is_empty());
    }
}
