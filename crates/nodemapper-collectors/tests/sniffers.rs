//! End-to-end sniffer scenarios: capture, refresh, drain.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, TimeZone, Utc};

use nodemapper_capture::CapturedPacket;
use nodemapper_capture::packet::{LINKTYPE_ETHERNET, LINKTYPE_RAW};
use nodemapper_collectors::{DnsSniffer, TcpSniffer};
use nodemapper_common::error::{MapperError, Result};
use nodemapper_common::types::Identity;
use nodemapper_identity::IpResolver;

/// Ethernet frame: DNS response from 208.91.112.52 to 10.101.81.13 for
/// `sts.us-east-1.amazonaws.com A 72.21.206.96`, TTL 60.
const DNS_RESPONSE_FRAME: &str = "f84d8969309600090f090002080045000059eb6c40004011b325d05b70340a65510d0035fcb40045a621339681800001000100000000037374730975732d656173742d3109616d617a6f6e61777303636f6d0000010001c00c000100010000003c00044815ce60";

/// Raw IPv4: SYN from 127.0.0.1:55613 to 127.0.0.1:8000.
const TCP_SYN_PACKET: &str = "4500004000004000400600007f0000017f000001d93d1f40a16450e500000000b002fffffe34000002043fd8010303060101080ab6a645bc0000000004020000";

/// Resolver with a fixed table that switches to `next` on refresh.
#[derive(Default)]
struct ScriptedResolver {
    current: HashMap<IpAddr, Identity>,
    next: Option<HashMap<IpAddr, Identity>>,
    refreshes: usize,
    fail_refresh: bool,
}

impl ScriptedResolver {
    fn with(ip: &str, name: &str) -> Self {
        let mut resolver = Self::default();
        let _ = resolver.current.insert(ip.parse().unwrap(), Identity::new(name));
        resolver
    }
}

impl IpResolver for ScriptedResolver {
    fn resolve_ip(&self, ip: IpAddr) -> Option<Identity> {
        self.current.get(&ip).cloned()
    }

    fn refresh(&mut self) -> Result<()> {
        self.refreshes += 1;
        if self.fail_refresh {
            return Err(MapperError::io(
                "/hostproc",
                std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            ));
        }
        if let Some(next) = self.next.take() {
            self.current = next;
        }
        Ok(())
    }
}

fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

fn packet(link_type: i32, frame: &str, timestamp: DateTime<Utc>) -> CapturedPacket {
    CapturedPacket {
        link_type,
        data: hex(frame),
        timestamp: Some(timestamp),
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
}

#[test]
fn dns_response_is_promoted_after_refresh() {
    let mut resolver = ScriptedResolver::with("10.101.81.13", "curl");
    let mut sniffer = DnsSniffer::new();

    sniffer.handle_packet(&packet(LINKTYPE_ETHERNET, DNS_RESPONSE_FRAME, t0()), &resolver);
    assert_eq!(sniffer.pending_len(), 1);
    assert!(sniffer.collect_results().is_empty());

    let stats = sniffer.refresh_hosts_mapping(&mut resolver).unwrap();
    assert_eq!((stats.promoted, stats.dropped), (1, 0));
    assert_eq!(resolver.refreshes, 1);
    assert_eq!(sniffer.pending_len(), 0);

    let results = sniffer.collect_results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].src_ip, "10.101.81.13".parse::<IpAddr>().unwrap());
    assert_eq!(results[0].src_hostname, "curl");
    assert_eq!(results[0].destinations.len(), 1);
    let dest = &results[0].destinations[0];
    assert_eq!(dest.destination, "sts.us-east-1.amazonaws.com");
    assert_eq!(dest.last_seen, t0());
    assert_eq!(dest.destination_ip, Some("72.21.206.96".parse().unwrap()));
    assert_eq!(dest.ttl, Some(60));
}

#[test]
fn dns_response_is_dropped_when_identity_changes() {
    let mut resolver = ScriptedResolver::with("10.101.81.13", "curl");
    let mut replaced = HashMap::new();
    let _ = replaced.insert("10.101.81.13".parse().unwrap(), Identity::new("wget"));
    resolver.next = Some(replaced);
    let mut sniffer = DnsSniffer::new();

    sniffer.handle_packet(&packet(LINKTYPE_ETHERNET, DNS_RESPONSE_FRAME, t0()), &resolver);
    let stats = sniffer.refresh_hosts_mapping(&mut resolver).unwrap();
    assert_eq!((stats.promoted, stats.dropped), (0, 1));
    assert!(sniffer.collect_results().is_empty());
}

#[test]
fn dns_response_is_dropped_when_address_unbinds() {
    let mut resolver = ScriptedResolver::with("10.101.81.13", "curl");
    resolver.next = Some(HashMap::new());
    let mut sniffer = DnsSniffer::new();

    sniffer.handle_packet(&packet(LINKTYPE_ETHERNET, DNS_RESPONSE_FRAME, t0()), &resolver);
    let _ = sniffer.refresh_hosts_mapping(&mut resolver).unwrap();
    assert!(sniffer.collect_results().is_empty());
}

#[test]
fn dns_response_for_unknown_pod_is_ignored() {
    let resolver = ScriptedResolver::with("10.0.0.1", "other");
    let mut sniffer = DnsSniffer::new();
    sniffer.handle_packet(&packet(LINKTYPE_ETHERNET, DNS_RESPONSE_FRAME, t0()), &resolver);
    assert_eq!(sniffer.pending_len(), 0);
}

#[test]
fn dns_unstamped_packet_uses_capture_time_now() {
    let mut resolver = ScriptedResolver::with("10.101.81.13", "curl");
    let mut sniffer = DnsSniffer::new();
    let mut captured = packet(LINKTYPE_ETHERNET, DNS_RESPONSE_FRAME, t0());
    captured.timestamp = None;

    let before = Utc::now();
    sniffer.handle_packet(&captured, &resolver);
    let _ = sniffer.refresh_hosts_mapping(&mut resolver).unwrap();
    let results = sniffer.collect_results();
    assert!(results[0].destinations[0].last_seen >= before);
}

#[test]
fn tcp_syns_one_second_apart_collapse_to_latest() {
    let mut resolver = ScriptedResolver::with("127.0.0.1", "server");
    let mut sniffer = TcpSniffer::new();
    let later = t0() + chrono::Duration::seconds(1);

    sniffer.handle_packet(&packet(LINKTYPE_RAW, TCP_SYN_PACKET, t0()), &resolver);
    sniffer.handle_packet(&packet(LINKTYPE_RAW, TCP_SYN_PACKET, later), &resolver);
    let stats = sniffer.refresh_hosts_mapping(&mut resolver).unwrap();
    assert_eq!(stats.promoted, 2);

    let results = sniffer.collect_results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].src_hostname, "server");
    assert_eq!(results[0].destinations.len(), 1);
    let dest = &results[0].destinations[0];
    assert_eq!(dest.destination, "127.0.0.1");
    assert_eq!(dest.destination_port, Some(8000));
    assert_eq!(dest.last_seen, later);
    assert_eq!(dest.src_ports, vec![55613]);
}

#[test]
fn tcp_failed_refresh_promotes_nothing() {
    let mut resolver = ScriptedResolver::with("127.0.0.1", "server");
    resolver.fail_refresh = true;
    let mut sniffer = TcpSniffer::new();

    sniffer.handle_packet(&packet(LINKTYPE_RAW, TCP_SYN_PACKET, t0()), &resolver);
    let err = sniffer.refresh_hosts_mapping(&mut resolver).unwrap_err();
    assert!(matches!(err, MapperError::Io { .. }));
    assert_eq!(sniffer.pending_len(), 0);
    assert!(sniffer.collect_results().is_empty());

    resolver.fail_refresh = false;
    let stats = sniffer.refresh_hosts_mapping(&mut resolver).unwrap();
    assert_eq!((stats.promoted, stats.dropped), (0, 0));
    assert!(sniffer.collect_results().is_empty());
}

#[test]
fn dns_failed_refresh_promotes_nothing() {
    let mut resolver = ScriptedResolver::with("10.101.81.13", "curl");
    resolver.fail_refresh = true;
    let mut sniffer = DnsSniffer::new();

    sniffer.handle_packet(&packet(LINKTYPE_ETHERNET, DNS_RESPONSE_FRAME, t0()), &resolver);
    assert!(sniffer.refresh_hosts_mapping(&mut resolver).is_err());
    assert_eq!(sniffer.pending_len(), 0);
    assert!(sniffer.collect_results().is_empty());
}

#[test]
fn tcp_pending_is_cleared_by_each_refresh() {
    let mut resolver = ScriptedResolver::with("127.0.0.1", "server");
    let mut sniffer = TcpSniffer::new();

    sniffer.handle_packet(&packet(LINKTYPE_RAW, TCP_SYN_PACKET, t0()), &resolver);
    let _ = sniffer.refresh_hosts_mapping(&mut resolver).unwrap();
    let second = sniffer.refresh_hosts_mapping(&mut resolver).unwrap();
    assert_eq!((second.promoted, second.dropped), (0, 0));
    assert_eq!(sniffer.collect_results()[0].destinations.len(), 1);
}

#[test]
fn tcp_non_syn_segments_are_ignored() {
    let resolver = ScriptedResolver::with("127.0.0.1", "server");
    let mut sniffer = TcpSniffer::new();
    let mut data = hex(TCP_SYN_PACKET);
    data[33] = 0x12;
    let synack = CapturedPacket {
        link_type: LINKTYPE_RAW,
        data,
        timestamp: Some(t0()),
    };
    sniffer.handle_packet(&synack, &resolver);
    assert_eq!(sniffer.pending_len(), 0);
}
