//! Domain primitive types used across the nodemapper workspace.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The resolved owner of an IP address at a point in time.
///
/// `name` is the pod hostname; `namespace` is known only when the pod
/// exposes it through its service-account mount or environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Pod hostname.
    pub name: String,
    /// Kubernetes namespace, if discoverable.
    pub namespace: Option<String>,
}

impl Identity {
    /// Creates an identity with no known namespace.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Sets the namespace of this identity.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A destination observed for a source, with its most recent sighting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Hostname or IP address of the destination.
    pub destination: String,
    /// Resolved destination address, when known.
    pub destination_ip: Option<IpAddr>,
    /// Destination port, when known.
    pub destination_port: Option<u16>,
    /// Time of the latest observation.
    pub last_seen: DateTime<Utc>,
    /// DNS TTL of the latest observation, in seconds.
    pub ttl: Option<u32>,
    /// Peer source ports seen for this destination, ascending.
    #[serde(default)]
    pub src_ports: Vec<u16>,
}

/// All destinations recorded for one source during a drain interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedDestinationsForSrc {
    /// Source IP address.
    pub src_ip: IpAddr,
    /// Source hostname (the resolved identity name).
    pub src_hostname: String,
    /// Source namespace, when known.
    pub src_namespace: Option<String>,
    /// Destinations seen from this source.
    pub destinations: Vec<Destination>,
}

/// Cloud environment the node runs in, attached to every report batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudContext {
    /// Cloud provider name.
    pub provider: String,
    /// Region reported by the instance metadata service.
    pub region: Option<String>,
}

/// Origin of a batch of reported facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureSource {
    /// Facts derived from DNS responses.
    Dns,
    /// Facts derived from inbound TCP SYN packets.
    TcpSyn,
    /// Facts derived from kernel socket tables.
    SocketScan,
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns => write!(f, "dns"),
            Self::TcpSyn => write!(f, "tcp-syn"),
            Self::SocketScan => write!(f, "socket-scan"),
        }
    }
}

/// Returns the IPv4 form of an IPv4-mapped IPv6 address, or the address unchanged.
#[must_use]
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map_or(IpAddr::V6(v6), IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_display_with_and_without_namespace() {
        assert_eq!(Identity::new("curl").to_string(), "curl");
        assert_eq!(
            Identity::new("curl").with_namespace("default").to_string(),
            "default/curl"
        );
    }

    #[test]
    fn normalize_ip_unwraps_v4_mapped() {
        let mapped: IpAddr = "::ffff:10.1.2.3".parse().unwrap();
        assert_eq!(normalize_ip(mapped), "10.1.2.3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn normalize_ip_keeps_native_v6() {
        let v6: IpAddr = "fd00::1".parse().unwrap();
        assert_eq!(normalize_ip(v6), v6);
    }

    #[test]
    fn destination_serializes_camel_case() {
        let dest = Destination {
            destination: "example.com".into(),
            destination_ip: None,
            destination_port: Some(443),
            last_seen: DateTime::<Utc>::UNIX_EPOCH,
            ttl: None,
            src_ports: vec![40112],
        };
        let json = serde_json::to_value(&dest).unwrap();
        assert_eq!(json["destinationPort"], 443);
        assert_eq!(json["srcPorts"][0], 40112);
        assert!(json.get("lastSeen").is_some());
    }
}
