//! Link, network and transport header decoding.
//!
//! Decoding is zero-copy and never fails loudly: anything truncated,
//! fragmented or of an unsupported protocol yields `None`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use nodemapper_common::types::normalize_ip;

/// BSD loopback encapsulation.
pub const LINKTYPE_NULL: i32 = 0;
/// Ethernet II.
pub const LINKTYPE_ETHERNET: i32 = 1;
/// Raw IP (`DLT_RAW` on most platforms).
pub const LINKTYPE_DLT_RAW: i32 = 12;
/// Raw IP.
pub const LINKTYPE_RAW: i32 = 101;
/// Linux cooked capture v1.
pub const LINKTYPE_LINUX_SLL: i32 = 113;
/// Raw IPv4.
pub const LINKTYPE_IPV4: i32 = 228;
/// Raw IPv6.
pub const LINKTYPE_IPV6: i32 = 229;
/// Linux cooked capture v2.
pub const LINKTYPE_LINUX_SLL2: i32 = 276;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88A8;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

/// TCP SYN flag.
pub const TCP_FLAG_SYN: u8 = 0x02;
/// TCP ACK flag.
pub const TCP_FLAG_ACK: u8 = 0x10;

/// Transport layer of a decoded packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport<'a> {
    /// UDP datagram with its payload.
    Udp {
        /// Source port.
        src_port: u16,
        /// Destination port.
        dst_port: u16,
        /// Datagram payload.
        payload: &'a [u8],
    },
    /// TCP segment header.
    Tcp {
        /// Source port.
        src_port: u16,
        /// Destination port.
        dst_port: u16,
        /// Flags byte (CWR..FIN).
        flags: u8,
    },
}

/// An IP packet with its transport header decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedPacket<'a> {
    /// Source address, IPv4-mapped addresses normalized.
    pub src_ip: IpAddr,
    /// Destination address, IPv4-mapped addresses normalized.
    pub dst_ip: IpAddr,
    /// Transport layer.
    pub transport: Transport<'a>,
}

impl DecodedPacket<'_> {
    /// Whether this is a TCP connection opening (SYN without ACK).
    #[must_use]
    pub const fn is_tcp_syn(&self) -> bool {
        matches!(
            self.transport,
            Transport::Tcp { flags, .. } if flags & TCP_FLAG_SYN != 0 && flags & TCP_FLAG_ACK == 0
        )
    }
}

/// Decodes a captured frame of the given pcap link type.
#[must_use]
pub fn decode(link_type: i32, data: &[u8]) -> Option<DecodedPacket<'_>> {
    match link_type {
        LINKTYPE_ETHERNET => decode_ethernet(data),
        LINKTYPE_LINUX_SLL => {
            let ethertype = be16(data, 14)?;
            decode_ethertype(ethertype, data.get(16..)?)
        }
        LINKTYPE_LINUX_SLL2 => {
            let ethertype = be16(data, 0)?;
            decode_ethertype(ethertype, data.get(20..)?)
        }
        LINKTYPE_NULL => decode_ip(data.get(4..)?),
        LINKTYPE_RAW | LINKTYPE_DLT_RAW | LINKTYPE_IPV4 | LINKTYPE_IPV6 => decode_ip(data),
        _ => None,
    }
}

fn decode_ethernet(data: &[u8]) -> Option<DecodedPacket<'_>> {
    let mut offset = 12;
    let mut ethertype = be16(data, offset)?;
    while matches!(ethertype, ETHERTYPE_VLAN | ETHERTYPE_QINQ) {
        offset += 4;
        ethertype = be16(data, offset)?;
    }
    decode_ethertype(ethertype, data.get(offset + 2..)?)
}

fn decode_ethertype(ethertype: u16, data: &[u8]) -> Option<DecodedPacket<'_>> {
    match ethertype {
        ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => decode_ip(data),
        _ => None,
    }
}

/// Dispatches on the IP version nibble.
fn decode_ip(data: &[u8]) -> Option<DecodedPacket<'_>> {
    match data.first()? >> 4 {
        4 => decode_ipv4(data),
        6 => decode_ipv6(data),
        _ => None,
    }
}

fn decode_ipv4(data: &[u8]) -> Option<DecodedPacket<'_>> {
    let header_len = usize::from(data.first()? & 0x0F) * 4;
    if header_len < 20 || data.len() < header_len {
        return None;
    }
    let total_len = usize::from(be16(data, 2)?);
    let fragment_offset = be16(data, 6)? & 0x1FFF;
    if fragment_offset != 0 {
        return None;
    }
    let protocol = *data.get(9)?;
    let src = Ipv4Addr::from(<[u8; 4]>::try_from(data.get(12..16)?).ok()?);
    let dst = Ipv4Addr::from(<[u8; 4]>::try_from(data.get(16..20)?).ok()?);
    let end = total_len.clamp(header_len, data.len());
    let payload = data.get(header_len..end)?;
    decode_transport(IpAddr::V4(src), IpAddr::V4(dst), protocol, payload)
}

fn decode_ipv6(data: &[u8]) -> Option<DecodedPacket<'_>> {
    let payload_len = usize::from(be16(data, 4)?);
    let mut next_header = *data.get(6)?;
    let src = Ipv6Addr::from(<[u8; 16]>::try_from(data.get(8..24)?).ok()?);
    let dst = Ipv6Addr::from(<[u8; 16]>::try_from(data.get(24..40)?).ok()?);
    let end = (40 + payload_len).min(data.len());
    let mut payload = data.get(40..end)?;

    loop {
        match next_header {
            // Hop-by-hop, routing, destination options.
            0 | 43 | 60 => {
                let len = (usize::from(*payload.get(1)?) + 1) * 8;
                next_header = *payload.first()?;
                payload = payload.get(len..)?;
            }
            // Fragment: only the first fragment carries the transport header.
            44 => {
                let offset = be16(payload, 2)? >> 3;
                if offset != 0 {
                    return None;
                }
                next_header = *payload.first()?;
                payload = payload.get(8..)?;
            }
            _ => break,
        }
    }
    decode_transport(
        normalize_ip(IpAddr::V6(src)),
        normalize_ip(IpAddr::V6(dst)),
        next_header,
        payload,
    )
}

fn decode_transport(
    src_ip: IpAddr,
    dst_ip: IpAddr,
    protocol: u8,
    data: &[u8],
) -> Option<DecodedPacket<'_>> {
    let transport = match protocol {
        IPPROTO_UDP => {
            let len = usize::from(be16(data, 4)?);
            let end = len.clamp(8, data.len().max(8));
            Transport::Udp {
                src_port: be16(data, 0)?,
                dst_port: be16(data, 2)?,
                payload: data.get(8..end)?,
            }
        }
        IPPROTO_TCP => {
            let data_offset = usize::from(data.get(12)? >> 4) * 4;
            if data_offset < 20 {
                return None;
            }
            Transport::Tcp {
                src_port: be16(data, 0)?,
                dst_port: be16(data, 2)?,
                flags: *data.get(13)?,
            }
        }
        _ => return None,
    };
    Some(DecodedPacket {
        src_ip,
        dst_ip,
        transport,
    })
}

fn be16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    const TCP_SYN_IPV4: &str = "4500004000004000400600007f0000017f000001d93d1f40a16450e500000000b002fffffe34000002043fd8010303060101080ab6a645bc0000000004020000";

    #[test]
    fn decode_raw_ipv4_tcp_syn() {
        let data = hex(TCP_SYN_IPV4);
        let packet = decode(LINKTYPE_RAW, &data).expect("decoded");
        assert_eq!(packet.src_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(packet.dst_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(
            packet.transport,
            Transport::Tcp {
                src_port: 0xd93d,
                dst_port: 8000,
                flags: TCP_FLAG_SYN
            }
        );
        assert!(packet.is_tcp_syn());
    }

    #[test]
    fn decode_linux_sll_wraps_ipv4() {
        let mut frame = hex("00000304000600000000000000000800");
        frame.extend(hex(TCP_SYN_IPV4));
        let packet = decode(LINKTYPE_LINUX_SLL, &frame).expect("decoded");
        assert!(packet.is_tcp_syn());
    }

    #[test]
    fn decode_ethernet_with_vlan_tag() {
        let mut frame = hex("f84d8969309600090f0900028100000a0800");
        frame.extend(hex(TCP_SYN_IPV4));
        let packet = decode(LINKTYPE_ETHERNET, &frame).expect("decoded");
        assert_eq!(packet.dst_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn decode_ipv6_udp() {
        let mut data = hex("6000000000100000");
        data[6] = IPPROTO_UDP;
        data.extend(Ipv6Addr::LOCALHOST.octets());
        data.extend("fd00::2".parse::<Ipv6Addr>().unwrap().octets());
        data.extend(hex("0035c0000010000001020304050607"));
        data.push(8);
        let packet = decode(LINKTYPE_RAW, &data).expect("decoded");
        assert_eq!(packet.dst_ip, "fd00::2".parse::<IpAddr>().unwrap());
        assert!(matches!(
            packet.transport,
            Transport::Udp {
                src_port: 53,
                payload: &[1, 2, 3, 4, 5, 6, 7, 8],
                ..
            }
        ));
    }

    #[test]
    fn syn_ack_is_not_a_syn() {
        let mut data = hex(TCP_SYN_IPV4);
        data[33] = TCP_FLAG_SYN | TCP_FLAG_ACK;
        let packet = decode(LINKTYPE_RAW, &data).expect("decoded");
        assert!(!packet.is_tcp_syn());
    }

    #[test]
    fn truncated_and_unknown_frames_are_ignored() {
        let data = hex(TCP_SYN_IPV4);
        assert!(decode(LINKTYPE_RAW, &data[..30]).is_none());
        assert!(decode(LINKTYPE_ETHERNET, &[0u8; 10]).is_none());
        assert!(decode(9999, &data).is_none());
    }
}
