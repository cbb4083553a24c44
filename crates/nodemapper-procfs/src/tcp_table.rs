//! Kernel TCP socket tables (`net/tcp`, `net/tcp6`).
//!
//! Addresses are printed as hex words in host byte order; ports are
//! big-endian hex. Only little-endian hosts are supported.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use nodemapper_common::error::{MapperError, Result};
use nodemapper_common::types::normalize_ip;

/// TCP connection state as encoded in the `st` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpState {
    /// `01`
    Established,
    /// `02`
    SynSent,
    /// `03`
    SynRecv,
    /// `04`
    FinWait1,
    /// `05`
    FinWait2,
    /// `06`
    TimeWait,
    /// `07`
    Close,
    /// `08`
    CloseWait,
    /// `09`
    LastAck,
    /// `0A`
    Listen,
    /// `0B`
    Closing,
    /// `0C`
    NewSynRecv,
}

impl TcpState {
    /// Decodes a kernel state code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => Self::Established,
            0x02 => Self::SynSent,
            0x03 => Self::SynRecv,
            0x04 => Self::FinWait1,
            0x05 => Self::FinWait2,
            0x06 => Self::TimeWait,
            0x07 => Self::Close,
            0x08 => Self::CloseWait,
            0x09 => Self::LastAck,
            0x0A => Self::Listen,
            0x0B => Self::Closing,
            0x0C => Self::NewSynRecv,
            _ => return None,
        })
    }
}

/// One row of a socket table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketEntry {
    /// Local endpoint. IPv4-mapped addresses are normalized to IPv4.
    pub local: SocketAddr,
    /// Remote endpoint. IPv4-mapped addresses are normalized to IPv4.
    pub remote: SocketAddr,
    /// Connection state.
    pub state: TcpState,
}

/// Parses the content of a `net/tcp` or `net/tcp6` file.
///
/// The header line and malformed rows are skipped.
#[must_use]
pub fn parse_tcp_table(content: &str) -> Vec<SocketEntry> {
    content
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match parse_line(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, line, "skipping socket table row");
                None
            }
        })
        .collect()
}

/// Reads and parses a socket table file.
///
/// # Errors
///
/// Returns `MapperError::Io` if the file cannot be read.
pub fn read_tcp_table(path: &Path) -> Result<Vec<SocketEntry>> {
    let content = std::fs::read_to_string(path).map_err(|e| MapperError::io(path, e))?;
    Ok(parse_tcp_table(&content))
}

fn parse_line(line: &str) -> Result<SocketEntry> {
    let mut fields = line.split_whitespace();
    let _slot = fields.next();
    let local = fields.next().ok_or_else(|| missing("local_address"))?;
    let remote = fields.next().ok_or_else(|| missing("rem_address"))?;
    let state = fields.next().ok_or_else(|| missing("st"))?;

    let code = u8::from_str_radix(state, 16)
        .map_err(|e| MapperError::parse("tcp table", format!("state {state:?}: {e}")))?;
    let state = TcpState::from_code(code)
        .ok_or_else(|| MapperError::parse("tcp table", format!("unknown state {state:?}")))?;

    Ok(SocketEntry {
        local: parse_hex_socket_addr(local)?,
        remote: parse_hex_socket_addr(remote)?,
        state,
    })
}

fn missing(column: &str) -> MapperError {
    MapperError::parse("tcp table", format!("missing {column} column"))
}

/// Parses `ADDR:PORT` where `ADDR` is 8 (IPv4) or 32 (IPv6) hex digits.
fn parse_hex_socket_addr(s: &str) -> Result<SocketAddr> {
    let invalid = |reason: &str| MapperError::parse("tcp table", format!("{s:?}: {reason}"));
    let (addr, port) = s.split_once(':').ok_or_else(|| invalid("missing port"))?;
    let port = u16::from_str_radix(port, 16).map_err(|_| invalid("bad port"))?;

    let ip = match addr.len() {
        8 => IpAddr::V4(Ipv4Addr::from(hex_word(addr).ok_or_else(|| invalid("bad address"))?)),
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
                let word = addr
                    .get(i * 8..i * 8 + 8)
                    .and_then(hex_word)
                    .ok_or_else(|| invalid("bad address"))?;
                chunk.copy_from_slice(&word);
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return Err(invalid("unexpected address length")),
    };
    Ok(SocketAddr::new(normalize_ip(ip), port))
}

/// Decodes one host-order hex word into network-order octets.
fn hex_word(s: &str) -> Option<[u8; 4]> {
    u32::from_str_radix(s, 16).ok().map(u32::to_le_bytes)
}
