//! DNS message decoding (RFC 1035), limited to what the sniffer needs:
//! header flags, questions and the answer section.

use std::net::{Ipv4Addr, Ipv6Addr};

use nodemapper_common::error::{MapperError, Result};

/// `A` record type.
pub const TYPE_A: u16 = 1;
/// `CNAME` record type.
pub const TYPE_CNAME: u16 = 5;
/// `AAAA` record type.
pub const TYPE_AAAA: u16 = 28;

/// Standard query opcode.
pub const OPCODE_QUERY: u8 = 0;
/// No-error response code.
pub const RCODE_NO_ERROR: u8 = 0;

const HEADER_LEN: usize = 12;
const MAX_POINTER_JUMPS: usize = 16;

/// Decoded record data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    /// IPv4 address.
    A(Ipv4Addr),
    /// IPv6 address.
    Aaaa(Ipv6Addr),
    /// Canonical name.
    Cname(String),
    /// Any other record type, left undecoded.
    Other(u16),
}

/// A resource record from the answer section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Owner name, without the trailing dot.
    pub name: String,
    /// Record TTL in seconds.
    pub ttl: u32,
    /// Record data.
    pub data: RData,
}

/// A question entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Queried name.
    pub name: String,
    /// Queried type.
    pub qtype: u16,
}

/// A decoded DNS message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    /// Transaction ID.
    pub id: u16,
    /// QR bit: set on responses.
    pub is_response: bool,
    /// Operation code.
    pub opcode: u8,
    /// Response code.
    pub rcode: u8,
    /// Question section.
    pub questions: Vec<Question>,
    /// Answer section.
    pub answers: Vec<ResourceRecord>,
}

impl DnsMessage {
    /// Decodes a DNS message from a UDP payload.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Parse` on truncated or malformed messages.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = Reader {
            data: payload,
            pos: 0,
        };
        let id = reader.u16()?;
        let flags = reader.take(2)?;
        let (flags_hi, flags_lo) = (flags[0], flags[1]);
        let qdcount = reader.u16()?;
        let ancount = reader.u16()?;
        reader.pos = HEADER_LEN;

        let mut questions = Vec::with_capacity(usize::from(qdcount));
        for _ in 0..qdcount {
            let name = reader.name()?;
            let qtype = reader.u16()?;
            let _class = reader.u16()?;
            questions.push(Question { name, qtype });
        }

        let mut answers = Vec::with_capacity(usize::from(ancount));
        for _ in 0..ancount {
            answers.push(reader.record()?);
        }

        Ok(Self {
            id,
            is_response: flags_hi & 0x80 != 0,
            opcode: (flags_hi >> 3) & 0x0F,
            rcode: flags_lo & 0x0F,
            questions,
            answers,
        })
    }

    /// Whether this is a successful response to a standard query.
    #[must_use]
    pub const fn is_successful_query_response(&self) -> bool {
        self.is_response && self.opcode == OPCODE_QUERY && self.rcode == RCODE_NO_ERROR
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8]> {
        let end = self.pos + n;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| truncated(self.pos))?;
        self.pos = end;
        Ok(bytes)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn record(&mut self) -> Result<ResourceRecord> {
        let name = self.name()?;
        let rtype = self.u16()?;
        let _class = self.u16()?;
        let ttl = self.u32()?;
        let rdlength = usize::from(self.u16()?);
        let rdata_start = self.pos;

        let data = match rtype {
            TYPE_A => {
                let b = self.take(rdlength)?;
                let octets: [u8; 4] = b.try_into().map_err(|_| bad_rdata("A", rdlength))?;
                RData::A(Ipv4Addr::from(octets))
            }
            TYPE_AAAA => {
                let b = self.take(rdlength)?;
                let octets: [u8; 16] = b.try_into().map_err(|_| bad_rdata("AAAA", rdlength))?;
                RData::Aaaa(Ipv6Addr::from(octets))
            }
            TYPE_CNAME => RData::Cname(self.name()?),
            other => {
                let _ = self.take(rdlength)?;
                RData::Other(other)
            }
        };
        self.pos = rdata_start + rdlength;
        Ok(ResourceRecord { name, ttl, data })
    }

    /// Reads a possibly compressed name and leaves `pos` after it.
    fn name(&mut self) -> Result<String> {
        let mut labels: Vec<String> = Vec::new();
        let mut cursor = self.pos;
        let mut resume_at = None;
        let mut jumps = 0;

        loop {
            let len = *self.data.get(cursor).ok_or_else(|| truncated(cursor))?;
            match len & 0xC0 {
                0x00 if len == 0 => {
                    cursor += 1;
                    break;
                }
                0x00 => {
                    let start = cursor + 1;
                    let end = start + usize::from(len);
                    let label = self.data.get(start..end).ok_or_else(|| truncated(start))?;
                    labels.push(String::from_utf8_lossy(label).into_owned());
                    cursor = end;
                }
                0xC0 => {
                    let low = *self.data.get(cursor + 1).ok_or_else(|| truncated(cursor))?;
                    jumps += 1;
                    if jumps > MAX_POINTER_JUMPS {
                        return Err(MapperError::parse("dns", "compression pointer loop"));
                    }
                    let _ = resume_at.get_or_insert(cursor + 2);
                    cursor = (usize::from(len & 0x3F) << 8) | usize::from(low);
                }
                _ => {
                    return Err(MapperError::parse(
                        "dns",
                        format!("unsupported label type {len:#04x}"),
                    ));
                }
            }
        }

        self.pos = resume_at.unwrap_or(cursor);
        Ok(labels.join("."))
    }
}

fn truncated(at: usize) -> MapperError {
    MapperError::parse("dns", format!("message truncated at offset {at}"))
}

fn bad_rdata(kind: &str, len: usize) -> MapperError {
    MapperError::parse("dns", format!("{kind} record with {len}-byte rdata"))
}
