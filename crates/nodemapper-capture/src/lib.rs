//! # nodemapper-capture
//!
//! Packet ingestion for the sniffers.
//!
//! - **Source**: live pcap captures running on dedicated threads, feeding a
//!   bounded channel.
//! - **Packet**: link-layer, IPv4/IPv6, UDP and TCP header decoding.
//! - **DNS**: DNS message decoding with name compression.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod dns;
pub mod packet;
pub mod source;

pub use packet::{DecodedPacket, Transport, decode};
pub use source::{CaptureDirection, CapturedPacket, PacketStream};
