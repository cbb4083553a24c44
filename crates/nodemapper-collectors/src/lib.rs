//! # nodemapper-collectors
//!
//! Producers of (source, destination, last-seen) facts.
//!
//! - [`dns_sniffer::DnsSniffer`] and [`tcp_sniffer::TcpSniffer`] turn
//!   captured packets into pending captures and confirm them against the
//!   resolver on each refresh.
//! - [`socket_scanner::SocketScanner`] reads kernel socket tables and
//!   records client-side connections directly.
//! - Each producer owns a [`collector::NetworkCollector`] that deduplicates
//!   facts until drained.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod collector;
pub mod dns_sniffer;
pub mod pending;
pub mod socket_scanner;
pub mod tcp_sniffer;

pub use collector::{NetworkCollector, UniqueRequest};
pub use dns_sniffer::DnsSniffer;
pub use socket_scanner::SocketScanner;
pub use tcp_sniffer::TcpSniffer;
