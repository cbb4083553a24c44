//! Live capture sources.
//!
//! Each [`PacketStream`] owns one pcap handle on a dedicated OS thread. The
//! thread copies frames into a bounded channel and never blocks on it: when
//! the consumer falls behind, frames are dropped.

use std::thread;

use chrono::{DateTime, Utc};
use pcap::{Active, Capture, Direction};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use nodemapper_common::error::{MapperError, Result};

/// Read timeout so the capture thread notices a closed channel on idle links.
const READ_TIMEOUT_MS: i32 = 500;
const SNAPLEN: i32 = 65_535;

/// Which packets a capture accepts relative to the capturing host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDirection {
    /// Only packets received by the host.
    In,
    /// Packets in both directions.
    InOut,
}

impl From<CaptureDirection> for Direction {
    fn from(direction: CaptureDirection) -> Self {
        match direction {
            CaptureDirection::In => Self::In,
            CaptureDirection::InOut => Self::InOut,
        }
    }
}

/// A frame copied out of the capture ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPacket {
    /// pcap link type of `data`.
    pub link_type: i32,
    /// Raw frame bytes.
    pub data: Vec<u8>,
    /// Capture timestamp, `None` when the driver did not stamp the frame.
    pub timestamp: Option<DateTime<Utc>>,
}

impl CapturedPacket {
    /// Capture time, falling back to now for unstamped frames.
    #[must_use]
    pub fn capture_time(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(Utc::now)
    }
}

/// A running live capture.
#[derive(Debug)]
pub struct PacketStream {
    receiver: mpsc::Receiver<CapturedPacket>,
    link_type: i32,
}

impl PacketStream {
    /// Opens `device` with a BPF `filter` and starts the capture thread.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Capture` if the device cannot be opened or the
    /// filter or direction cannot be applied.
    pub fn open(
        device: &str,
        filter: &str,
        direction: CaptureDirection,
        capacity: usize,
    ) -> Result<Self> {
        let capture_err = |message: String| MapperError::Capture {
            device: device.to_string(),
            message,
        };

        let mut capture = Capture::from_device(device)
            .map_err(|e| capture_err(format!("failed to find device: {e}")))?
            .immediate_mode(true)
            .snaplen(SNAPLEN)
            .timeout(READ_TIMEOUT_MS)
            .open()
            .map_err(|e| capture_err(format!("failed to open capture: {e}")))?;
        capture
            .direction(direction.into())
            .map_err(|e| capture_err(format!("failed to set direction {direction:?}: {e}")))?;
        capture
            .filter(filter, true)
            .map_err(|e| capture_err(format!("failed to apply filter {filter:?}: {e}")))?;

        let link_type = capture.get_datalink().0;
        let (tx, rx) = mpsc::channel(capacity);
        let thread_device = device.to_string();
        let _handle = thread::Builder::new()
            .name(format!("capture-{device}"))
            .spawn(move || capture_loop(capture, &thread_device, link_type, &tx))
            .map_err(|e| capture_err(format!("failed to spawn capture thread: {e}")))?;

        tracing::info!(device, filter, ?direction, link_type, "capture started");
        Ok(Self {
            receiver: rx,
            link_type,
        })
    }

    /// pcap link type of captured frames.
    #[must_use]
    pub const fn link_type(&self) -> i32 {
        self.link_type
    }

    /// Hands over the packet channel. Dropping it stops the capture thread.
    #[must_use]
    pub fn into_receiver(self) -> mpsc::Receiver<CapturedPacket> {
        self.receiver
    }
}

fn capture_loop(
    mut capture: Capture<Active>,
    device: &str,
    link_type: i32,
    tx: &mpsc::Sender<CapturedPacket>,
) {
    loop {
        if tx.is_closed() {
            break;
        }
        match capture.next_packet() {
            Ok(packet) => {
                let captured = CapturedPacket {
                    link_type,
                    data: packet.data.to_vec(),
                    timestamp: timestamp(
                        i64::from(packet.header.ts.tv_sec),
                        i64::from(packet.header.ts.tv_usec),
                    ),
                };
                match tx.try_send(captured) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::debug!(device, "packet channel full, dropping packet");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            Err(pcap::Error::TimeoutExpired) => {}
            Err(e) => {
                tracing::error!(device, error = %e, "capture failed");
                break;
            }
        }
    }
    tracing::info!(device, "capture stopped");
}

/// Converts a pcap timeval, treating the zero value as unstamped.
fn timestamp(secs: i64, micros: i64) -> Option<DateTime<Utc>> {
    if secs == 0 && micros == 0 {
        return None;
    }
    let nanos = u32::try_from(micros.clamp(0, 999_999) * 1_000).ok()?;
    DateTime::from_timestamp(secs, nanos)
}
