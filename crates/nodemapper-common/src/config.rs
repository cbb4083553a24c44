//! Runtime configuration model for the node agent.
//!
//! The configuration is read once at startup; there is no hot reload.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{MapperError, Result};

/// Root configuration for the node agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Host `/proc` mount used for process and socket scans.
    pub host_proc_dir: PathBuf,
    /// GraphQL endpoint of the mapper service.
    pub mapper_api_url: String,
    /// Interval between report cycles.
    pub report_interval: Duration,
    /// Interval between pending-capture confirmation passes.
    pub hosts_mapping_refresh_interval: Duration,
    /// Timeout applied to each upstream report call.
    pub calls_timeout: Duration,
    /// Timeout for the startup cloud detection.
    pub cloud_detect_timeout: Duration,
    /// Base URL of the cloud instance metadata service.
    pub cloud_metadata_url: String,
    /// Whether the periodic socket-table scan runs.
    pub enable_socket_scanner: bool,
    /// Whether DNS responses are captured.
    pub enable_dns: bool,
    /// Whether inbound TCP SYNs are captured.
    pub enable_tcp: bool,
    /// Device the live captures are opened on.
    pub capture_device: String,
    /// Bound on packets buffered between a capture thread and the event loop.
    pub packet_channel_capacity: usize,
    /// Port serving Prometheus metrics.
    pub metrics_port: u16,
    /// Port serving the liveness endpoint.
    pub health_port: u16,
    /// Enables debug-level logging.
    pub debug: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host_proc_dir: PathBuf::from(constants::DEFAULT_HOST_PROC_DIR),
            mapper_api_url: constants::DEFAULT_MAPPER_API_URL.to_string(),
            report_interval: constants::DEFAULT_REPORT_INTERVAL,
            hosts_mapping_refresh_interval: constants::DEFAULT_HOSTS_MAPPING_REFRESH_INTERVAL,
            calls_timeout: constants::DEFAULT_CALLS_TIMEOUT,
            cloud_detect_timeout: constants::DEFAULT_CLOUD_DETECT_TIMEOUT,
            cloud_metadata_url: constants::DEFAULT_CLOUD_METADATA_URL.to_string(),
            enable_socket_scanner: true,
            enable_dns: true,
            enable_tcp: true,
            capture_device: constants::DEFAULT_CAPTURE_DEVICE.to_string(),
            packet_channel_capacity: constants::DEFAULT_PACKET_CHANNEL_CAPACITY,
            metrics_port: constants::DEFAULT_METRICS_PORT,
            health_port: constants::DEFAULT_HEALTH_PORT,
            debug: false,
        }
    }
}

impl AgentConfig {
    /// Checks that every interval, timeout, and capacity is usable.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("report-interval", self.report_interval),
            (
                "hosts-mapping-refresh-interval",
                self.hosts_mapping_refresh_interval,
            ),
            ("calls-timeout", self.calls_timeout),
            ("cloud-detect-timeout", self.cloud_detect_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(MapperError::Config {
                    message: format!("{name} must be greater than zero"),
                });
            }
        }
        if self.packet_channel_capacity == 0 {
            return Err(MapperError::Config {
                message: "packet-channel-capacity must be greater than zero".into(),
            });
        }
        if self.metrics_port != 0 && self.metrics_port == self.health_port {
            return Err(MapperError::Config {
                message: format!("metrics-port and health-port both use {}", self.metrics_port),
            });
        }
        if self.capture_device.trim().is_empty() && (self.enable_dns || self.enable_tcp) {
            return Err(MapperError::Config {
                message: "capture-device must not be empty while capture is enabled".into(),
            });
        }
        Ok(())
    }
}

/// Parses duration strings like "500ms", "10s", "2m", "1h" or bare seconds.
///
/// # Errors
///
/// Returns `MapperError::Config` if the value has no number or an unknown unit.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || MapperError::Config {
        message: format!("invalid duration: {s:?}"),
    };
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num_str, unit) = s.split_at(split);
    let value: u64 = num_str.parse().map_err(|_| invalid())?;
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(invalid()),
    }
}
