//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};

use nodemapper_common::config::{AgentConfig, parse_duration};
use nodemapper_common::constants;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// nodemapper: per-node network mapping agent for Kubernetes.
#[derive(Parser, Debug)]
#[command(name = "nodemapper", version, about, long_about = None)]
pub struct Cli {
    /// Host /proc mount used for process and socket scans.
    #[arg(long, env = "NODEMAPPER_HOST_PROC_DIR", default_value = constants::DEFAULT_HOST_PROC_DIR)]
    pub host_proc_dir: PathBuf,

    /// GraphQL endpoint of the mapper service.
    #[arg(long, env = "NODEMAPPER_MAPPER_API_URL", default_value = constants::DEFAULT_MAPPER_API_URL)]
    pub mapper_api_url: String,

    /// Interval between report cycles.
    #[arg(long, env = "NODEMAPPER_REPORT_INTERVAL", default_value = "10s", value_parser = parse_duration)]
    pub report_interval: Duration,

    /// Interval between pending-capture confirmation passes.
    #[arg(long, env = "NODEMAPPER_HOSTS_MAPPING_REFRESH_INTERVAL", default_value = "500ms", value_parser = parse_duration)]
    pub hosts_mapping_refresh_interval: Duration,

    /// Timeout for each upstream report call.
    #[arg(long, env = "NODEMAPPER_CALLS_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub calls_timeout: Duration,

    /// Timeout for the startup cloud detection.
    #[arg(long, env = "NODEMAPPER_CLOUD_DETECT_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub cloud_detect_timeout: Duration,

    /// Base URL of the cloud instance metadata service.
    #[arg(long, env = "NODEMAPPER_CLOUD_METADATA_URL", default_value = constants::DEFAULT_CLOUD_METADATA_URL)]
    pub cloud_metadata_url: String,

    /// Run the periodic socket-table scan.
    #[arg(long, env = "NODEMAPPER_ENABLE_SOCKET_SCANNER", default_value_t = true, action = ArgAction::Set)]
    pub enable_socket_scanner: bool,

    /// Capture DNS responses.
    #[arg(long, env = "NODEMAPPER_ENABLE_DNS", default_value_t = true, action = ArgAction::Set)]
    pub enable_dns: bool,

    /// Capture inbound TCP SYNs.
    #[arg(long, env = "NODEMAPPER_ENABLE_TCP", default_value_t = true, action = ArgAction::Set)]
    pub enable_tcp: bool,

    /// Device the live captures are opened on.
    #[arg(long, env = "NODEMAPPER_CAPTURE_DEVICE", default_value = constants::DEFAULT_CAPTURE_DEVICE)]
    pub capture_device: String,

    /// Packets buffered between a capture thread and the event loop.
    #[arg(long, env = "NODEMAPPER_PACKET_CHANNEL_CAPACITY", default_value_t = constants::DEFAULT_PACKET_CHANNEL_CAPACITY)]
    pub packet_channel_capacity: usize,

    /// Port serving Prometheus metrics on `/metrics`.
    #[arg(long, env = "NODEMAPPER_METRICS_PORT", default_value_t = constants::DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Port serving the liveness endpoint on `/healthz`.
    #[arg(long, env = "NODEMAPPER_HEALTH_PORT", default_value_t = constants::DEFAULT_HEALTH_PORT)]
    pub health_port: u16,

    /// Enable debug logging.
    #[arg(long, env = "NODEMAPPER_DEBUG")]
    pub debug: bool,

    /// Log output format.
    #[arg(long, env = "NODEMAPPER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Converts parsed arguments into the agent configuration.
    #[must_use]
    pub fn into_config(self) -> AgentConfig {
        AgentConfig {
            host_proc_dir: self.host_proc_dir,
            mapper_api_url: self.mapper_api_url,
            report_interval: self.report_interval,
            hosts_mapping_refresh_interval: self.hosts_mapping_refresh_interval,
            calls_timeout: self.calls_timeout,
            cloud_detect_timeout: self.cloud_detect_timeout,
            cloud_metadata_url: self.cloud_metadata_url,
            enable_socket_scanner: self.enable_socket_scanner,
            enable_dns: self.enable_dns,
            enable_tcp: self.enable_tcp,
            capture_device: self.capture_device,
            packet_channel_capacity: self.packet_channel_capacity,
            metrics_port: self.metrics_port,
            health_port: self.health_port,
            debug: self.debug,
        }
    }
}
