//! System-wide constants and default values.

use std::time::Duration;

/// Application name used in log output.
pub const APP_NAME: &str = "nodemapper";

/// Prefix for every environment variable the agent reads.
pub const ENV_PREFIX: &str = "NODEMAPPER";

/// Default mount point of the host's `/proc` inside the agent's container.
pub const DEFAULT_HOST_PROC_DIR: &str = "/hostproc";

/// Default GraphQL endpoint of the mapper service.
pub const DEFAULT_MAPPER_API_URL: &str = "http://mapper:9090/query";

/// Default interval between report cycles.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Default interval between pending-capture confirmation passes.
pub const DEFAULT_HOSTS_MAPPING_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Default timeout applied to each upstream report call.
pub const DEFAULT_CALLS_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for the startup cloud detection.
pub const DEFAULT_CLOUD_DETECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default port of the Prometheus `/metrics` endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 2112;

/// Default port of the `/healthz` endpoint.
pub const DEFAULT_HEALTH_PORT: u16 = 9090;

/// Link-local address of the cloud instance metadata service.
pub const DEFAULT_CLOUD_METADATA_URL: &str = "http://169.254.169.254";

/// Capture device covering every interface on Linux.
pub const DEFAULT_CAPTURE_DEVICE: &str = "any";

/// Default bound on packets buffered between a capture thread and the loop.
pub const DEFAULT_PACKET_CHANNEL_CAPACITY: usize = 10_000;

/// Capture filter for DNS traffic.
pub const DNS_CAPTURE_FILTER: &str = "udp port 53";

/// Capture filter for TCP connection openings (SYN without ACK).
pub const TCP_SYN_CAPTURE_FILTER: &str = "tcp and tcp[tcpflags] == tcp-syn";

/// Environment variable holding a process's hostname.
pub const HOSTNAME_ENV_VAR: &str = "HOSTNAME";

/// Environment variable holding a pod's namespace when injected via the downward API.
pub const POD_NAMESPACE_ENV_VAR: &str = "POD_NAMESPACE";

/// Hostname file written by the container runtime, relative to a process's root.
pub const CONTAINER_HOSTNAME_FILE: &str = "root/etc/hostname";

/// Service-account namespace file, relative to a process's root.
pub const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "root/var/run/secrets/kubernetes.io/serviceaccount/namespace";
