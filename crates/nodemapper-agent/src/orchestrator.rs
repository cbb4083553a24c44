//! The agent's single event loop.
//!
//! One task owns the resolver, both sniffers, the socket scanner and their
//! collectors, so none of them needs locking. Reports leave the loop as
//! drained snapshots on tracked tasks that shutdown waits for.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use nodemapper_capture::{CaptureDirection, CapturedPacket, PacketStream};
use nodemapper_collectors::{DnsSniffer, SocketScanner, TcpSniffer};
use nodemapper_common::config::AgentConfig;
use nodemapper_common::constants;
use nodemapper_common::error::{MapperError, Result};
use nodemapper_common::types::{CaptureSource, CloudContext, RecordedDestinationsForSrc};
use nodemapper_identity::IpResolver;

use crate::metrics::{self, ReportMetrics};
use crate::report::{self, ReportClient};

/// Packet channels feeding the event loop. A `None` channel is never polled.
#[derive(Debug, Default)]
pub struct PacketStreams {
    /// DNS response packets.
    pub dns: Option<mpsc::Receiver<CapturedPacket>>,
    /// Inbound TCP SYN packets.
    pub tcp: Option<mpsc::Receiver<CapturedPacket>>,
}

impl PacketStreams {
    /// Opens the live captures enabled in `config`.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Capture` if any enabled capture cannot be set up.
    pub fn open(config: &AgentConfig) -> Result<Self> {
        let open = |filter: &str, direction: CaptureDirection| {
            PacketStream::open(
                &config.capture_device,
                filter,
                direction,
                config.packet_channel_capacity,
            )
            .map(PacketStream::into_receiver)
        };

        let dns = config
            .enable_dns
            .then(|| open(constants::DNS_CAPTURE_FILTER, CaptureDirection::InOut))
            .transpose()?;
        let tcp = config
            .enable_tcp
            .then(|| open(constants::TCP_SYN_CAPTURE_FILTER, CaptureDirection::In))
            .transpose()?;
        Ok(Self { dns, tcp })
    }
}

/// Snapshots drained in one report cycle.
#[derive(Debug, Default)]
struct ReportBatches {
    dns: Vec<RecordedDestinationsForSrc>,
    tcp: Vec<RecordedDestinationsForSrc>,
    socket: Vec<RecordedDestinationsForSrc>,
}

/// Owns every producer and drives capture, refresh and report.
#[derive(Debug)]
pub struct Orchestrator<R, C> {
    config: AgentConfig,
    resolver: R,
    client: Arc<C>,
    cloud: Option<CloudContext>,
    metrics: Option<Arc<ReportMetrics>>,
    reports: TaskTracker,
    dns: DnsSniffer,
    tcp: TcpSniffer,
    socket_scanner: SocketScanner,
}

impl<R, C> Orchestrator<R, C>
where
    R: IpResolver,
    C: ReportClient,
{
    /// Creates an orchestrator. `cloud` is attached to every report.
    #[must_use]
    pub fn new(config: AgentConfig, resolver: R, client: C, cloud: Option<CloudContext>) -> Self {
        let socket_scanner = SocketScanner::new(config.host_proc_dir.clone());
        Self {
            config,
            resolver,
            client: Arc::new(client),
            cloud,
            metrics: None,
            reports: TaskTracker::new(),
            dns: DnsSniffer::new(),
            tcp: TcpSniffer::new(),
            socket_scanner,
        }
    }

    /// Counts connections the mapper accepts into `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ReportMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Opens the configured captures and runs until `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Capture` if a capture cannot be opened or stops.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let streams = PacketStreams::open(&self.config)?;
        self.run_with_streams(streams, token).await
    }

    /// Runs the event loop over the given packet channels until `token` is
    /// cancelled. Pending captures are discarded on cancellation; reports
    /// already handed off get up to one call timeout to finish.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Capture` if a packet channel closes.
    pub async fn run_with_streams(
        mut self,
        streams: PacketStreams,
        token: CancellationToken,
    ) -> Result<()> {
        let PacketStreams {
            dns: mut dns_rx,
            tcp: mut tcp_rx,
        } = streams;
        let refresh_every = self.config.hosts_mapping_refresh_interval;
        let mut dns_refresh = ticker(refresh_every);
        let mut tcp_refresh = ticker(refresh_every);
        let mut report = ticker(self.config.report_interval);

        if let Err(e) = self.resolver.refresh() {
            tracing::warn!(error = %e, "initial IP mapping refresh failed");
        }
        tracing::info!(
            dns = dns_rx.is_some(),
            tcp = tcp_rx.is_some(),
            socket_scanner = self.config.enable_socket_scanner,
            report_interval = ?self.config.report_interval,
            "event loop started"
        );

        let outcome = loop {
            tokio::select! {
                () = token.cancelled() => {
                    tracing::info!("event loop stopping");
                    break Ok(());
                }
                packet = recv(&mut dns_rx) => match packet {
                    Some(packet) => self.dns.handle_packet(&packet, &self.resolver),
                    None => break Err(self.stream_closed(CaptureSource::Dns)),
                },
                packet = recv(&mut tcp_rx) => match packet {
                    Some(packet) => self.tcp.handle_packet(&packet, &self.resolver),
                    None => break Err(self.stream_closed(CaptureSource::TcpSyn)),
                },
                _ = dns_refresh.tick() => self.refresh_dns(),
                _ = tcp_refresh.tick() => self.refresh_tcp(),
                _ = report.tick() => self.report_cycle(),
            }
        };
        self.finish_reports().await;
        outcome
    }

    fn refresh_dns(&mut self) {
        match self.dns.refresh_hosts_mapping(&mut self.resolver) {
            Ok(stats) => tracing::trace!(?stats, "DNS hosts mapping refreshed"),
            Err(e) => tracing::warn!(error = %e, "DNS hosts mapping refresh failed"),
        }
    }

    fn refresh_tcp(&mut self) {
        match self.tcp.refresh_hosts_mapping(&mut self.resolver) {
            Ok(stats) => tracing::trace!(?stats, "TCP hosts mapping refreshed"),
            Err(e) => tracing::warn!(error = %e, "TCP hosts mapping refresh failed"),
        }
    }

    /// Scans, flushes pending captures, drains every collector and hands
    /// the snapshots to a tracked reporting task.
    fn report_cycle(&mut self) {
        if self.config.enable_socket_scanner {
            if let Err(e) = self.socket_scanner.scan() {
                tracing::warn!(error = %e, "socket scan failed");
            }
        }
        self.refresh_dns();
        self.refresh_tcp();

        let batches = ReportBatches {
            dns: self.dns.collect_results(),
            tcp: self.tcp.collect_results(),
            socket: self.socket_scanner.collect_results(),
        };
        tracing::debug!(
            dns = batches.dns.len(),
            tcp = batches.tcp.len(),
            socket = batches.socket.len(),
            "drained collectors"
        );

        let client = Arc::clone(&self.client);
        let metrics = self.metrics.clone();
        let cloud = self.cloud.clone();
        let timeout = self.config.calls_timeout;
        let _report = self.reports.spawn(async move {
            let report = Report {
                client: client.as_ref(),
                metrics: metrics.as_deref(),
                cloud: cloud.as_ref(),
                timeout,
            };
            let _ = tokio::join!(
                report.send(CaptureSource::Dns, batches.dns),
                report.send(CaptureSource::TcpSyn, batches.tcp),
                report.send(CaptureSource::SocketScan, batches.socket),
            );
        });
    }

    /// Stops accepting report tasks and waits for those in flight. Each
    /// call is already bounded by `calls_timeout`, so the wait is too.
    async fn finish_reports(&self) {
        self.reports.close();
        if self.reports.is_empty() {
            return;
        }
        let bound = self.config.calls_timeout + SHUTDOWN_GRACE;
        tracing::info!(in_flight = self.reports.len(), "waiting for reports in flight");
        if tokio::time::timeout(bound, self.reports.wait()).await.is_err() {
            tracing::warn!(?bound, "reports still in flight at shutdown, abandoning them");
        }
    }

    fn stream_closed(&self, source: CaptureSource) -> MapperError {
        MapperError::Capture {
            device: self.config.capture_device.clone(),
            message: format!("{source} capture stream closed"),
        }
    }
}

/// Extra time shutdown allows past `calls_timeout` for reports in flight.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Everything one reporting task shares across its three sends.
struct Report<'a, C> {
    client: &'a C,
    metrics: Option<&'a ReportMetrics>,
    cloud: Option<&'a CloudContext>,
    timeout: Duration,
}

impl<C: ReportClient> Report<'_, C> {
    /// Sends one non-empty batch under the call timeout; failures are logged
    /// and the batch is dropped.
    async fn send(&self, source: CaptureSource, results: Vec<RecordedDestinationsForSrc>) {
        if results.is_empty() {
            return;
        }
        let count = results.len();
        let connections = metrics::connection_count(&results);
        let call = report::report(self.client, source, results, self.cloud.cloned());
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(())) => {
                if let Some(metrics) = self.metrics {
                    metrics.record_reported(source, connections);
                }
                tracing::debug!(%source, sources = count, connections, "report sent");
            }
            Ok(Err(e)) => tracing::error!(%source, sources = count, error = %e, "report failed"),
            Err(_) => {
                tracing::error!(%source, sources = count, timeout = ?self.timeout, "report timed out");
            }
        }
    }
}

async fn recv(rx: &mut Option<mpsc::Receiver<CapturedPacket>>) -> Option<CapturedPacket> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

/// Interval whose first tick is one period from now.
fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
