//! Upstream report client.
//!
//! The mapper service is a GraphQL endpoint. Each fact source has its own
//! mutation; every batch carries the node's cloud context when known.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};

use nodemapper_common::error::{MapperError, Result};
use nodemapper_common::types::{CaptureSource, CloudContext, RecordedDestinationsForSrc};

const REPORT_CAPTURE_RESULTS: &str = "mutation ReportCaptureResults($results: CaptureResults!) {\n  reportCaptureResults(results: $results)\n}";
const REPORT_TCP_CAPTURE_RESULTS: &str = "mutation ReportTCPCaptureResults($results: CaptureTCPResults!) {\n  reportTCPCaptureResults(results: $results)\n}";
const REPORT_SOCKET_SCAN_RESULTS: &str = "mutation ReportSocketScanResults($results: SocketScanResults!) {\n  reportSocketScanResults(results: $results)\n}";
const HEALTH: &str = "query Health {\n  health\n}";

/// Ships drained snapshots to the aggregator.
///
/// Implementations must not retry internally beyond what fits in the
/// caller's timeout; a failed batch is dropped by the caller.
pub trait ReportClient: Send + Sync + 'static {
    /// Reports DNS-derived facts.
    fn report_capture_results(
        &self,
        results: Vec<RecordedDestinationsForSrc>,
        cloud: Option<CloudContext>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Reports TCP SYN-derived facts.
    fn report_tcp_capture_results(
        &self,
        results: Vec<RecordedDestinationsForSrc>,
        cloud: Option<CloudContext>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Reports socket-scan-derived facts.
    fn report_socket_scan_results(
        &self,
        results: Vec<RecordedDestinationsForSrc>,
        cloud: Option<CloudContext>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Dispatches a batch to the report call matching its source.
///
/// # Errors
///
/// Propagates the client's error.
pub async fn report<C: ReportClient>(
    client: &C,
    source: CaptureSource,
    results: Vec<RecordedDestinationsForSrc>,
    cloud: Option<CloudContext>,
) -> Result<()> {
    match source {
        CaptureSource::Dns => client.report_capture_results(results, cloud).await,
        CaptureSource::TcpSyn => client.report_tcp_capture_results(results, cloud).await,
        CaptureSource::SocketScan => client.report_socket_scan_results(results, cloud).await,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultsInput<'a> {
    results: &'a [RecordedDestinationsForSrc],
    #[serde(skip_serializing_if = "Option::is_none")]
    cloud: Option<&'a CloudContext>,
}

/// Builds the GraphQL request body for a report mutation.
///
/// # Errors
///
/// Returns `MapperError::Serialization` if the batch cannot be encoded.
pub fn mutation_body(
    source: CaptureSource,
    results: &[RecordedDestinationsForSrc],
    cloud: Option<&CloudContext>,
) -> Result<Value> {
    let (operation, query) = match source {
        CaptureSource::Dns => ("ReportCaptureResults", REPORT_CAPTURE_RESULTS),
        CaptureSource::TcpSyn => ("ReportTCPCaptureResults", REPORT_TCP_CAPTURE_RESULTS),
        CaptureSource::SocketScan => ("ReportSocketScanResults", REPORT_SOCKET_SCAN_RESULTS),
    };
    let input = serde_json::to_value(ResultsInput { results, cloud })?;
    Ok(json!({
        "operationName": operation,
        "query": query,
        "variables": { "results": input },
    }))
}

/// GraphQL-over-HTTP client for the mapper service.
#[derive(Debug, Clone)]
pub struct MapperClient {
    http: reqwest::Client,
    url: String,
}

impl MapperClient {
    /// Creates a client for `url` whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Report` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MapperError::Report {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Endpoint this client posts to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Checks that the mapper answers its health query.
    ///
    /// # Errors
    ///
    /// Returns `MapperError::Report` if the request fails or is rejected.
    pub async fn health(&self) -> Result<()> {
        self.execute(json!({ "operationName": "Health", "query": HEALTH }))
            .await
    }

    async fn send(
        &self,
        source: CaptureSource,
        results: &[RecordedDestinationsForSrc],
        cloud: Option<&CloudContext>,
    ) -> Result<()> {
        let body = mutation_body(source, results, cloud)?;
        self.execute(body).await?;
        tracing::debug!(%source, sources = results.len(), url = %self.url, "reported results");
        Ok(())
    }

    async fn execute(&self, body: Value) -> Result<()> {
        let report_err = |message: String| MapperError::Report { message };

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| report_err(format!("request to {} failed: {e}", self.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(report_err(format!("{} returned status {status}", self.url)));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| report_err(format!("invalid response body: {e}")))?;
        match payload.get("errors") {
            Some(errors) if !errors.is_null() => {
                Err(report_err(format!("mapper rejected request: {errors}")))
            }
            _ => Ok(()),
        }
    }
}

impl ReportClient for MapperClient {
    async fn report_capture_results(
        &self,
        results: Vec<RecordedDestinationsForSrc>,
        cloud: Option<CloudContext>,
    ) -> Result<()> {
        self.send(CaptureSource::Dns, &results, cloud.as_ref()).await
    }

    async fn report_tcp_capture_results(
        &self,
        results: Vec<RecordedDestinationsForSrc>,
        cloud: Option<CloudContext>,
    ) -> Result<()> {
        self.send(CaptureSource::TcpSyn, &results, cloud.as_ref())
            .await
    }

    async fn report_socket_scan_results(
        &self,
        results: Vec<RecordedDestinationsForSrc>,
        cloud: Option<CloudContext>,
    ) -> Result<()> {
        self.send(CaptureSource::SocketScan, &results, cloud.as_ref())
            .await
    }
}
