//! Cloud environment detection via the instance metadata service (IMDSv2).

use std::time::Duration;

use serde::Deserialize;

use nodemapper_common::types::CloudContext;

const TOKEN_PATH: &str = "/latest/api/token";
const IDENTITY_DOCUMENT_PATH: &str = "/latest/dynamic/instance-identity/document";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECONDS: &str = "60";

#[derive(Debug, Deserialize)]
struct IdentityDocument {
    region: Option<String>,
}

/// Queries the metadata service at `base_url`, giving up after `timeout`.
///
/// Returns `None` when the service is unreachable or answers unexpectedly;
/// not running on AWS is not an error.
pub async fn detect(base_url: &str, timeout: Duration) -> Option<CloudContext> {
    match tokio::time::timeout(timeout, fetch(base_url, timeout)).await {
        Ok(Ok(cloud)) => {
            tracing::info!(provider = %cloud.provider, region = ?cloud.region, "detected cloud environment");
            Some(cloud)
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "cloud detection failed, assuming no cloud");
            None
        }
        Err(_) => {
            tracing::debug!(?timeout, "cloud detection timed out, assuming no cloud");
            None
        }
    }
}

async fn fetch(base_url: &str, timeout: Duration) -> reqwest::Result<CloudContext> {
    let base = base_url.trim_end_matches('/');
    let http = reqwest::Client::builder().timeout(timeout).build()?;

    let token = http
        .put(format!("{base}{TOKEN_PATH}"))
        .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let document: IdentityDocument = http
        .get(format!("{base}{IDENTITY_DOCUMENT_PATH}"))
        .header(TOKEN_HEADER, token.trim())
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(CloudContext {
        provider: "aws".to_string(),
        region: document.region,
    })
}
