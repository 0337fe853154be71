//! Raw HTTP GET boundary for remote config documents and program artifacts.
//!
//! Fetchers never retry; callers decide what a failed fetch means.

use std::time::Duration;

use async_trait::async_trait;

use crate::relay_error::RelayError;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const FETCH_USER_AGENT: &str = "forward-relay/remote-fetch";

#[async_trait]
/// Capability to download remote content.
pub trait RemoteFetcher: Send + Sync {
    async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, RelayError>;

    async fn fetch_text(&self, url: &str, timeout: Duration) -> Result<String, RelayError> {
        let bytes = self.fetch_bytes(url, timeout).await?;
        String::from_utf8(bytes).map_err(|error| RelayError::Fetch {
            url: url.to_string(),
            status: Some(200),
            detail: format!("response body is not utf-8: {error}"),
        })
    }
}

#[derive(Debug, Clone)]
/// `reqwest`-backed fetcher; only HTTP 200 counts as success.
pub struct HttpRemoteFetcher {
    http: reqwest::Client,
}

impl HttpRemoteFetcher {
    pub fn new() -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .user_agent(FETCH_USER_AGENT)
            .build()
            .map_err(|error| {
                RelayError::Config(format!("failed to create remote fetch client: {error}"))
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl RemoteFetcher for HttpRemoteFetcher {
    async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, RelayError> {
        let transport_error = |error: reqwest::Error| RelayError::Fetch {
            url: url.to_string(),
            status: error.status().map(|status| status.as_u16()),
            detail: error.to_string(),
        };
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(RelayError::Fetch {
                url: url.to_string(),
                status: Some(status.as_u16()),
                detail: format!("HTTP {}", status.as_u16()),
            });
        }
        let body = response.bytes().await.map_err(transport_error)?;
        Ok(body.to_vec())
    }
}
