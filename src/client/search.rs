//! Listing search API client
//!
//! Provides `SearchClient` for the single GET request the extractor makes.

use super::ApiCredentials;
use crate::error::PipelineError;
use eyre::Result;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Client for the listing search endpoint.
///
/// Auth headers are attached to every request as client defaults, so they are
/// loaded once and never rebuilt per call.
///
/// # Example
/// ```no_run
/// use zillow_etl::client::{ApiCredentials, SearchClient};
/// use url::Url;
///
/// # async fn example() -> eyre::Result<()> {
/// let url = Url::parse("https://zillow56.p.rapidapi.com/search")?;
/// let credentials = ApiCredentials::read("config_api.json")?;
/// let client = SearchClient::try_new(url, credentials)?;
///
/// let body = client.search("houston, tx").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct SearchClient {
    client: Client,
    url: Url,
}

impl SearchClient {
    /// Request timeout for the search call
    pub const TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new client for `url` sending `credentials` with every request
    ///
    /// # Errors
    /// Returns an error if the credentials aren't valid headers or the HTTP
    /// client cannot be built
    pub fn try_new(url: Url, credentials: ApiCredentials) -> Result<Self> {
        let headers = credentials.to_header_map()?;
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Self::TIMEOUT)
            .build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fetch the raw response body for a location query
    ///
    /// # Errors
    /// - `Request` on transport failure or a non-success status
    pub async fn search_raw(&self, location: &str) -> Result<Vec<u8>> {
        log::debug!("GET {} location={}", self.url, location);

        let response = self
            .client
            .get(self.url.clone())
            .query(&[("location", location)])
            .send()
            .await
            .map_err(|e| PipelineError::Request {
                url: self.url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Request {
                url: self.url.to_string(),
                reason: format!("{}: {}", status, body),
            }
            .into());
        }

        let bytes = response.bytes().await.map_err(|e| PipelineError::Request {
            url: self.url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    /// Fetch and decode the search response
    ///
    /// # Errors
    /// - `Request` on transport failure or a non-success status
    /// - `Decode` when the body is not JSON
    pub async fn search(&self, location: &str) -> Result<Value> {
        let body = self.search_raw(location).await?;
        let value: Value = serde_json::from_slice(&body).map_err(|e| PipelineError::Decode {
            source_name: self.url.to_string(),
            reason: e.to_string(),
        })?;
        log::debug!("Decoded {} byte response from {}", body.len(), self.url);
        Ok(value)
    }
}

impl std::fmt::Display for SearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}
