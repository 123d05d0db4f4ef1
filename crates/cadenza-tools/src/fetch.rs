//! Buffered HTTP fetch with a hard redirect bound.
//!
//! Redirects are followed manually so that exceeding the bound surfaces as
//! `TooManyRedirects` rather than disappearing into a generic client
//! error. No retries happen here; the catalog cache's stale-fallback is
//! the only retry-equivalent behavior in the system.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, redirect, Client};
use url::Url;

use crate::error::ToolError;

pub const REDIRECT_LIMIT: usize = 5;

/// Seam between the network and everything that consumes fetched bytes.
/// The installer and catalog cache take a `Fetcher` so tests can supply
/// canned responses.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_buffer(&self, url: &str) -> Result<Vec<u8>, ToolError>;
}

pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ToolError> {
        let client = Client::builder()
            .user_agent("cadenza-tools")
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| ToolError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self { client, timeout })
    }

    async fn follow(&self, url: &str) -> Result<Vec<u8>, ToolError> {
        let mut current = Url::parse(url)
            .map_err(|e| ToolError::Network(format!("invalid url {url}: {e}")))?;

        // One initial request plus up to REDIRECT_LIMIT followed hops.
        for _ in 0..=REDIRECT_LIMIT {
            let resp = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| ToolError::Network(format!("GET {current} failed: {e}")))?;
            let status = resp.status();

            if status.is_redirection() {
                let location = resp
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| {
                        ToolError::Network(format!(
                            "GET {current} returned {status} without a Location header"
                        ))
                    })?;
                current = current.join(location).map_err(|e| {
                    ToolError::Network(format!("invalid redirect target {location}: {e}"))
                })?;
                continue;
            }

            if !status.is_success() {
                return Err(ToolError::Network(format!(
                    "GET {current} failed with status {status}"
                )));
            }

            let body = resp
                .bytes()
                .await
                .map_err(|e| ToolError::Network(format!("reading body of {current} failed: {e}")))?;
            return Ok(body.to_vec());
        }

        Err(ToolError::TooManyRedirects(url.to_string()))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_buffer(&self, url: &str) -> Result<Vec<u8>, ToolError> {
        match tokio::time::timeout(self.timeout, self.follow(url)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout("network fetch")),
        }
    }
}
