// Page fetcher - retrieves the raw post page over HTTP

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use super::errors::{ResolveError, SourceDiagnostics};
use super::utils;

/// Trait for anything that can hand back a page body for a post URL
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, ResolveError>;
}

/// reqwest-backed fetcher with a hard per-request timeout
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(
        user_agent: &str,
        proxy: Option<&str>,
        fetch_timeout: Duration,
    ) -> Result<Self, ResolveError> {
        Ok(Self {
            client: utils::build_http_client(user_agent, proxy, Some(fetch_timeout))?,
        })
    }

    /// Raw body of an arbitrary URL (debug surface only)
    pub async fn fetch_raw(&self, url: &str) -> Result<(u16, String), ResolveError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ResolveError> {
        tracing::debug!(url, "fetching post page");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(ResolveError::NotFound(SourceDiagnostics::default()))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(ResolveError::Fetch("rate limited by upstream (429)".to_string()))
            }
            status if !status.is_success() => {
                return Err(ResolveError::Fetch(format!("upstream returned {}", status)))
            }
            _ => {}
        }

        let body = response.text().await?;
        tracing::debug!(url, bytes = body.len(), "fetched post page");
        Ok(body)
    }
}
