use super::{classify_status, transport_failure, FetcherKind, PageFetcher, RawPage};
use crate::config::FetchConfig;
use crate::error::{ProcessingFailure, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Plain HTTP GET of the page, following redirects
pub struct StaticFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl StaticFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.static_timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Static
    }

    async fn fetch(&self, url: &str) -> std::result::Result<RawPage, ProcessingFailure> {
        let resp = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| transport_failure(&e, self.timeout))?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        classify_status(status)?;

        let body = resp.text().await.map_err(|e| transport_failure(&e, self.timeout))?;
        debug!(url, final_url = %final_url, bytes = body.len(), "Static fetch complete");
        Ok(RawPage { status, body, final_url })
    }
}
