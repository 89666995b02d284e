use super::{classify_status, transport_failure, FetcherKind, PageFetcher, RawPage};
use crate::config::FetchConfig;
use crate::error::{ProcessingFailure, Result, ScraperError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Renders pages through a Browserless-compatible `/content` endpoint.
///
/// Navigation is bounded by the page-load timeout and scripts get
/// `script_budget_ms` after load before the DOM is serialised.
pub struct HeadlessRenderer {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    page_load_timeout: Duration,
    script_budget: Duration,
}

impl HeadlessRenderer {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let base_url = config
            .headless_url
            .as_deref()
            .ok_or_else(|| ScraperError::Config("fetch.headless_url is not set".into()))?;
        let page_load_timeout = Duration::from_secs(config.page_load_timeout_secs.max(1));
        let script_budget = Duration::from_millis(config.script_budget_ms);
        // The renderer's own budget plus headroom for the round trip
        let client = reqwest::Client::builder()
            .timeout(page_load_timeout + script_budget + Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: config.headless_token.clone(),
            page_load_timeout,
            script_budget,
        })
    }

    fn endpoint(&self) -> String {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(token) = &self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }
}

#[async_trait]
impl PageFetcher for HeadlessRenderer {
    fn kind(&self) -> FetcherKind {
        FetcherKind::Headless
    }

    async fn fetch(&self, url: &str) -> std::result::Result<RawPage, ProcessingFailure> {
        let body = serde_json::json!({
            "url": url,
            "gotoOptions": {
                "timeout": self.page_load_timeout.as_millis() as u64,
                "waitUntil": "networkidle2",
            },
            "waitForTimeout": self.script_budget.as_millis() as u64,
        });

        let resp = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_failure(&e, self.page_load_timeout + self.script_budget))?;

        let status = resp.status().as_u16();
        // Browserless reports navigation timeouts as 408
        if status == 408 || status == 504 {
            return Err(ProcessingFailure::FetchTimeout(self.page_load_timeout.as_millis() as u64));
        }
        classify_status(status)?;

        let html = resp
            .text()
            .await
            .map_err(|e| transport_failure(&e, self.page_load_timeout))?;
        debug!(url, bytes = html.len(), "Headless render complete");
        Ok(RawPage {
            status,
            body: html,
            final_url: url.to_string(),
        })
    }
}
