//! Fetch strategy selection.
//!
//! A pure [`classify`] decides how a URL is fetched; the
//! [`FetchStrategySelector`] then runs the chosen [`PageFetcher`] and turns
//! the raw response into a [`FetchedPage`]. Every path returns the same
//! shape, and every failure is one of the distinct fetch outcomes of
//! [`ProcessingFailure`].

pub mod headless;
pub mod html;
pub mod static_fetch;
pub mod transform;

pub use headless::HeadlessRenderer;
pub use html::PageContent;
pub use static_fetch::StaticFetcher;
pub use transform::{detect_platform, transform_url, SocialPlatform};

use crate::config::FetchConfig;
use crate::domain::EndpointClass;
use crate::error::{ProcessingFailure, Result};
use crate::metrics::{FetchMetrics, MetricsAccountant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FetchStrategy {
    Static,
    Headless,
    /// Rewrite to the canonical page URL, then render
    PlatformTransform(SocialPlatform),
}

/// Which fetcher actually produced the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FetcherKind {
    Static,
    Headless,
}

impl FetcherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetcherKind::Static => "static",
            FetcherKind::Headless => "headless",
        }
    }

    fn endpoint_class(&self) -> EndpointClass {
        match self {
            FetcherKind::Static => EndpointClass::FetchStatic,
            FetcherKind::Headless => EndpointClass::FetchHeadless,
        }
    }
}

/// Response body before content analysis
#[derive(Debug, Clone)]
pub struct RawPage {
    pub status: u16,
    pub body: String,
    pub final_url: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    fn kind(&self) -> FetcherKind;
    async fn fetch(&self, url: &str) -> std::result::Result<RawPage, ProcessingFailure>;
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchedPage {
    /// URL the fetch was asked for, after any platform rewrite
    pub source_url: String,
    pub final_url: String,
    pub fetched_at: DateTime<Utc>,
    pub strategy: FetchStrategy,
    pub fetched_with: FetcherKind,
    #[serde(skip)]
    pub html: String,
    pub text: String,
    pub links: Vec<String>,
    pub images: Vec<String>,
}

impl FetchedPage {
    pub fn platform(&self) -> Option<SocialPlatform> {
        match self.strategy {
            FetchStrategy::PlatformTransform(p) => Some(p),
            _ => None,
        }
    }
}

/// Decide how a URL is fetched. Pure: no I/O, no configuration beyond hosts.
pub fn classify(url: &Url, force_headless: bool, config: &FetchConfig) -> FetchStrategy {
    if let Some(platform) = detect_platform(url) {
        return FetchStrategy::PlatformTransform(platform);
    }
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let listed = config
        .headless_hosts
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{}", h)));
    if force_headless || listed {
        FetchStrategy::Headless
    } else {
        FetchStrategy::Static
    }
}

pub(crate) fn classify_status(status: u16) -> std::result::Result<(), ProcessingFailure> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(ProcessingFailure::FetchBlocked(format!("HTTP status {}", status))),
        _ => Err(ProcessingFailure::FetchError(format!("HTTP status {}", status))),
    }
}

pub(crate) fn transport_failure(err: &reqwest::Error, timeout: Duration) -> ProcessingFailure {
    if err.is_timeout() {
        ProcessingFailure::FetchTimeout(timeout.as_millis() as u64)
    } else {
        ProcessingFailure::FetchError(err.to_string())
    }
}

pub struct FetchStrategySelector {
    config: FetchConfig,
    static_fetcher: Arc<dyn PageFetcher>,
    headless: Option<Arc<dyn PageFetcher>>,
    accountant: Option<Arc<MetricsAccountant>>,
}

impl FetchStrategySelector {
    pub fn new(config: FetchConfig, static_fetcher: Arc<dyn PageFetcher>, headless: Option<Arc<dyn PageFetcher>>) -> Self {
        Self {
            config,
            static_fetcher,
            headless,
            accountant: None,
        }
    }

    /// Build the HTTP-backed fetchers; headless rendering only when an endpoint is configured.
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        let static_fetcher: Arc<dyn PageFetcher> = Arc::new(StaticFetcher::new(config)?);
        let headless: Option<Arc<dyn PageFetcher>> = match config.headless_url {
            Some(_) => Some(Arc::new(HeadlessRenderer::new(config)?)),
            None => None,
        };
        Ok(Self::new(config.clone(), static_fetcher, headless))
    }

    pub fn with_accountant(mut self, accountant: Arc<MetricsAccountant>) -> Self {
        self.accountant = Some(accountant);
        self
    }

    #[instrument(skip(self), fields(strategy))]
    pub async fn fetch(&self, url: &str, force_headless: bool) -> std::result::Result<FetchedPage, ProcessingFailure> {
        let parsed = Url::parse(url).map_err(|e| ProcessingFailure::FetchError(format!("invalid url: {e}")))?;
        let strategy = classify(&parsed, force_headless, &self.config);
        tracing::Span::current().record("strategy", tracing::field::debug(&strategy));

        let source_url = match strategy {
            FetchStrategy::PlatformTransform(platform) => {
                let rewritten = transform_url(url).map_err(|e| ProcessingFailure::FetchError(e.to_string()))?;
                if rewritten != url {
                    FetchMetrics::record_url_transformed();
                    info!(from = url, to = %rewritten, platform = platform.as_str(), "Rewrote social URL");
                }
                rewritten
            }
            _ => url.to_string(),
        };

        let fetcher = match (strategy, &self.headless) {
            (FetchStrategy::Static, _) | (_, None) => self.static_fetcher.clone(),
            (_, Some(headless)) => headless.clone(),
        };
        if strategy != FetchStrategy::Static && self.headless.is_none() {
            debug!(url = %source_url, "No headless renderer configured, falling back to static fetch");
        }

        let (raw, mut content) = self.run(fetcher.as_ref(), &source_url).await?;

        let (raw, fetched_with) = if fetcher.kind() == FetcherKind::Static
            && html::needs_rendering(&content, &raw.body, self.config.min_text_chars)
        {
            match &self.headless {
                Some(headless) => {
                    FetchMetrics::record_render_upgrade();
                    info!(url = %source_url, "Static page looks client-rendered, re-fetching headless");
                    let (rendered, rendered_content) = self.run(headless.as_ref(), &source_url).await?;
                    content = rendered_content;
                    (rendered, FetcherKind::Headless)
                }
                None => (raw, FetcherKind::Static),
            }
        } else {
            (raw, fetcher.kind())
        };

        if let Some(signature) = html::detect_login_wall(&content, &self.config.login_wall_signatures) {
            warn!(url = %source_url, signature = %signature, "Login wall detected");
            FetchMetrics::record_failure(fetched_with.as_str(), "fetch_blocked");
            return Err(ProcessingFailure::FetchBlocked(format!("login wall: {}", signature)));
        }

        Ok(FetchedPage {
            source_url,
            final_url: raw.final_url,
            fetched_at: Utc::now(),
            strategy,
            fetched_with,
            html: raw.body,
            text: content.text,
            links: content.links,
            images: content.images,
        })
    }

    async fn run(
        &self,
        fetcher: &dyn PageFetcher,
        url: &str,
    ) -> std::result::Result<(RawPage, PageContent), ProcessingFailure> {
        let kind = fetcher.kind();
        let started = Instant::now();
        let result = fetcher.fetch(url).await;
        let elapsed = started.elapsed();

        if let Some(accountant) = &self.accountant {
            accountant.record(kind.endpoint_class(), elapsed, result.is_ok()).await;
        }

        match result {
            Ok(raw) => {
                FetchMetrics::record_success(kind.as_str(), elapsed.as_secs_f64(), raw.body.len());
                let base = Url::parse(&raw.final_url)
                    .or_else(|_| Url::parse(url))
                    .map_err(|e| ProcessingFailure::FetchError(format!("invalid url: {e}")))?;
                let content = PageContent::parse(&raw.body, &base);
                Ok((raw, content))
            }
            Err(failure) => {
                FetchMetrics::record_failure(kind.as_str(), failure.label());
                warn!(url, fetcher = kind.as_str(), failure = failure.label(), "Fetch failed: {}", failure);
                Err(failure)
            }
        }
    }
}
