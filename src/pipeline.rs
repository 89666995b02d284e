//! Worker pool driving candidates through Fetch, Extract, Consolidate and Promote.
//!
//! Each URL is processed sequentially by one worker; many workers run at once,
//! bounded by `pipeline.concurrency`. A failure in one URL is recorded against
//! that URL and never aborts the batch.

use crate::config::{Config, PipelineConfig};
use crate::consolidate::consolidate;
use crate::domain::{CandidateUrl, DiscoveredVia, ProcessingOutcome};
use crate::error::{ProcessingFailure, Result, ScraperError};
use crate::extraction::{select_profile, ExtractionEngine, ExtractionResult, OpenAiCompatibleProvider, RunMode};
use crate::fetch::html::is_same_site;
use crate::fetch::{FetchStrategySelector, FetchedPage};
use crate::frontier::UrlFrontier;
use crate::idempotency::content_fingerprint;
use crate::metrics::MetricsAccountant;
use crate::promotion::{Geocoder, NominatimGeocoder, Promoter};
use crate::storage::Storage;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    pub force_headless: bool,
    pub include_subdomains: bool,
    /// Enqueue same-site links found on the page
    pub follow_links: bool,
    /// Run AI extraction; when false the page is only fetched and mined for links
    pub extract: bool,
    pub mode: RunMode,
}

impl ProcessOptions {
    pub fn background() -> Self {
        Self {
            force_headless: false,
            include_subdomains: false,
            follow_links: true,
            extract: true,
            mode: RunMode::Background,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Succeeded,
    Failed,
    /// Transient fetch failure; goes back to the frontier with an attempt counted
    Transient,
    /// Fetched and mined for links without extraction
    FetchedOnly,
    Cancelled,
    TimedOut,
    /// Infrastructure error (storage and the like) while processing
    Errored,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlReport {
    pub url: String,
    pub source_url: Option<String>,
    pub status: UrlStatus,
    pub content_hash: Option<String>,
    pub schedule_id: Option<Uuid>,
    pub entries: usize,
    pub shows_created: usize,
    pub shows_updated: usize,
    pub links_enqueued: usize,
    pub failure: Option<ProcessingFailure>,
    pub error: Option<String>,
}

impl UrlReport {
    fn new(url: &str, status: UrlStatus) -> Self {
        Self {
            url: url.to_string(),
            source_url: None,
            status,
            content_hash: None,
            schedule_id: None,
            entries: 0,
            shows_created: 0,
            shows_updated: 0,
            links_enqueued: 0,
            failure: None,
            error: None,
        }
    }

    fn failed(url: &str, failure: ProcessingFailure) -> Self {
        let mut report = Self::new(url, UrlStatus::Failed);
        report.failure = Some(failure);
        report
    }

    /// Claim has to go back to the frontier once the run is over
    fn needs_settling(&self) -> bool {
        matches!(
            self.status,
            UrlStatus::Transient | UrlStatus::Cancelled | UrlStatus::TimedOut | UrlStatus::Errored
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub fetched_only: usize,
    /// Returned to the frontier unprocessed (transient failure, timeout, cancellation)
    pub released: usize,
    pub links_enqueued: usize,
    pub shows_created: usize,
}

impl RunSummary {
    fn add(&mut self, report: &UrlReport) {
        match report.status {
            UrlStatus::Succeeded => self.succeeded += 1,
            UrlStatus::Failed => self.failed += 1,
            UrlStatus::FetchedOnly => self.fetched_only += 1,
            _ => {}
        }
        self.links_enqueued += report.links_enqueued;
        self.shows_created += report.shows_created;
    }
}

/// First failure when every extraction pass failed
fn all_passes_failed(results: &[ExtractionResult]) -> Option<ProcessingFailure> {
    if results.is_empty() || results.iter().any(|r| r.outcome.is_ok()) {
        return None;
    }
    results.iter().find_map(|r| r.outcome.as_ref().err().cloned())
}

#[derive(Clone)]
pub struct Pipeline {
    frontier: Arc<UrlFrontier>,
    fetcher: Arc<FetchStrategySelector>,
    engine: Arc<ExtractionEngine>,
    promoter: Arc<Promoter>,
    storage: Arc<dyn Storage>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        frontier: Arc<UrlFrontier>,
        fetcher: Arc<FetchStrategySelector>,
        engine: Arc<ExtractionEngine>,
        promoter: Arc<Promoter>,
        storage: Arc<dyn Storage>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            frontier,
            fetcher,
            engine,
            promoter,
            storage,
            config,
        }
    }

    /// Wire up the HTTP-backed fetchers, provider and geocoder. Must be called
    /// inside a Tokio runtime (the extraction dispatchers are spawned here).
    pub fn from_config(config: &Config, storage: Arc<dyn Storage>) -> Result<Self> {
        let accountant = Arc::new(MetricsAccountant::new(storage.clone(), config.ai.latency_window));
        let fetcher = FetchStrategySelector::from_config(&config.fetch)?.with_accountant(accountant.clone());
        let provider = OpenAiCompatibleProvider::new(&config.ai).map_err(|e| ScraperError::Config(e.to_string()))?;
        let engine = ExtractionEngine::new(&config.ai, Arc::new(provider), accountant.clone());
        let geocoder: Arc<dyn Geocoder> =
            Arc::new(NominatimGeocoder::new(&config.geocode, &config.fetch)?.with_accountant(accountant));
        let promoter = Promoter::new(storage.clone(), Some(geocoder), config.pipeline.contradiction_threshold);
        let frontier = Arc::new(UrlFrontier::new(storage.clone(), config.pipeline.max_fetch_attempts));

        Ok(Self::new(
            frontier,
            Arc::new(fetcher),
            Arc::new(engine),
            Arc::new(promoter),
            storage,
            config.pipeline.clone(),
        ))
    }

    pub fn frontier(&self) -> Arc<UrlFrontier> {
        self.frontier.clone()
    }

    /// Process claimed candidates until the frontier is drained or `cancel` fires.
    ///
    /// Claims that need to go back to the frontier are settled after the run,
    /// so a run never picks up its own retries.
    #[instrument(skip(self, opts, cancel))]
    pub async fn run(&self, opts: ProcessOptions, cancel: CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut summary = RunSummary::default();
        let mut deferred = Vec::new();

        while !cancel.is_cancelled() {
            let batch = self.frontier.next_batch(self.config.batch_pull_size).await?;
            if batch.is_empty() {
                break;
            }
            summary.claimed += batch.len();
            info!(batch = batch.len(), "Processing batch");

            let handles: Vec<_> = batch
                .into_iter()
                .map(|candidate| {
                    let url = candidate.url.clone();
                    let this = self.clone();
                    let cancel = cancel.clone();
                    let semaphore = semaphore.clone();
                    let handle = tokio::spawn(async move {
                        let url = candidate.url.clone();
                        match semaphore.acquire_owned().await {
                            Ok(_permit) => this.process_guarded(candidate, opts, cancel).await,
                            Err(_) => UrlReport::new(&url, UrlStatus::Cancelled),
                        }
                    });
                    (url, handle)
                })
                .collect();

            for (url, handle) in handles {
                let report = match handle.await {
                    Ok(report) => report,
                    Err(e) => {
                        error!(url = %url, "Worker task failed: {}", e);
                        let mut report = UrlReport::new(&url, UrlStatus::Errored);
                        report.error = Some(e.to_string());
                        report
                    }
                };
                summary.add(&report);
                if report.needs_settling() {
                    deferred.push(report);
                }
            }
        }

        for report in &deferred {
            match self.settle(report).await {
                Ok(true) => summary.released += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => error!(url = %report.url, "Failed to return candidate to frontier: {}", e),
            }
        }

        info!(
            claimed = summary.claimed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            released = summary.released,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Pipeline run finished"
        );
        Ok(summary)
    }

    /// On-demand processing of one URL. A URL that was already parsed is reset
    /// first, since an explicit request is a forced reparse.
    #[instrument(skip(self, opts))]
    pub async fn process_url(&self, url: &str, opts: ProcessOptions) -> Result<UrlReport> {
        let (normalized, inserted) = self.frontier.enqueue(url, DiscoveredVia::ParseRequest).await?;
        let busy = || ScraperError::Api {
            message: format!("{} is already being processed", normalized),
        };
        if !inserted && self.frontier.get(&normalized).await?.has_been_parsed {
            match self.frontier.reset(&normalized).await {
                Err(ScraperError::IllegalTransition { .. }) => return Err(busy()),
                other => {
                    other?;
                }
            }
        }
        let candidate = self.frontier.claim(&normalized).await?.ok_or_else(busy)?;

        let report = self.process_guarded(candidate, opts, CancellationToken::new()).await;
        if report.needs_settling() {
            if let Err(e) = self.settle(&report).await {
                warn!(url = %report.url, "Failed to return candidate to frontier: {}", e);
            }
        }
        Ok(report)
    }

    /// Returns true if the candidate was released for a later run.
    async fn settle(&self, report: &UrlReport) -> Result<bool> {
        match (report.status, &report.failure) {
            (UrlStatus::Transient, Some(failure)) => {
                self.frontier.record_transient_failure(&report.url, failure.clone()).await
            }
            _ => {
                self.frontier.release(&report.url).await?;
                Ok(true)
            }
        }
    }

    async fn process_guarded(&self, candidate: CandidateUrl, opts: ProcessOptions, cancel: CancellationToken) -> UrlReport {
        let timeout = Duration::from_secs(self.config.item_timeout_secs.max(1));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(url = %candidate.url, "Processing cancelled");
                UrlReport::new(&candidate.url, UrlStatus::Cancelled)
            }
            result = tokio::time::timeout(timeout, self.process_candidate(&candidate, opts)) => match result {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    error!(url = %candidate.url, "Processing failed: {}", e);
                    let mut report = UrlReport::new(&candidate.url, UrlStatus::Errored);
                    report.error = Some(e.to_string());
                    report
                }
                Err(_) => {
                    warn!(url = %candidate.url, timeout_secs = timeout.as_secs(), "Processing timed out");
                    UrlReport::new(&candidate.url, UrlStatus::TimedOut)
                }
            }
        }
    }

    #[instrument(skip(self, candidate, opts), fields(url = %candidate.url))]
    async fn process_candidate(&self, candidate: &CandidateUrl, opts: ProcessOptions) -> Result<UrlReport> {
        let url = candidate.url.as_str();

        let page = match self.fetcher.fetch(url, opts.force_headless).await {
            Ok(page) => page,
            Err(failure) if failure.is_transient() => {
                warn!(failure = failure.label(), "Transient fetch failure: {}", failure);
                let mut report = UrlReport::new(url, UrlStatus::Transient);
                report.failure = Some(failure);
                return Ok(report);
            }
            Err(failure) => {
                self.frontier
                    .mark_processed(url, ProcessingOutcome::Failed(failure.clone()))
                    .await?;
                return Ok(UrlReport::failed(url, failure));
            }
        };

        let mut report = UrlReport::new(url, UrlStatus::Succeeded);
        report.source_url = Some(page.source_url.clone());
        let fingerprint = content_fingerprint(&page.final_url, &page.text);
        debug!(fingerprint = %fingerprint, chars = page.text.len(), "Fetched page");
        report.content_hash = Some(fingerprint);

        if opts.follow_links {
            report.links_enqueued = self.enqueue_links(url, &page, opts.include_subdomains).await;
        }

        if !opts.extract {
            self.frontier.release(url).await?;
            report.status = UrlStatus::FetchedOnly;
            return Ok(report);
        }

        let profile = select_profile(&page, opts.mode);
        let results = self.engine.extract_page(&page, profile).await;
        let schedule = consolidate(url, &page.source_url, &results);
        self.storage.save_parsed_schedule(&schedule).await?;
        report.schedule_id = Some(schedule.id);
        report.entries = schedule.entries().len();

        if let Some(failure) = all_passes_failed(&results) {
            error!(%profile, failure = failure.label(), "Every extraction pass failed");
            self.frontier
                .mark_processed(url, ProcessingOutcome::Failed(failure.clone()))
                .await?;
            report.status = UrlStatus::Failed;
            report.failure = Some(failure);
            return Ok(report);
        }

        // approval may have changed while this URL was in flight
        let current = self.frontier.get(url).await?;
        let summary = self.promoter.promote(&schedule, &current).await?;
        report.shows_created = summary.shows_created;
        report.shows_updated = summary.shows_updated;

        let outcome = match summary.rejected {
            Some(failure) => {
                report.status = UrlStatus::Failed;
                report.failure = Some(failure.clone());
                ProcessingOutcome::Failed(failure)
            }
            None => ProcessingOutcome::Succeeded {
                schedule_id: schedule.id,
                entries: report.entries,
            },
        };
        self.frontier.mark_processed(url, outcome).await?;
        info!(entries = report.entries, created = report.shows_created, "Processed candidate");
        Ok(report)
    }

    /// Same-site links go into the frontier as cross-links. Social pages are
    /// not mined; their links point all over the platform.
    async fn enqueue_links(&self, url: &str, page: &FetchedPage, include_subdomains: bool) -> usize {
        if page.platform().is_some() {
            return 0;
        }
        let Ok(seed) = Url::parse(&page.final_url) else {
            return 0;
        };
        let mut added = 0;
        for link in page.links.iter().filter(|l| is_same_site(&seed, l, include_subdomains)) {
            match self.frontier.enqueue(link, DiscoveredVia::CrossLink(url.to_string())).await {
                Ok((_, true)) => added += 1,
                Ok(_) => {}
                Err(e) => debug!(link = %link, "Skipping link: {}", e),
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ModelProfile;
    use chrono::Utc;

    fn result(pass: usize, outcome: std::result::Result<Vec<crate::domain::ScheduleEntry>, ProcessingFailure>) -> ExtractionResult {
        ExtractionResult {
            pass,
            profile: ModelProfile::Text,
            source_url: "https://example.com/".into(),
            extracted_at: Utc::now(),
            outcome,
        }
    }

    #[test]
    fn test_all_passes_failed_needs_every_pass_to_fail() {
        let malformed = ProcessingFailure::ExtractionMalformed("bad".into());
        assert_eq!(
            all_passes_failed(&[result(0, Err(malformed.clone())), result(1, Err(malformed.clone()))]),
            Some(malformed.clone())
        );
        assert_eq!(all_passes_failed(&[result(0, Err(malformed)), result(1, Ok(vec![]))]), None);
        assert_eq!(all_passes_failed(&[]), None);
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::default();
        let mut ok = UrlReport::new("https://example.com/a", UrlStatus::Succeeded);
        ok.links_enqueued = 3;
        ok.shows_created = 2;
        summary.add(&ok);
        summary.add(&UrlReport::failed("https://example.com/b", ProcessingFailure::FetchBlocked("login".into())));
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.links_enqueued, 3);
        assert!(UrlReport::new("x", UrlStatus::TimedOut).needs_settling());
        assert!(!ok.needs_settling());
    }
}
