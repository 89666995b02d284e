//! Durable queue of candidate URLs.
//!
//! The frontier never hands the same URL to two workers: claims go through
//! [`Storage::claim_unparsed_candidates`], which selects and marks in-flight
//! atomically. Once a URL is marked processed it stays out of every later
//! batch until [`UrlFrontier::reset`] is called.

use crate::constants::{TRACKING_PARAMS, TRACKING_PARAM_PREFIXES};
use crate::domain::{Approval, CandidateUrl, DiscoveredVia, ProcessingOutcome};
use crate::error::{ProcessingFailure, Result, ScraperError};
use crate::metrics::FrontierMetrics;
use crate::storage::Storage;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::Url;

/// Canonical form used as the dedupe key for candidate URLs.
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw.trim()).map_err(|e| ScraperError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ScraperError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(ScraperError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    url.set_fragment(None);
    // Url::parse already lower-cases the host and drops default ports

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let key = k.to_ascii_lowercase();
            !TRACKING_PARAMS.contains(&key.as_str())
                && !TRACKING_PARAM_PREFIXES.iter().any(|p| key.starts_with(p))
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.to_string())
}

pub struct UrlFrontier {
    storage: Arc<dyn Storage>,
    max_fetch_attempts: u32,
}

impl UrlFrontier {
    pub fn new(storage: Arc<dyn Storage>, max_fetch_attempts: u32) -> Self {
        Self {
            storage,
            max_fetch_attempts: max_fetch_attempts.max(1),
        }
    }

    /// Insert a candidate unless its normalized URL is already known.
    /// Returns the normalized URL and whether it was new.
    #[instrument(skip(self))]
    pub async fn enqueue(&self, url: &str, discovered_via: DiscoveredVia) -> Result<(String, bool)> {
        let normalized = normalize_url(url)?;
        let mut candidate = CandidateUrl::new(normalized.clone(), discovered_via);
        let inserted = self.storage.insert_candidate_if_absent(&mut candidate).await?;
        if inserted {
            FrontierMetrics::record_enqueued();
            info!(url = %normalized, "Enqueued candidate url");
        }
        Ok((normalized, inserted))
    }

    /// Claim up to `n` unparsed candidates, oldest discovered first.
    pub async fn next_batch(&self, n: usize) -> Result<Vec<CandidateUrl>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let batch = self.storage.claim_unparsed_candidates(n).await?;
        FrontierMetrics::record_claimed(batch.len());
        Ok(batch)
    }

    /// Claim one known candidate by URL. `None` if it is already parsed or
    /// another worker holds it.
    pub async fn claim(&self, url: &str) -> Result<Option<CandidateUrl>> {
        let normalized = normalize_url(url)?;
        let claimed = self.storage.claim_candidate(&normalized).await?;
        if claimed.is_some() {
            FrontierMetrics::record_claimed(1);
        }
        Ok(claimed)
    }

    /// Mark a candidate parsed whatever the outcome; failures are kept on the
    /// record instead of being retried forever.
    #[instrument(skip(self, outcome))]
    pub async fn mark_processed(&self, url: &str, outcome: ProcessingOutcome) -> Result<()> {
        let needs_review = match &outcome {
            ProcessingOutcome::Succeeded { .. } => false,
            ProcessingOutcome::Failed(failure) => {
                warn!(url, failure = failure.label(), "Candidate processed with failure: {}", failure);
                matches!(failure, ProcessingFailure::FetchBlocked(_))
            }
        };
        self.storage.mark_candidate_processed(url, outcome, needs_review).await?;
        FrontierMetrics::record_processed();
        Ok(())
    }

    /// Return a claim without marking the candidate processed.
    pub async fn release(&self, url: &str) -> Result<()> {
        self.storage.release_candidate(url, false).await?;
        FrontierMetrics::record_released();
        Ok(())
    }

    /// Handle a transient fetch failure: release for a later run, or mark
    /// processed once the attempt budget is spent. Returns true if released.
    pub async fn record_transient_failure(&self, url: &str, failure: ProcessingFailure) -> Result<bool> {
        let candidate = self.storage.release_candidate(url, true).await?;
        if candidate.fetch_attempts >= self.max_fetch_attempts {
            warn!(
                url,
                attempts = candidate.fetch_attempts,
                "Fetch attempts exhausted, giving up on candidate"
            );
            self.mark_processed(url, ProcessingOutcome::Failed(failure)).await?;
            Ok(false)
        } else {
            info!(url, attempts = candidate.fetch_attempts, "Transient failure, candidate released for retry");
            FrontierMetrics::record_released();
            Ok(true)
        }
    }

    pub async fn approve(&self, url: &str) -> Result<CandidateUrl> {
        self.set_approval(url, Approval::Approved).await
    }

    pub async fn reject(&self, url: &str) -> Result<CandidateUrl> {
        self.set_approval(url, Approval::Rejected).await
    }

    /// Forced reparse: makes a processed candidate eligible again. Refused
    /// while a worker holds the candidate.
    pub async fn reset(&self, url: &str) -> Result<CandidateUrl> {
        let normalized = normalize_url(url)?;
        match self.storage.reset_candidate(&normalized).await? {
            Some(candidate) => {
                info!(url = %candidate.url, "Candidate reset for reparse");
                Ok(candidate)
            }
            None => {
                warn!(url = %normalized, "Refusing to reset a candidate that is in flight");
                Err(ScraperError::IllegalTransition {
                    from: "in_flight".to_string(),
                    action: "reset".to_string(),
                })
            }
        }
    }

    pub async fn get(&self, url: &str) -> Result<CandidateUrl> {
        let normalized = normalize_url(url)?;
        self.storage
            .get_candidate(&normalized)
            .await?
            .ok_or_else(|| ScraperError::NotFound(format!("candidate url {normalized}")))
    }

    async fn set_approval(&self, url: &str, approval: Approval) -> Result<CandidateUrl> {
        let mut candidate = self.get(url).await?;
        candidate.approval = approval;
        self.storage.update_candidate(&candidate).await?;
        info!(url = %candidate.url, ?approval, "Candidate approval changed");
        Ok(candidate)
    }
}
