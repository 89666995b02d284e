use crate::domain::*;
use crate::error::{Result, ScraperError};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc, Weekday};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Typed repositories over the relational store.
///
/// Shows and venues are never hard-deleted; their state changes through flags.
/// `claim_unparsed_candidates` and `record_api_call` must be atomic with
/// respect to concurrent callers.
#[async_trait]
pub trait Storage: Send + Sync {
    // Candidate URL operations
    /// Inserts unless a candidate with the same (normalized) URL exists.
    async fn insert_candidate_if_absent(&self, candidate: &mut CandidateUrl) -> Result<bool>;
    async fn get_candidate(&self, url: &str) -> Result<Option<CandidateUrl>>;
    async fn update_candidate(&self, candidate: &CandidateUrl) -> Result<()>;
    /// Claims up to `limit` unparsed, not-in-flight candidates, oldest first,
    /// marking them in-flight in the same step.
    async fn claim_unparsed_candidates(&self, limit: usize) -> Result<Vec<CandidateUrl>>;
    /// Claims one specific candidate if it is unparsed and not in flight.
    async fn claim_candidate(&self, url: &str) -> Result<Option<CandidateUrl>>;
    async fn release_candidate(&self, url: &str, count_attempt: bool) -> Result<CandidateUrl>;
    /// Clears parse state for a forced reparse in one step. `None` when a
    /// worker holds the candidate; its claim is left untouched.
    async fn reset_candidate(&self, url: &str) -> Result<Option<CandidateUrl>>;
    async fn mark_candidate_processed(
        &self,
        url: &str,
        outcome: ProcessingOutcome,
        needs_review: bool,
    ) -> Result<()>;

    // Parsed schedule operations
    async fn save_parsed_schedule(&self, schedule: &ParsedSchedule) -> Result<()>;
    async fn get_parsed_schedule(&self, id: Uuid) -> Result<Option<ParsedSchedule>>;

    // Venue operations
    async fn create_venue(&self, venue: &mut Venue) -> Result<()>;
    async fn get_venue_by_name(&self, name: &str) -> Result<Option<Venue>>;
    async fn update_venue(&self, venue: &Venue) -> Result<()>;
    async fn list_venues(&self) -> Result<Vec<Venue>>;

    // Show operations
    async fn create_show(&self, show: &mut Show) -> Result<()>;
    async fn get_show(&self, id: Uuid) -> Result<Option<Show>>;
    async fn update_show(&self, show: &Show) -> Result<()>;
    async fn find_shows_by_slot(
        &self,
        venue_id: Uuid,
        day: Weekday,
        start_time: NaiveTime,
    ) -> Result<Vec<Show>>;
    async fn list_shows_by_candidate(&self, candidate_url: &str) -> Result<Vec<Show>>;
    async fn list_shows(&self) -> Result<Vec<Show>>;

    // Metrics operations
    async fn record_api_call(
        &self,
        date: NaiveDate,
        class: EndpointClass,
        latency: FixedMillis,
        success: bool,
    ) -> Result<ApiMetricsDaily>;
    async fn get_api_metrics(&self, date: NaiveDate, class: EndpointClass) -> Result<Option<ApiMetricsDaily>>;
    async fn list_api_metrics(&self) -> Result<Vec<ApiMetricsDaily>>;

    // Promotion audit operations
    async fn create_promotion_run(&self, run: &mut PromotionRun) -> Result<()>;
    async fn update_promotion_run(&self, run: &PromotionRun) -> Result<()>;
    async fn create_promotion_record(&self, record: &mut PromotionRecord) -> Result<()>;
    async fn list_promotion_records(&self, run_id: Uuid) -> Result<Vec<PromotionRecord>>;
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|e| ScraperError::Storage(format!("lock poisoned: {e}")))
}

/// In-memory storage implementation for development/testing
#[derive(Default)]
pub struct InMemoryStorage {
    candidates: Arc<Mutex<HashMap<String, CandidateUrl>>>,
    schedules: Arc<Mutex<HashMap<Uuid, ParsedSchedule>>>,
    venues: Arc<Mutex<HashMap<Uuid, Venue>>>,
    shows: Arc<Mutex<HashMap<Uuid, Show>>>,
    api_metrics: Arc<Mutex<HashMap<(NaiveDate, EndpointClass), ApiMetricsDaily>>>,
    promotion_runs: Arc<Mutex<HashMap<Uuid, PromotionRun>>>,
    promotion_records: Arc<Mutex<Vec<PromotionRecord>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn insert_candidate_if_absent(&self, candidate: &mut CandidateUrl) -> Result<bool> {
        let mut candidates = lock(&self.candidates)?;
        if candidates.contains_key(&candidate.url) {
            return Ok(false);
        }
        candidate.id = Some(Uuid::new_v4());
        candidates.insert(candidate.url.clone(), candidate.clone());
        debug!("Inserted candidate url: {}", candidate.url);
        Ok(true)
    }

    async fn get_candidate(&self, url: &str) -> Result<Option<CandidateUrl>> {
        Ok(lock(&self.candidates)?.get(url).cloned())
    }

    async fn update_candidate(&self, candidate: &CandidateUrl) -> Result<()> {
        let mut candidates = lock(&self.candidates)?;
        match candidates.get_mut(&candidate.url) {
            Some(existing) => {
                *existing = candidate.clone();
                Ok(())
            }
            None => Err(ScraperError::NotFound(format!("candidate url {}", candidate.url))),
        }
    }

    async fn claim_unparsed_candidates(&self, limit: usize) -> Result<Vec<CandidateUrl>> {
        // Selection and in-flight marking happen under one lock
        let mut candidates = lock(&self.candidates)?;
        let mut eligible: Vec<&mut CandidateUrl> = candidates
            .values_mut()
            .filter(|c| !c.has_been_parsed && !c.in_flight)
            .collect();
        eligible.sort_by(|a, b| a.discovered_at.cmp(&b.discovered_at).then_with(|| a.url.cmp(&b.url)));

        let claimed = eligible
            .into_iter()
            .take(limit)
            .map(|c| {
                c.in_flight = true;
                c.clone()
            })
            .collect::<Vec<_>>();
        debug!("Claimed {} candidate urls", claimed.len());
        Ok(claimed)
    }

    async fn claim_candidate(&self, url: &str) -> Result<Option<CandidateUrl>> {
        let mut candidates = lock(&self.candidates)?;
        Ok(candidates
            .get_mut(url)
            .filter(|c| !c.has_been_parsed && !c.in_flight)
            .map(|c| {
                c.in_flight = true;
                c.clone()
            }))
    }

    async fn release_candidate(&self, url: &str, count_attempt: bool) -> Result<CandidateUrl> {
        let mut candidates = lock(&self.candidates)?;
        let candidate = candidates
            .get_mut(url)
            .ok_or_else(|| ScraperError::NotFound(format!("candidate url {url}")))?;
        candidate.in_flight = false;
        if count_attempt {
            candidate.fetch_attempts += 1;
        }
        Ok(candidate.clone())
    }

    async fn reset_candidate(&self, url: &str) -> Result<Option<CandidateUrl>> {
        let mut candidates = lock(&self.candidates)?;
        let candidate = candidates
            .get_mut(url)
            .ok_or_else(|| ScraperError::NotFound(format!("candidate url {url}")))?;
        if candidate.in_flight {
            return Ok(None);
        }
        candidate.has_been_parsed = false;
        candidate.fetch_attempts = 0;
        candidate.last_outcome = None;
        candidate.needs_review = false;
        candidate.parsed_at = None;
        Ok(Some(candidate.clone()))
    }

    async fn mark_candidate_processed(
        &self,
        url: &str,
        outcome: ProcessingOutcome,
        needs_review: bool,
    ) -> Result<()> {
        let mut candidates = lock(&self.candidates)?;
        let candidate = candidates
            .get_mut(url)
            .ok_or_else(|| ScraperError::NotFound(format!("candidate url {url}")))?;
        candidate.in_flight = false;
        candidate.has_been_parsed = true;
        candidate.parsed_at = Some(Utc::now());
        candidate.needs_review = candidate.needs_review || needs_review;
        candidate.last_outcome = Some(outcome);
        debug!("Marked candidate {} as processed", url);
        Ok(())
    }

    async fn save_parsed_schedule(&self, schedule: &ParsedSchedule) -> Result<()> {
        lock(&self.schedules)?.insert(schedule.id, schedule.clone());
        debug!("Saved parsed schedule {} for {}", schedule.id, schedule.source_url);
        Ok(())
    }

    async fn get_parsed_schedule(&self, id: Uuid) -> Result<Option<ParsedSchedule>> {
        Ok(lock(&self.schedules)?.get(&id).cloned())
    }

    async fn create_venue(&self, venue: &mut Venue) -> Result<()> {
        let id = Uuid::new_v4();
        venue.id = Some(id);
        lock(&self.venues)?.insert(id, venue.clone());
        debug!("Created venue: {} with id {}", venue.name, id);
        Ok(())
    }

    async fn get_venue_by_name(&self, name: &str) -> Result<Option<Venue>> {
        let wanted = normalize_venue_name(name);
        let venues = lock(&self.venues)?;
        Ok(venues.values().find(|v| v.name_lower == wanted).cloned())
    }

    async fn update_venue(&self, venue: &Venue) -> Result<()> {
        let id = venue.id.ok_or_else(|| ScraperError::Api {
            message: "Cannot update venue without ID".to_string(),
        })?;
        lock(&self.venues)?.insert(id, venue.clone());
        debug!("Updated venue: {} with id {}", venue.name, id);
        Ok(())
    }

    async fn list_venues(&self) -> Result<Vec<Venue>> {
        let mut list: Vec<Venue> = lock(&self.venues)?.values().cloned().collect();
        list.sort_by(|a, b| a.name_lower.cmp(&b.name_lower));
        Ok(list)
    }

    async fn create_show(&self, show: &mut Show) -> Result<()> {
        let id = Uuid::new_v4();
        show.id = Some(id);
        lock(&self.shows)?.insert(id, show.clone());
        debug!("Created show {} at venue {}", id, show.venue_id);
        Ok(())
    }

    async fn get_show(&self, id: Uuid) -> Result<Option<Show>> {
        Ok(lock(&self.shows)?.get(&id).cloned())
    }

    async fn update_show(&self, show: &Show) -> Result<()> {
        let id = show.id.ok_or_else(|| ScraperError::Api {
            message: "Cannot update show without ID".to_string(),
        })?;
        lock(&self.shows)?.insert(id, show.clone());
        debug!("Updated show {}", id);
        Ok(())
    }

    async fn find_shows_by_slot(
        &self,
        venue_id: Uuid,
        day: Weekday,
        start_time: NaiveTime,
    ) -> Result<Vec<Show>> {
        let shows = lock(&self.shows)?;
        let mut found: Vec<Show> = shows
            .values()
            .filter(|s| s.venue_id == venue_id && s.day_of_week == day && s.start_time == start_time)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn list_shows_by_candidate(&self, candidate_url: &str) -> Result<Vec<Show>> {
        let shows = lock(&self.shows)?;
        Ok(shows
            .values()
            .filter(|s| s.candidate_url == candidate_url)
            .cloned()
            .collect())
    }

    async fn list_shows(&self) -> Result<Vec<Show>> {
        let mut list: Vec<Show> = lock(&self.shows)?.values().cloned().collect();
        list.sort_by(|a, b| {
            a.day_of_week
                .num_days_from_monday()
                .cmp(&b.day_of_week.num_days_from_monday())
                .then_with(|| a.start_time.cmp(&b.start_time))
        });
        Ok(list)
    }

    async fn record_api_call(
        &self,
        date: NaiveDate,
        class: EndpointClass,
        latency: FixedMillis,
        success: bool,
    ) -> Result<ApiMetricsDaily> {
        let mut metrics = lock(&self.api_metrics)?;
        let row = metrics
            .entry((date, class))
            .or_insert_with(|| ApiMetricsDaily::new(date, class));
        row.record(latency, success);
        Ok(row.clone())
    }

    async fn get_api_metrics(&self, date: NaiveDate, class: EndpointClass) -> Result<Option<ApiMetricsDaily>> {
        Ok(lock(&self.api_metrics)?.get(&(date, class)).cloned())
    }

    async fn list_api_metrics(&self) -> Result<Vec<ApiMetricsDaily>> {
        let mut list: Vec<ApiMetricsDaily> = lock(&self.api_metrics)?.values().cloned().collect();
        list.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.endpoint_class.cmp(&b.endpoint_class)));
        Ok(list)
    }

    async fn create_promotion_run(&self, run: &mut PromotionRun) -> Result<()> {
        let id = Uuid::new_v4();
        run.id = Some(id);
        lock(&self.promotion_runs)?.insert(id, run.clone());
        debug!("Created promotion run: {} with id {}", run.name, id);
        Ok(())
    }

    async fn update_promotion_run(&self, run: &PromotionRun) -> Result<()> {
        let id = run.id.ok_or_else(|| ScraperError::Api {
            message: "Cannot update promotion run without ID".to_string(),
        })?;
        lock(&self.promotion_runs)?.insert(id, run.clone());
        Ok(())
    }

    async fn create_promotion_record(&self, record: &mut PromotionRecord) -> Result<()> {
        record.id = Some(Uuid::new_v4());
        lock(&self.promotion_records)?.push(record.clone());
        Ok(())
    }

    async fn list_promotion_records(&self, run_id: Uuid) -> Result<Vec<PromotionRecord>> {
        Ok(lock(&self.promotion_records)?
            .iter()
            .filter(|r| r.promotion_run_id == run_id)
            .cloned()
            .collect())
    }
}
