//! Promotion of consolidated schedules into public Venue and Show records,
//! and the moderator operations that move shows through their lifecycle.

pub mod geocode;
pub mod moderation;

pub use geocode::{GeoPoint, Geocoder, NominatimGeocoder};
pub use moderation::{ModerationAction, ShowStatus};

use crate::domain::{
    Approval, CandidateUrl, ChangeType, FieldChanged, ParsedSchedule, ProcessingOutcome, PromotionRecord,
    PromotionRun, ScheduleEntry, Show, Venue,
};
use crate::error::{ProcessingFailure, Result, ScraperError};
use crate::frontier::UrlFrontier;
use crate::metrics::PromotionMetrics;
use crate::storage::Storage;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromotionSummary {
    pub run_id: Option<Uuid>,
    pub shows_created: usize,
    pub shows_updated: usize,
    pub unchanged: usize,
    pub venues_created: usize,
    pub contradictions: usize,
    pub errors: usize,
    /// Set when the source was rejected and nothing was promoted
    pub rejected: Option<ProcessingFailure>,
}

impl PromotionSummary {
    fn count(&mut self, record: &PromotionRecord) {
        match (&record.change_type, &record.field_changed) {
            (ChangeType::Created, FieldChanged::Show) => self.shows_created += 1,
            (ChangeType::Created, FieldChanged::Venue) => self.venues_created += 1,
            (ChangeType::Updated, FieldChanged::Show) => self.shows_updated += 1,
            (ChangeType::NoChange, _) => self.unchanged += 1,
            (ChangeType::Error, _) => self.errors += 1,
            _ => {}
        }
    }
}

/// Same slot, compatible details: a host or end time on only one side is not a conflict
fn details_compatible(show: &Show, entry: &ScheduleEntry) -> bool {
    let host_ok = match (&show.host, &entry.host) {
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        _ => true,
    };
    let end_ok = match (show.end_time, entry.end_time) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    };
    host_ok && end_ok
}

pub struct Promoter {
    storage: Arc<dyn Storage>,
    geocoder: Option<Arc<dyn Geocoder>>,
    contradiction_threshold: u32,
}

impl std::fmt::Debug for Promoter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promoter")
            .field("storage", &"<Arc<dyn Storage>>")
            .field("contradiction_threshold", &self.contradiction_threshold)
            .finish()
    }
}

impl Promoter {
    pub fn new(storage: Arc<dyn Storage>, geocoder: Option<Arc<dyn Geocoder>>, contradiction_threshold: u32) -> Self {
        Self {
            storage,
            geocoder,
            contradiction_threshold: contradiction_threshold.max(1),
        }
    }

    /// Promote every entry of a schedule. One entry failing is recorded and
    /// does not stop the others.
    #[instrument(skip(self, schedule, candidate), fields(source = %schedule.source_url))]
    pub async fn promote(&self, schedule: &ParsedSchedule, candidate: &CandidateUrl) -> Result<PromotionSummary> {
        let mut run = PromotionRun::new(format!("Promotion - {}", schedule.source_url));
        self.storage.create_promotion_run(&mut run).await?;
        let run_id = run
            .id
            .ok_or_else(|| ScraperError::Storage("promotion run created without id".into()))?;
        let mut summary = PromotionSummary {
            run_id: Some(run_id),
            ..PromotionSummary::default()
        };

        if candidate.approval == Approval::Rejected {
            let failure = ProcessingFailure::ModerationRejected(format!("source {} is rejected", candidate.url));
            info!(url = %candidate.url, "Source rejected, nothing promoted");
            let mut record =
                PromotionRecord::new(run_id, schedule.id, ChangeType::Skip, failure.to_string(), FieldChanged::None);
            self.save_record(&mut record).await;
            PromotionMetrics::record_show_change("skip");
            summary.rejected = Some(failure);
            self.finish(&mut run).await;
            return Ok(summary);
        }

        for entry in schedule.entries() {
            match self.promote_entry(entry, schedule, candidate, run_id).await {
                Ok(records) => {
                    for mut record in records {
                        summary.count(&record);
                        if record.change_log.starts_with("Contradiction") {
                            summary.contradictions += 1;
                        }
                        self.save_record(&mut record).await;
                    }
                }
                Err(e) => {
                    error!(venue = %entry.venue_name, "Failed to promote entry: {}", e);
                    PromotionMetrics::record_show_change("error");
                    let mut record = PromotionRecord::new(
                        run_id,
                        schedule.id,
                        ChangeType::Error,
                        format!("Promotion failed for {}: {}", entry.key(), e),
                        FieldChanged::None,
                    );
                    summary.count(&record);
                    self.save_record(&mut record).await;
                }
            }
        }

        self.finish(&mut run).await;
        info!(
            created = summary.shows_created,
            updated = summary.shows_updated,
            unchanged = summary.unchanged,
            errors = summary.errors,
            "Promotion finished"
        );
        Ok(summary)
    }

    async fn save_record(&self, record: &mut PromotionRecord) {
        if let Err(e) = self.storage.create_promotion_record(record).await {
            warn!("Failed to save promotion record: {}", e);
        }
    }

    async fn finish(&self, run: &mut PromotionRun) {
        run.finish();
        if let Err(e) = self.storage.update_promotion_run(run).await {
            warn!("Failed to finish promotion run: {}", e);
        }
    }

    async fn promote_entry(
        &self,
        entry: &ScheduleEntry,
        schedule: &ParsedSchedule,
        candidate: &CandidateUrl,
        run_id: Uuid,
    ) -> Result<Vec<PromotionRecord>> {
        let mut records = Vec::new();
        let (venue, venue_records) = self.resolve_venue(entry, schedule, run_id).await?;
        records.extend(venue_records);
        let venue_id = venue
            .id
            .ok_or_else(|| ScraperError::Storage("venue without id".into()))?;

        let existing = self
            .storage
            .find_shows_by_slot(venue_id, entry.day_of_week, entry.start_time)
            .await?;

        let same_source = existing.iter().find(|s| s.candidate_url == schedule.candidate_url).cloned();
        if let Some(show) = same_source {
            records.push(self.refresh_show(show, entry, schedule, candidate, run_id).await?);
            return Ok(records);
        }

        // pending and invalid shows belong to their own source and hold no claim on the slot
        let public = existing
            .into_iter()
            .find(|s| matches!(s.status, ShowStatus::Valid | ShowStatus::Flagged));
        if let Some(show) = public {
            records.push(self.corroborate(show, entry, schedule, candidate, run_id).await?);
            return Ok(records);
        }

        records.push(self.create_show(entry, &venue, schedule, candidate, run_id).await?);
        Ok(records)
    }

    /// Find the venue by normalized name or create it; known venues pick up
    /// links and address details they were missing.
    async fn resolve_venue(
        &self,
        entry: &ScheduleEntry,
        schedule: &ParsedSchedule,
        run_id: Uuid,
    ) -> Result<(Venue, Vec<PromotionRecord>)> {
        if let Some(mut venue) = self.storage.get_venue_by_name(&entry.venue_name).await? {
            let venue_id = venue
                .id
                .ok_or_else(|| ScraperError::Storage("venue without id".into()))?;
            let mut changed = Vec::new();
            macro_rules! fill {
                ($field:ident, $src:expr) => {
                    if venue.$field.is_none() && $src.is_some() {
                        venue.$field = $src.clone();
                        changed.push(stringify!($field));
                    }
                };
            }
            fill!(website, entry.venue_website);
            fill!(instagram, entry.venue_instagram);
            fill!(facebook, entry.venue_facebook);
            fill!(address, entry.venue_address);
            fill!(city, entry.city);
            fill!(state, entry.state);

            let record = if changed.is_empty() {
                debug!(venue = %venue.name, "Using existing venue");
                PromotionRecord::new(
                    run_id,
                    schedule.id,
                    ChangeType::NoChange,
                    format!("Using existing venue: {}", venue.name),
                    FieldChanged::Venue,
                )
            } else {
                self.storage.update_venue(&venue).await?;
                info!(venue = %venue.name, fields = ?changed, "Updated venue details");
                PromotionRecord::new(
                    run_id,
                    schedule.id,
                    ChangeType::Updated,
                    format!("Updated venue {}: {}", venue.name, changed.join(", ")),
                    FieldChanged::Venue,
                )
            };
            return Ok((venue, vec![record.with_venue(venue_id)]));
        }

        let mut venue = Venue::from_entry(entry);
        if let Some(point) = self.try_geocode(&venue.location_query()).await {
            venue.latitude = Some(point.latitude);
            venue.longitude = Some(point.longitude);
            if venue.city.is_none() {
                venue.city = point.city;
            }
            if venue.state.is_none() {
                venue.state = point.state;
            }
        }
        self.storage.create_venue(&mut venue).await?;
        let venue_id = venue
            .id
            .ok_or_else(|| ScraperError::Storage("venue created without id".into()))?;
        PromotionMetrics::record_venue_created();
        info!(venue = %venue.name, %venue_id, "Created new venue");

        let record = PromotionRecord::new(
            run_id,
            schedule.id,
            ChangeType::Created,
            format!("Created new venue: {}", venue.name),
            FieldChanged::Venue,
        )
        .with_venue(venue_id);
        Ok((venue, vec![record]))
    }

    async fn try_geocode(&self, query: &str) -> Option<GeoPoint> {
        let geocoder = self.geocoder.as_ref()?;
        match geocoder.geocode(query).await {
            Ok(point) => {
                PromotionMetrics::record_geocode(true);
                Some(point)
            }
            Err(failure) => {
                PromotionMetrics::record_geocode(false);
                debug!(query, "{}", failure);
                None
            }
        }
    }

    async fn create_show(
        &self,
        entry: &ScheduleEntry,
        venue: &Venue,
        schedule: &ParsedSchedule,
        candidate: &CandidateUrl,
        run_id: Uuid,
    ) -> Result<PromotionRecord> {
        let venue_id = venue
            .id
            .ok_or_else(|| ScraperError::Storage("venue without id".into()))?;
        let status = if candidate.is_approved() {
            ShowStatus::Valid
        } else {
            ShowStatus::Pending
        };
        let now = Utc::now();
        let mut show = Show {
            id: None,
            venue_id,
            parsed_schedule_id: Some(schedule.id),
            day_of_week: entry.day_of_week,
            start_time: entry.start_time,
            end_time: entry.end_time,
            host: entry.host.clone(),
            description: entry.description.clone(),
            source: schedule.source_url.clone(),
            candidate_url: schedule.candidate_url.clone(),
            city: entry.city.clone().or_else(|| venue.city.clone()),
            state: entry.state.clone().or_else(|| venue.state.clone()),
            latitude: venue.latitude,
            longitude: venue.longitude,
            status,
            contradictions: 0,
            moderation_note: None,
            created_at: now,
            updated_at: now,
        };
        self.storage.create_show(&mut show).await?;
        let show_id = show
            .id
            .ok_or_else(|| ScraperError::Storage("show created without id".into()))?;
        PromotionMetrics::record_show_change("created");
        info!(%show_id, slot = %entry.key(), %status, "Created show");

        Ok(PromotionRecord::new(
            run_id,
            schedule.id,
            ChangeType::Created,
            format!("Created {} show {} at {}", status, entry.key(), venue.name),
            FieldChanged::Show,
        )
        .with_show(show_id)
        .with_venue(venue_id))
    }

    /// Re-promotion of a slot this source already produced
    async fn refresh_show(
        &self,
        mut show: Show,
        entry: &ScheduleEntry,
        schedule: &ParsedSchedule,
        candidate: &CandidateUrl,
        run_id: Uuid,
    ) -> Result<PromotionRecord> {
        let show_id = show
            .id
            .ok_or_else(|| ScraperError::Storage("show without id".into()))?;
        let mut changed = Vec::new();
        if show.end_time != entry.end_time && entry.end_time.is_some() {
            show.end_time = entry.end_time;
            changed.push("end_time");
        }
        if show.host != entry.host && entry.host.is_some() {
            show.host = entry.host.clone();
            changed.push("host");
        }
        if show.description != entry.description && entry.description.is_some() {
            show.description = entry.description.clone();
            changed.push("description");
        }
        if show.source != schedule.source_url {
            show.source = schedule.source_url.clone();
            changed.push("source");
        }
        if show.status == ShowStatus::Pending && candidate.is_approved() {
            show.status = show.status.apply(ModerationAction::Approve)?;
            changed.push("status");
        }

        if changed.is_empty() {
            PromotionMetrics::record_show_change("no_change");
            return Ok(PromotionRecord::new(
                run_id,
                schedule.id,
                ChangeType::NoChange,
                format!("No changes needed for show {}", entry.key()),
                FieldChanged::Show,
            )
            .with_show(show_id));
        }

        show.parsed_schedule_id = Some(schedule.id);
        show.updated_at = Utc::now();
        self.storage.update_show(&show).await?;
        PromotionMetrics::record_show_change("updated");
        info!(%show_id, fields = ?changed, "Updated show");
        Ok(PromotionRecord::new(
            run_id,
            schedule.id,
            ChangeType::Updated,
            format!("Updated show {}: {}", entry.key(), changed.join(", ")),
            FieldChanged::Show,
        )
        .with_show(show_id))
    }

    /// Another source reports a slot that already has a public show. Only
    /// approved sources may change it.
    async fn corroborate(
        &self,
        mut show: Show,
        entry: &ScheduleEntry,
        schedule: &ParsedSchedule,
        candidate: &CandidateUrl,
        run_id: Uuid,
    ) -> Result<PromotionRecord> {
        let show_id = show
            .id
            .ok_or_else(|| ScraperError::Storage("show without id".into()))?;

        if !candidate.is_approved() {
            PromotionMetrics::record_show_change("skip");
            debug!(%show_id, source = %schedule.source_url, "Unapproved source reported a public slot");
            return Ok(PromotionRecord::new(
                run_id,
                schedule.id,
                ChangeType::Skip,
                format!(
                    "Show {} also reported by unapproved source {}; not applied",
                    entry.key(),
                    schedule.source_url
                ),
                FieldChanged::Show,
            )
            .with_show(show_id));
        }

        if details_compatible(&show, entry) {
            let mut filled = Vec::new();
            if show.host.is_none() && entry.host.is_some() {
                show.host = entry.host.clone();
                filled.push("host");
            }
            if show.end_time.is_none() && entry.end_time.is_some() {
                show.end_time = entry.end_time;
                filled.push("end_time");
            }
            if filled.is_empty() {
                PromotionMetrics::record_show_change("no_change");
                return Ok(PromotionRecord::new(
                    run_id,
                    schedule.id,
                    ChangeType::NoChange,
                    format!("Show {} corroborated by {}", entry.key(), schedule.source_url),
                    FieldChanged::Show,
                )
                .with_show(show_id));
            }
            show.updated_at = Utc::now();
            self.storage.update_show(&show).await?;
            PromotionMetrics::record_show_change("updated");
            return Ok(PromotionRecord::new(
                run_id,
                schedule.id,
                ChangeType::Updated,
                format!("Filled {} on show {} from {}", filled.join(", "), entry.key(), schedule.source_url),
                FieldChanged::Show,
            )
            .with_show(show_id));
        }

        show.contradictions += 1;
        let mut note = format!(
            "Contradiction {} from {}: host {:?} / end {:?} vs host {:?} / end {:?}",
            show.contradictions, schedule.source_url, entry.host, entry.end_time, show.host, show.end_time
        );
        if show.contradictions >= self.contradiction_threshold && show.status.can_apply(ModerationAction::Flag) {
            show.status = show.status.apply(ModerationAction::Flag)?;
            PromotionMetrics::record_moderation(ModerationAction::Flag.as_str());
            warn!(%show_id, contradictions = show.contradictions, "Show flagged after repeated contradictions");
            note.push_str("; flagged");
        }
        show.moderation_note = Some(note.clone());
        show.updated_at = Utc::now();
        self.storage.update_show(&show).await?;
        PromotionMetrics::record_show_change("contradiction");

        Ok(PromotionRecord::new(run_id, schedule.id, ChangeType::Updated, note, FieldChanged::Show).with_show(show_id))
    }
}

// ---------------------------------------------------------------------------
// Moderation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VenueValidationSummary {
    pub checked: usize,
    pub validated: usize,
    pub unresolved: usize,
}

/// Operations moderators run against sources, shows and venues
pub struct Moderator {
    storage: Arc<dyn Storage>,
    frontier: Arc<UrlFrontier>,
    geocoder: Option<Arc<dyn Geocoder>>,
}

impl Moderator {
    pub fn new(storage: Arc<dyn Storage>, frontier: Arc<UrlFrontier>, geocoder: Option<Arc<dyn Geocoder>>) -> Self {
        Self {
            storage,
            frontier,
            geocoder,
        }
    }

    /// Approve a source and move its pending shows to valid. Returns how many moved.
    #[instrument(skip(self))]
    pub async fn approve_source(&self, url: &str) -> Result<usize> {
        let candidate = self.frontier.approve(url).await?;
        self.transition_source_shows(&candidate.url, ShowStatus::Pending, ModerationAction::Approve)
            .await
    }

    /// Reject a source. Its pending shows become invalid and the candidate keeps
    /// a `ModerationRejected` outcome.
    #[instrument(skip(self))]
    pub async fn reject_source(&self, url: &str, reason: &str) -> Result<usize> {
        let mut candidate = self.frontier.reject(url).await?;
        candidate.last_outcome = Some(ProcessingOutcome::Failed(ProcessingFailure::ModerationRejected(
            reason.to_string(),
        )));
        self.storage.update_candidate(&candidate).await?;
        self.transition_source_shows(&candidate.url, ShowStatus::Pending, ModerationAction::Reject)
            .await
    }

    async fn transition_source_shows(&self, candidate_url: &str, from: ShowStatus, action: ModerationAction) -> Result<usize> {
        let mut moved = 0;
        for mut show in self.storage.list_shows_by_candidate(candidate_url).await? {
            if show.status != from {
                continue;
            }
            if action == ModerationAction::Approve {
                if let Some(holder) = self.public_slot_holder(&show).await? {
                    // the slot went public through another source meanwhile
                    show.status = show.status.apply(ModerationAction::Reject)?;
                    show.moderation_note = Some(format!("Duplicate of show {}", holder));
                    show.updated_at = Utc::now();
                    self.storage.update_show(&show).await?;
                    info!(show_id = ?show.id, %holder, "Pending show duplicates a public show");
                    continue;
                }
            }
            show.status = show.status.apply(action)?;
            show.updated_at = Utc::now();
            self.storage.update_show(&show).await?;
            moved += 1;
        }
        PromotionMetrics::record_moderation(action.as_str());
        info!(candidate_url, moved, action = action.as_str(), "Source shows transitioned");
        Ok(moved)
    }

    /// Another source's valid or flagged show in the same slot, if any
    async fn public_slot_holder(&self, show: &Show) -> Result<Option<Uuid>> {
        Ok(self
            .storage
            .find_shows_by_slot(show.venue_id, show.day_of_week, show.start_time)
            .await?
            .into_iter()
            .filter(|s| s.id != show.id && matches!(s.status, ShowStatus::Valid | ShowStatus::Flagged))
            .find_map(|s| s.id))
    }

    /// Apply a moderator action to one show
    pub async fn moderate_show(&self, show_id: Uuid, action: ModerationAction, note: Option<String>) -> Result<Show> {
        let mut show = self
            .storage
            .get_show(show_id)
            .await?
            .ok_or_else(|| ScraperError::NotFound(format!("show {show_id}")))?;
        show.status = show.status.apply(action)?;
        if note.is_some() {
            show.moderation_note = note;
        }
        if action == ModerationAction::Reinstate {
            show.contradictions = 0;
        }
        show.updated_at = Utc::now();
        self.storage.update_show(&show).await?;
        PromotionMetrics::record_moderation(action.as_str());
        info!(%show_id, status = %show.status, action = action.as_str(), "Show moderated");
        Ok(show)
    }

    pub async fn flag_show(&self, show_id: Uuid, note: &str) -> Result<Show> {
        self.moderate_show(show_id, ModerationAction::Flag, Some(note.to_string())).await
    }

    pub async fn reinstate_show(&self, show_id: Uuid) -> Result<Show> {
        self.moderate_show(show_id, ModerationAction::Reinstate, None).await
    }

    /// Independent identity check: geocode each unvalidated venue and mark it
    /// AI-validated when it resolves.
    #[instrument(skip(self))]
    pub async fn validate_venues(&self) -> Result<VenueValidationSummary> {
        let geocoder = self
            .geocoder
            .as_ref()
            .ok_or_else(|| ScraperError::Config("venue validation needs a geocoder".into()))?;
        let mut summary = VenueValidationSummary::default();

        for mut venue in self.storage.list_venues().await? {
            if venue.is_ai_validated || venue.is_flagged {
                continue;
            }
            summary.checked += 1;
            match geocoder.geocode(&venue.location_query()).await {
                Ok(point) => {
                    PromotionMetrics::record_geocode(true);
                    venue.latitude = Some(point.latitude);
                    venue.longitude = Some(point.longitude);
                    if venue.city.is_none() {
                        venue.city = point.city;
                    }
                    if venue.state.is_none() {
                        venue.state = point.state;
                    }
                    venue.is_ai_validated = true;
                    self.storage.update_venue(&venue).await?;
                    summary.validated += 1;
                    info!(venue = %venue.name, "Venue validated");
                }
                Err(failure) => {
                    PromotionMetrics::record_geocode(false);
                    summary.unresolved += 1;
                    warn!(venue = %venue.name, "{}", failure);
                }
            }
        }
        Ok(summary)
    }

    /// Default listing: valid shows only
    pub async fn list_public_shows(&self) -> Result<Vec<Show>> {
        Ok(self
            .storage
            .list_shows()
            .await?
            .into_iter()
            .filter(|s| s.is_public())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DiscoveredVia;
    use crate::storage::InMemoryStorage;
    use async_trait::async_trait;
    use chrono::{NaiveTime, Weekday};

    struct FixedGeocoder;

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn geocode(&self, query: &str) -> std::result::Result<GeoPoint, ProcessingFailure> {
            if query.contains("Nowhere") {
                return Err(ProcessingFailure::GeocodeUnresolved(query.to_string()));
            }
            Ok(GeoPoint {
                latitude: 30.26,
                longitude: -97.74,
                city: Some("Austin".into()),
                state: Some("TX".into()),
                display_name: query.to_string(),
            })
        }
    }

    fn entry(venue: &str, day: Weekday, hh: u32, host: Option<&str>) -> ScheduleEntry {
        ScheduleEntry {
            venue_name: venue.to_string(),
            venue_address: None,
            city: None,
            state: None,
            venue_website: None,
            venue_instagram: None,
            venue_facebook: None,
            day_of_week: day,
            start_time: NaiveTime::from_hms_opt(hh, 0, 0).unwrap(),
            end_time: None,
            host: host.map(String::from),
            description: None,
        }
    }

    fn schedule(url: &str, entries: Vec<ScheduleEntry>) -> ParsedSchedule {
        ParsedSchedule::new(Uuid::new_v4(), url.to_string(), url.to_string(), Utc::now(), entries)
    }

    fn candidate(url: &str, approval: Approval) -> CandidateUrl {
        let mut c = CandidateUrl::new(url.to_string(), DiscoveredVia::Seed);
        c.approval = approval;
        c
    }

    #[tokio::test]
    async fn test_approved_source_creates_valid_shows_sharing_venue() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let promoter = Promoter::new(storage.clone(), Some(Arc::new(FixedGeocoder)), 2);
        let url = "https://example.com/venue-schedule";
        let s = schedule(
            url,
            vec![entry("Rusty Mic", Weekday::Fri, 21, None), entry("Rusty Mic", Weekday::Tue, 20, None)],
        );

        let summary = promoter.promote(&s, &candidate(url, Approval::Approved)).await.unwrap();
        assert_eq!(summary.shows_created, 2);
        assert_eq!(summary.venues_created, 1);

        let shows = storage.list_shows().await.unwrap();
        assert_eq!(shows.len(), 2);
        assert!(shows.iter().all(|s| s.status == ShowStatus::Valid));
        assert_eq!(shows[0].venue_id, shows[1].venue_id);
        assert_eq!(shows[0].latitude, Some(30.26));
        assert_eq!(shows[0].city.as_deref(), Some("Austin"));
        // coordinates alone do not validate the venue
        assert!(!storage.list_venues().await.unwrap()[0].is_ai_validated);
    }

    #[tokio::test]
    async fn test_unapproved_source_creates_pending_shows() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let promoter = Promoter::new(storage.clone(), None, 2);
        let url = "https://example.com/unreviewed";
        promoter
            .promote(&schedule(url, vec![entry("Bar", Weekday::Mon, 20, None)]), &candidate(url, Approval::Unreviewed))
            .await
            .unwrap();
        let shows = storage.list_shows().await.unwrap();
        assert_eq!(shows[0].status, ShowStatus::Pending);
        assert_eq!(shows[0].latitude, None);
    }

    #[tokio::test]
    async fn test_rejected_source_creates_nothing() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let promoter = Promoter::new(storage.clone(), None, 2);
        let url = "https://example.com/spam";
        let summary = promoter
            .promote(&schedule(url, vec![entry("Bar", Weekday::Mon, 20, None)]), &candidate(url, Approval::Rejected))
            .await
            .unwrap();
        assert!(matches!(summary.rejected, Some(ProcessingFailure::ModerationRejected(_))));
        assert!(storage.list_shows().await.unwrap().is_empty());
        let records = storage.list_promotion_records(summary.run_id.unwrap()).await.unwrap();
        assert_eq!(records[0].change_type, ChangeType::Skip);
    }

    #[tokio::test]
    async fn test_repromotion_is_no_change() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let promoter = Promoter::new(storage.clone(), None, 2);
        let url = "https://example.com/venue-schedule";
        let s = schedule(url, vec![entry("Bar", Weekday::Mon, 20, Some("KJ Nova"))]);
        let c = candidate(url, Approval::Approved);
        promoter.promote(&s, &c).await.unwrap();
        let second = promoter.promote(&s, &c).await.unwrap();
        assert_eq!(second.shows_created, 0);
        assert_eq!(storage.list_shows().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_contradictions_flag_show() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let promoter = Promoter::new(storage.clone(), None, 2);
        let a = "https://a.example.com/";
        promoter
            .promote(&schedule(a, vec![entry("Bar", Weekday::Fri, 21, Some("DJ One"))]), &candidate(a, Approval::Approved))
            .await
            .unwrap();

        for src in ["https://b.example.com/", "https://c.example.com/"] {
            promoter
                .promote(
                    &schedule(src, vec![entry("Bar", Weekday::Fri, 21, Some("DJ Two"))]),
                    &candidate(src, Approval::Approved),
                )
                .await
                .unwrap();
        }

        let shows = storage.list_shows().await.unwrap();
        assert_eq!(shows.len(), 1);
        assert_eq!(shows[0].contradictions, 2);
        assert_eq!(shows[0].status, ShowStatus::Flagged);
        assert!(!shows[0].is_public());
    }

    #[tokio::test]
    async fn test_compatible_report_fills_gaps_without_contradiction() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let promoter = Promoter::new(storage.clone(), None, 2);
        let a = "https://a.example.com/";
        let b = "https://b.example.com/";
        promoter
            .promote(&schedule(a, vec![entry("Bar", Weekday::Fri, 21, None)]), &candidate(a, Approval::Approved))
            .await
            .unwrap();
        promoter
            .promote(&schedule(b, vec![entry("Bar", Weekday::Fri, 21, Some("DJ One"))]), &candidate(b, Approval::Approved))
            .await
            .unwrap();
        let show = &storage.list_shows().await.unwrap()[0];
        assert_eq!(show.contradictions, 0);
        assert_eq!(show.host.as_deref(), Some("DJ One"));
    }

    #[tokio::test]
    async fn test_approved_source_publishes_slot_held_by_pending_show() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let frontier = Arc::new(UrlFrontier::new(storage.clone(), 3));
        let promoter = Promoter::new(storage.clone(), None, 2);
        let moderator = Moderator::new(storage.clone(), frontier.clone(), None);

        let (a, _) = frontier.enqueue("https://a.example.com/", DiscoveredVia::Seed).await.unwrap();
        let b = "https://b.example.com/";
        promoter
            .promote(&schedule(&a, vec![entry("Bar", Weekday::Fri, 21, None)]), &frontier.get(&a).await.unwrap())
            .await
            .unwrap();
        let summary = promoter
            .promote(&schedule(b, vec![entry("Bar", Weekday::Fri, 21, None)]), &candidate(b, Approval::Approved))
            .await
            .unwrap();
        assert_eq!(summary.shows_created, 1);

        let public = moderator.list_public_shows().await.unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].candidate_url, b);

        // approving the first source later does not publish a second copy
        moderator.approve_source(&a).await.unwrap();
        let public = moderator.list_public_shows().await.unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].candidate_url, b);
        let a_show = &storage.list_shows_by_candidate(&a).await.unwrap()[0];
        assert_eq!(a_show.status, ShowStatus::Invalid);
    }

    #[tokio::test]
    async fn test_unapproved_source_cannot_change_public_show() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let promoter = Promoter::new(storage.clone(), None, 2);
        let a = "https://a.example.com/";
        promoter
            .promote(&schedule(a, vec![entry("Bar", Weekday::Fri, 21, Some("DJ One"))]), &candidate(a, Approval::Approved))
            .await
            .unwrap();

        for src in ["https://b.example.com/", "https://c.example.com/"] {
            let mut report = entry("Bar", Weekday::Fri, 21, Some("DJ Two"));
            report.end_time = NaiveTime::from_hms_opt(23, 0, 0);
            let summary = promoter
                .promote(&schedule(src, vec![report]), &candidate(src, Approval::Unreviewed))
                .await
                .unwrap();
            assert_eq!(summary.shows_created, 0);
            assert_eq!(summary.contradictions, 0);
            let records = storage.list_promotion_records(summary.run_id.unwrap()).await.unwrap();
            assert!(records.iter().any(|r| r.change_type == ChangeType::Skip));
        }

        let shows = storage.list_shows().await.unwrap();
        assert_eq!(shows.len(), 1);
        assert_eq!(shows[0].status, ShowStatus::Valid);
        assert_eq!(shows[0].contradictions, 0);
        assert_eq!(shows[0].host.as_deref(), Some("DJ One"));
        assert_eq!(shows[0].end_time, None);
    }

    #[tokio::test]
    async fn test_moderator_approve_and_validate() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let frontier = Arc::new(UrlFrontier::new(storage.clone(), 3));
        let geocoder: Arc<dyn Geocoder> = Arc::new(FixedGeocoder);
        let promoter = Promoter::new(storage.clone(), None, 2);
        let moderator = Moderator::new(storage.clone(), frontier.clone(), Some(geocoder));

        let (url, _) = frontier.enqueue("https://example.com/k", DiscoveredVia::Seed).await.unwrap();
        let c = frontier.get(&url).await.unwrap();
        promoter
            .promote(&schedule(&url, vec![entry("Bar", Weekday::Mon, 20, None), entry("Nowhere Pub", Weekday::Sat, 22, None)]), &c)
            .await
            .unwrap();
        assert!(moderator.list_public_shows().await.unwrap().is_empty());

        assert_eq!(moderator.approve_source(&url).await.unwrap(), 2);
        assert_eq!(moderator.list_public_shows().await.unwrap().len(), 2);

        let summary = moderator.validate_venues().await.unwrap();
        assert_eq!(summary, VenueValidationSummary { checked: 2, validated: 1, unresolved: 1 });

        let show_id = moderator.list_public_shows().await.unwrap()[0].id.unwrap();
        let flagged = moderator.flag_show(show_id, "duplicate listing").await.unwrap();
        assert_eq!(flagged.status, ShowStatus::Flagged);
        assert!(moderator.flag_show(show_id, "again").await.is_err());
        assert_eq!(moderator.reinstate_show(show_id).await.unwrap().status, ShowStatus::Valid);
    }

    #[tokio::test]
    async fn test_reject_source_invalidates_pending() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let frontier = Arc::new(UrlFrontier::new(storage.clone(), 3));
        let promoter = Promoter::new(storage.clone(), None, 2);
        let moderator = Moderator::new(storage.clone(), frontier.clone(), None);

        let (url, _) = frontier.enqueue("https://example.com/spam", DiscoveredVia::Seed).await.unwrap();
        let c = frontier.get(&url).await.unwrap();
        promoter.promote(&schedule(&url, vec![entry("Bar", Weekday::Mon, 20, None)]), &c).await.unwrap();

        assert_eq!(moderator.reject_source(&url, "spam").await.unwrap(), 1);
        let candidate = frontier.get(&url).await.unwrap();
        assert_eq!(candidate.approval, Approval::Rejected);
        assert!(matches!(
            candidate.last_outcome,
            Some(ProcessingOutcome::Failed(ProcessingFailure::ModerationRejected(_)))
        ));
        assert_eq!(storage.list_shows().await.unwrap()[0].status, ShowStatus::Invalid);
    }
}
