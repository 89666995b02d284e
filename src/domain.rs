//! Records owned by the pipeline stages and persisted through [`crate::storage::Storage`].

use crate::error::ProcessingFailure;
use crate::extraction::ModelProfile;
use crate::promotion::moderation::ShowStatus;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Frontier
// ---------------------------------------------------------------------------

/// How a candidate URL entered the frontier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveredVia {
    Seed,
    /// Found as a link on the given page
    CrossLink(String),
    ParseRequest,
    Manual,
}

/// Moderator decision on whether a source may create public records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Approval {
    Unreviewed,
    Approved,
    Rejected,
}

/// Final outcome stored when a candidate is marked processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessingOutcome {
    Succeeded { schedule_id: Uuid, entries: usize },
    Failed(ProcessingFailure),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateUrl {
    pub id: Option<Uuid>,
    /// Normalized form; the dedupe key
    pub url: String,
    pub discovered_via: DiscoveredVia,
    pub discovered_at: DateTime<Utc>,
    pub has_been_parsed: bool,
    pub approval: Approval,
    pub in_flight: bool,
    pub fetch_attempts: u32,
    pub last_outcome: Option<ProcessingOutcome>,
    /// Set when automated processing gave up and a human should look
    pub needs_review: bool,
    pub parsed_at: Option<DateTime<Utc>>,
}

impl CandidateUrl {
    pub fn new(url: String, discovered_via: DiscoveredVia) -> Self {
        Self {
            id: None,
            url,
            discovered_via,
            discovered_at: Utc::now(),
            has_been_parsed: false,
            approval: Approval::Unreviewed,
            in_flight: false,
            fetch_attempts: 0,
            last_outcome: None,
            needs_review: false,
            parsed_at: None,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.approval == Approval::Approved
    }
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

/// One recurring show as extracted from a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub venue_name: String,
    pub venue_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub venue_website: Option<String>,
    pub venue_instagram: Option<String>,
    pub venue_facebook: Option<String>,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    /// Karaoke host or vendor running the show
    pub host: Option<String>,
    pub description: Option<String>,
}

/// Identity of a recurring slot: same venue, same weekday, same start time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScheduleKey {
    pub venue: String,
    pub day: u32,
    pub start_time: NaiveTime,
}

impl fmt::Display for ScheduleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let day = Weekday::try_from(self.day as u8).map(|d| d.to_string()).unwrap_or_default();
        write!(f, "{}@{}{}", self.venue, day, self.start_time.format("%H:%M"))
    }
}

pub fn normalize_venue_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '&')
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl ScheduleEntry {
    pub fn key(&self) -> ScheduleKey {
        ScheduleKey {
            venue: normalize_venue_name(&self.venue_name),
            day: self.day_of_week.num_days_from_monday(),
            start_time: self.start_time,
        }
    }

    /// Number of optional fields populated
    pub fn completeness(&self) -> usize {
        [
            self.venue_address.is_some(),
            self.city.is_some(),
            self.state.is_some(),
            self.venue_website.is_some(),
            self.venue_instagram.is_some(),
            self.venue_facebook.is_some(),
            self.end_time.is_some(),
            self.host.is_some(),
            self.description.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }

    /// Fill fields this entry lacks from another report of the same slot.
    pub fn fill_missing_from(&mut self, other: &ScheduleEntry) {
        fn fill<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
            if dst.is_none() {
                *dst = src.clone();
            }
        }
        fill(&mut self.venue_address, &other.venue_address);
        fill(&mut self.city, &other.city);
        fill(&mut self.state, &other.state);
        fill(&mut self.venue_website, &other.venue_website);
        fill(&mut self.venue_instagram, &other.venue_instagram);
        fill(&mut self.venue_facebook, &other.venue_facebook);
        fill(&mut self.end_time, &other.end_time);
        fill(&mut self.host, &other.host);
        fill(&mut self.description, &other.description);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParsingEvent {
    ExtractionSucceeded { pass: usize, profile: ModelProfile, entries: usize },
    ExtractionFailed { pass: usize, profile: ModelProfile, failure: ProcessingFailure },
    DuplicateMerged { key: String, discarded: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsingLog {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub event: ParsingEvent,
    pub message: String,
}

/// Consolidated extraction output for one source URL.
///
/// Entries are fixed at creation; the parsing log only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSchedule {
    pub id: Uuid,
    /// Fetched (possibly transformed) URL the entries came from
    pub source_url: String,
    /// Frontier URL that produced the source
    pub candidate_url: String,
    pub extracted_at: DateTime<Utc>,
    entries: Vec<ScheduleEntry>,
    parsing_logs: Vec<ParsingLog>,
}

impl ParsedSchedule {
    pub fn new(
        id: Uuid,
        source_url: String,
        candidate_url: String,
        extracted_at: DateTime<Utc>,
        entries: Vec<ScheduleEntry>,
    ) -> Self {
        Self {
            id,
            source_url,
            candidate_url,
            extracted_at,
            entries,
            parsing_logs: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn parsing_logs(&self) -> &[ParsingLog] {
        &self.parsing_logs
    }

    pub fn append_log(&mut self, log: ParsingLog) {
        self.parsing_logs.push(log);
    }
}

// ---------------------------------------------------------------------------
// Public records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    pub id: Option<Uuid>,
    pub name: String,
    pub name_lower: String,
    pub website: Option<String>,
    pub instagram: Option<String>,
    pub facebook: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Set only by the independent identity check, never by schedule extraction
    pub is_ai_validated: bool,
    pub is_flagged: bool,
    pub created_at: DateTime<Utc>,
}

impl Venue {
    pub fn from_entry(entry: &ScheduleEntry) -> Self {
        Self {
            id: None,
            name: entry.venue_name.trim().to_string(),
            name_lower: normalize_venue_name(&entry.venue_name),
            website: entry.venue_website.clone(),
            instagram: entry.venue_instagram.clone(),
            facebook: entry.venue_facebook.clone(),
            address: entry.venue_address.clone(),
            city: entry.city.clone(),
            state: entry.state.clone(),
            latitude: None,
            longitude: None,
            is_ai_validated: false,
            is_flagged: false,
            created_at: Utc::now(),
        }
    }

    /// Free-text query used for geocoding this venue
    pub fn location_query(&self) -> String {
        [Some(self.name.as_str()), self.address.as_deref(), self.city.as_deref(), self.state.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Show {
    pub id: Option<Uuid>,
    pub venue_id: Uuid,
    pub parsed_schedule_id: Option<Uuid>,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub host: Option<String>,
    pub description: Option<String>,
    /// Provenance: the (transformed) URL the schedule was read from
    pub source: String,
    /// Frontier URL whose approval gates this show
    pub candidate_url: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: ShowStatus,
    /// Independent sources that reported this slot with incompatible details
    pub contradictions: u32,
    pub moderation_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Show {
    pub fn is_valid(&self) -> bool {
        matches!(self.status, ShowStatus::Valid | ShowStatus::Flagged)
    }

    pub fn is_flagged(&self) -> bool {
        self.status == ShowStatus::Flagged
    }

    pub fn is_public(&self) -> bool {
        self.status == ShowStatus::Valid
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Class of external call whose volume and latency is tracked per day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    AiText,
    AiVision,
    AiPlatform,
    AiWorker,
    FetchStatic,
    FetchHeadless,
    Geocode,
    MusicMetadata,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::AiText => "ai_text",
            EndpointClass::AiVision => "ai_vision",
            EndpointClass::AiPlatform => "ai_platform",
            EndpointClass::AiWorker => "ai_worker",
            EndpointClass::FetchStatic => "fetch_static",
            EndpointClass::FetchHeadless => "fetch_headless",
            EndpointClass::Geocode => "geocode",
            EndpointClass::MusicMetadata => "music_metadata",
        }
    }
}

impl From<ModelProfile> for EndpointClass {
    fn from(profile: ModelProfile) -> Self {
        match profile {
            ModelProfile::Text => EndpointClass::AiText,
            ModelProfile::Vision => EndpointClass::AiVision,
            ModelProfile::Platform => EndpointClass::AiPlatform,
            ModelProfile::Worker => EndpointClass::AiWorker,
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Milliseconds as fixed-point with four decimal places.
///
/// Stored as ten-thousandths of a millisecond; averaging uses 128-bit
/// intermediates so very large samples and counts cannot overflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FixedMillis(i64);

impl FixedMillis {
    pub const SCALE: i64 = 10_000;

    pub fn from_raw(ten_thousandths: i64) -> Self {
        Self(ten_thousandths)
    }

    pub fn from_duration(d: std::time::Duration) -> Self {
        // nanoseconds / 100 == ten-thousandths of a millisecond
        let raw = d.as_nanos() / 100;
        Self(i64::try_from(raw).unwrap_or(i64::MAX))
    }

    pub fn raw(&self) -> i64 {
        self.0
    }

    pub fn as_millis_f64(&self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    /// Running mean after adding `sample` to `count` prior observations.
    pub fn accumulate(self, count: u64, sample: FixedMillis) -> FixedMillis {
        let total = self.0 as i128 * count as i128 + sample.0 as i128;
        let n = count as i128 + 1;
        // round half away from zero
        let avg = (total * 2 + n) / (n * 2);
        FixedMillis(i64::try_from(avg).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for FixedMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / Self::SCALE;
        let frac = (self.0 % Self::SCALE).abs();
        write!(f, "{}.{:04}", whole, frac)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMetricsDaily {
    pub date: NaiveDate,
    pub endpoint_class: EndpointClass,
    pub request_count: u64,
    pub error_count: u64,
    pub avg_response_time: FixedMillis,
}

impl ApiMetricsDaily {
    pub fn new(date: NaiveDate, endpoint_class: EndpointClass) -> Self {
        Self {
            date,
            endpoint_class,
            request_count: 0,
            error_count: 0,
            avg_response_time: FixedMillis::default(),
        }
    }

    pub fn record(&mut self, latency: FixedMillis, success: bool) {
        self.avg_response_time = self.avg_response_time.accumulate(self.request_count, latency);
        self.request_count += 1;
        if !success {
            self.error_count += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Promotion audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ChangeType {
    Created,
    Updated,
    NoChange,
    Skip,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FieldChanged {
    Show,
    Venue,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionRun {
    pub id: Option<Uuid>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PromotionRun {
    pub fn new(name: String) -> Self {
        Self {
            id: None,
            name,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

/// A record of one change made while promoting a schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub id: Option<Uuid>,
    pub promotion_run_id: Uuid,
    pub parsed_schedule_id: Uuid,
    pub change_type: ChangeType,
    pub change_log: String,
    pub field_changed: FieldChanged,
    pub show_id: Option<Uuid>,
    pub venue_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl PromotionRecord {
    pub fn new(
        promotion_run_id: Uuid,
        parsed_schedule_id: Uuid,
        change_type: ChangeType,
        change_log: String,
        field_changed: FieldChanged,
    ) -> Self {
        Self {
            id: None,
            promotion_run_id,
            parsed_schedule_id,
            change_type,
            change_log,
            field_changed,
            show_id: None,
            venue_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_show(mut self, show_id: Uuid) -> Self {
        self.show_id = Some(show_id);
        self
    }

    pub fn with_venue(mut self, venue_id: Uuid) -> Self {
        self.venue_id = Some(venue_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(venue: &str, day: Weekday, hh: u32) -> ScheduleEntry {
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
            host: None,
            description: None,
        }
    }

    #[test]
    fn test_schedule_key_ignores_case_and_punctuation() {
        let a = entry("The Rusty Mic!", Weekday::Fri, 21);
        let b = entry("the  rusty mic", Weekday::Fri, 21);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), entry("The Rusty Mic", Weekday::Sat, 21).key());
    }

    #[test]
    fn test_fill_missing_keeps_existing_values() {
        let mut a = entry("Bar", Weekday::Mon, 20);
        a.host = Some("DJ One".into());
        let mut b = entry("Bar", Weekday::Mon, 20);
        b.host = Some("DJ Two".into());
        b.city = Some("Austin".into());
        a.fill_missing_from(&b);
        assert_eq!(a.host.as_deref(), Some("DJ One"));
        assert_eq!(a.city.as_deref(), Some("Austin"));
        assert_eq!(a.completeness(), 2);
    }

    #[test]
    fn test_fixed_millis_running_average() {
        let mut avg = FixedMillis::default();
        avg = avg.accumulate(0, FixedMillis::from_duration(Duration::from_millis(100)));
        avg = avg.accumulate(1, FixedMillis::from_duration(Duration::from_millis(200)));
        avg = avg.accumulate(2, FixedMillis::from_duration(Duration::from_millis(301)));
        assert_eq!(avg.to_string(), "200.3333");
    }

    #[test]
    fn test_fixed_millis_tolerates_huge_samples() {
        let big = FixedMillis::from_raw(i64::MAX / 2);
        let avg = big.accumulate(u32::MAX as u64, big);
        assert_eq!(avg, big);
    }

    #[test]
    fn test_daily_metrics_counts_errors() {
        let mut m = ApiMetricsDaily::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), EndpointClass::AiText);
        m.record(FixedMillis::from_raw(10_000), true);
        m.record(FixedMillis::from_raw(30_000), false);
        assert_eq!(m.request_count, 2);
        assert_eq!(m.error_count, 1);
        assert_eq!(m.avg_response_time.to_string(), "2.0000");
    }
}
