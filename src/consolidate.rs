//! Merge the extraction passes for one source into a [`ParsedSchedule`].
//!
//! Duplicate reports of the same slot (venue, weekday, start time) collapse
//! into one entry. The winner is the most recently extracted report, then the
//! most complete; gaps in the winner are filled from the losers. Every pass,
//! failed or not, and every merge is written to the parsing log.

use crate::constants::SCHEDULE_NAMESPACE;
use crate::domain::{LogLevel, ParsedSchedule, ParsingEvent, ParsingLog, ScheduleEntry, ScheduleKey};
use crate::extraction::ExtractionResult;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Deterministic id for a consolidated schedule
pub fn schedule_id(source_url: &str, extracted_at: DateTime<Utc>) -> Uuid {
    let name = format!("{}|{}", source_url, extracted_at.to_rfc3339());
    Uuid::new_v5(&SCHEDULE_NAMESPACE, name.as_bytes())
}

struct Report<'a> {
    entry: &'a ScheduleEntry,
    extracted_at: DateTime<Utc>,
    pass: usize,
}

pub fn consolidate(candidate_url: &str, source_url: &str, results: &[ExtractionResult]) -> ParsedSchedule {
    let mut ordered: Vec<&ExtractionResult> = results.iter().collect();
    ordered.sort_by_key(|r| (r.pass, r.extracted_at));

    let extracted_at = ordered.iter().map(|r| r.extracted_at).max().unwrap_or_else(Utc::now);

    let mut groups: BTreeMap<ScheduleKey, Vec<Report>> = BTreeMap::new();
    for result in &ordered {
        if let Ok(entries) = &result.outcome {
            for entry in entries {
                groups.entry(entry.key()).or_default().push(Report {
                    entry,
                    extracted_at: result.extracted_at,
                    pass: result.pass,
                });
            }
        }
    }

    let mut merges = Vec::new();
    let entries: Vec<ScheduleEntry> = groups
        .into_iter()
        .map(|(key, mut reports)| {
            // best first: newest, then most complete, then earliest pass
            reports.sort_by(|a, b| {
                b.extracted_at
                    .cmp(&a.extracted_at)
                    .then_with(|| b.entry.completeness().cmp(&a.entry.completeness()))
                    .then_with(|| a.pass.cmp(&b.pass))
            });
            let mut winner = reports[0].entry.clone();
            for loser in &reports[1..] {
                winner.fill_missing_from(loser.entry);
            }
            if reports.len() > 1 {
                merges.push((key, reports.len() - 1));
            }
            winner
        })
        .collect();

    let id = schedule_id(source_url, extracted_at);
    let mut schedule = ParsedSchedule::new(id, source_url.to_string(), candidate_url.to_string(), extracted_at, entries);

    for result in &ordered {
        let log = match &result.outcome {
            Ok(entries) => ParsingLog {
                at: result.extracted_at,
                level: LogLevel::Info,
                event: ParsingEvent::ExtractionSucceeded {
                    pass: result.pass,
                    profile: result.profile,
                    entries: entries.len(),
                },
                message: format!("pass {} ({}) extracted {} show(s)", result.pass, result.profile, entries.len()),
            },
            Err(failure) => ParsingLog {
                at: result.extracted_at,
                level: if failure.is_transient() { LogLevel::Warn } else { LogLevel::Error },
                event: ParsingEvent::ExtractionFailed {
                    pass: result.pass,
                    profile: result.profile,
                    failure: failure.clone(),
                },
                message: format!("pass {} ({}) failed: {}", result.pass, result.profile, failure),
            },
        };
        schedule.append_log(log);
    }

    for (key, discarded) in merges {
        schedule.append_log(ParsingLog {
            at: extracted_at,
            level: LogLevel::Info,
            event: ParsingEvent::DuplicateMerged {
                key: key.to_string(),
                discarded,
            },
            message: format!("merged {} duplicate report(s) of {}", discarded, key),
        });
    }

    debug!(
        source_url,
        entries = schedule.entries().len(),
        logs = schedule.parsing_logs().len(),
        "Consolidated schedule"
    );
    schedule
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessingFailure;
    use crate::extraction::ModelProfile;
    use chrono::{Duration, NaiveTime, TimeZone, Weekday};

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

    fn result(pass: usize, offset_secs: i64, outcome: Result<Vec<ScheduleEntry>, ProcessingFailure>) -> ExtractionResult {
        ExtractionResult {
            pass,
            profile: ModelProfile::Worker,
            source_url: "https://example.com/venue-schedule".into(),
            extracted_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(offset_secs),
            outcome,
        }
    }

    const URL: &str = "https://example.com/venue-schedule";

    #[test]
    fn test_distinct_slots_are_kept() {
        let results = vec![result(
            0,
            0,
            Ok(vec![entry("Rusty Mic", Weekday::Fri, 21), entry("Rusty Mic", Weekday::Tue, 20)]),
        )];
        let schedule = consolidate(URL, URL, &results);
        assert_eq!(schedule.entries().len(), 2);
        assert_eq!(schedule.parsing_logs().len(), 1);
    }

    #[test]
    fn test_duplicates_prefer_newest_then_fill_gaps() {
        let mut old = entry("Rusty Mic", Weekday::Fri, 21);
        old.host = Some("DJ Old".into());
        old.city = Some("Austin".into());
        let mut new = entry("rusty mic", Weekday::Fri, 21);
        new.host = Some("DJ New".into());

        let results = vec![result(0, 0, Ok(vec![old])), result(1, 30, Ok(vec![new]))];
        let schedule = consolidate(URL, URL, &results);

        assert_eq!(schedule.entries().len(), 1);
        let merged = &schedule.entries()[0];
        assert_eq!(merged.host.as_deref(), Some("DJ New"));
        assert_eq!(merged.city.as_deref(), Some("Austin"));
        assert!(schedule
            .parsing_logs()
            .iter()
            .any(|l| matches!(l.event, ParsingEvent::DuplicateMerged { discarded: 1, .. })));
    }

    #[test]
    fn test_same_time_prefers_more_complete() {
        let sparse = entry("Bar", Weekday::Mon, 20);
        let mut full = entry("Bar", Weekday::Mon, 20);
        full.host = Some("KJ Nova".into());
        full.end_time = NaiveTime::from_hms_opt(23, 0, 0);
        let schedule = consolidate(URL, URL, &[result(0, 0, Ok(vec![sparse, full.clone()]))]);
        assert_eq!(schedule.entries()[0], full);
    }

    #[test]
    fn test_failures_are_logged_not_dropped() {
        let results = vec![
            result(0, 0, Ok(vec![entry("Bar", Weekday::Mon, 20)])),
            result(
                1,
                5,
                Err(ProcessingFailure::ExtractionProviderError {
                    attempts: 3,
                    message: "rate limited".into(),
                }),
            ),
        ];
        let schedule = consolidate(URL, URL, &results);
        assert_eq!(schedule.entries().len(), 1);
        let failed = schedule
            .parsing_logs()
            .iter()
            .find(|l| matches!(l.event, ParsingEvent::ExtractionFailed { .. }))
            .unwrap();
        assert_eq!(failed.level, LogLevel::Error);
    }

    #[test]
    fn test_consolidation_is_deterministic() {
        let results = vec![
            result(1, 10, Ok(vec![entry("Bar", Weekday::Mon, 20), entry("Bar", Weekday::Mon, 20)])),
            result(0, 0, Ok(vec![entry("Pub", Weekday::Sat, 22)])),
        ];
        let a = consolidate(URL, URL, &results);
        let mut reversed = results.clone();
        reversed.reverse();
        let b = consolidate(URL, URL, &reversed);
        assert_eq!(a, b);
        assert_eq!(a.entries().len(), 2);
    }
}
