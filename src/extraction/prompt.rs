//! Prompt text, output schema and conversion of model output into entries.

use super::provider::{ItemOutput, ProviderError};
use crate::domain::ScheduleEntry;
use chrono::{NaiveTime, Weekday};
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

/// One unit of content submitted for extraction
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionItem {
    pub source_url: String,
    pub content: String,
    pub image_urls: Vec<String>,
}

pub const SYSTEM_PROMPT: &str = "You extract recurring karaoke show schedules from web pages and social posts. \
For every recurring karaoke night mentioned, report the venue, the weekday, the start time and, when stated, \
the end time, the host or karaoke company, and the venue's address, city, state, website and social links. \
One show per venue, weekday and start time. Use 24-hour HH:MM times. Do not invent details that are not on \
the page; leave unknown fields null. If the page lists no karaoke shows, return an empty list.";

pub fn batch_user_prompt(items: &[ExtractionItem]) -> String {
    let mut prompt = format!(
        "There are {} documents below. Return one result per document, using its index as `item`.\n",
        items.len()
    );
    for (i, item) in items.iter().enumerate() {
        prompt.push_str(&format!(
            "\n=== Document {} (source: {}) ===\n{}\n",
            i, item.source_url, item.content
        ));
        if !item.image_urls.is_empty() {
            prompt.push_str(&format!("[{} attached image(s) belong to this document]\n", item.image_urls.len()));
        }
    }
    prompt
}

fn nullable_string() -> Value {
    json!({ "type": ["string", "null"] })
}

/// Schema for the object produced for one document
pub fn item_schema() -> Value {
    json!({
        "type": "object",
        "required": ["shows"],
        "properties": {
            "shows": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["venue_name", "day_of_week", "start_time"],
                    "properties": {
                        "venue_name": { "type": "string", "minLength": 1 },
                        "day_of_week": { "type": "string", "minLength": 3 },
                        "start_time": { "type": "string", "minLength": 1 },
                        "end_time": nullable_string(),
                        "venue_address": nullable_string(),
                        "city": nullable_string(),
                        "state": nullable_string(),
                        "venue_website": nullable_string(),
                        "venue_instagram": nullable_string(),
                        "venue_facebook": nullable_string(),
                        "host": nullable_string(),
                        "description": nullable_string()
                    }
                }
            }
        }
    })
}

pub fn batch_response_schema() -> Value {
    let mut result = item_schema();
    result["required"] = json!(["item", "shows"]);
    result["properties"]["item"] = json!({ "type": "integer", "minimum": 0 });
    json!({
        "type": "object",
        "required": ["results"],
        "properties": {
            "results": { "type": "array", "items": result }
        }
    })
}

static ITEM_SCHEMA: Lazy<Value> = Lazy::new(item_schema);
static ITEM_VALIDATOR: Lazy<JSONSchema> =
    Lazy::new(|| JSONSchema::options().compile(&ITEM_SCHEMA).expect("static schema compiles"));

/// Split a batched model response into one output per submitted item.
pub fn split_batch_response(content: &str, expected: usize) -> Vec<ItemOutput> {
    let parsed: Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            let err = ProviderError::Malformed(format!("response is not JSON: {}", e));
            return vec![Err(err); expected];
        }
    };
    let results = parsed.get("results").and_then(|r| r.as_array()).cloned().unwrap_or_default();

    let mut outputs: Vec<ItemOutput> = (0..expected)
        .map(|i| Err(ProviderError::Malformed(format!("no result for item {}", i))))
        .collect();
    for result in results {
        let Some(index) = result.get("item").and_then(|i| i.as_u64()).map(|i| i as usize) else {
            continue;
        };
        if index < expected {
            outputs[index] = Ok(json!({ "shows": result.get("shows").cloned().unwrap_or(Value::Null) }));
        }
    }
    outputs
}

#[derive(Debug, Deserialize)]
struct RawShow {
    venue_name: String,
    day_of_week: String,
    start_time: String,
    end_time: Option<String>,
    venue_address: Option<String>,
    city: Option<String>,
    state: Option<String>,
    venue_website: Option<String>,
    venue_instagram: Option<String>,
    venue_facebook: Option<String>,
    host: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    shows: Vec<RawShow>,
}

/// Validate one item's model output and convert it to schedule entries.
///
/// Structural violations are an error. Individual shows with a blank venue name
/// or an unreadable weekday or time are dropped; if every show is dropped the
/// item is an error.
pub fn entries_from_output(output: &Value) -> Result<Vec<ScheduleEntry>, String> {
    if let Err(errors) = ITEM_VALIDATOR.validate(output) {
        let detail = errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(detail);
    }
    let raw: RawItem = serde_json::from_value(output.clone()).map_err(|e| e.to_string())?;
    let total = raw.shows.len();

    let entries: Vec<ScheduleEntry> = raw
        .shows
        .into_iter()
        .filter_map(|show| match to_entry(show) {
            Ok(entry) => Some(entry),
            Err(reason) => {
                warn!("Dropping extracted show: {}", reason);
                None
            }
        })
        .collect();

    if total > 0 && entries.is_empty() {
        return Err(format!("none of the {} extracted shows had a venue, day and time", total));
    }
    Ok(entries)
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn to_entry(show: RawShow) -> Result<ScheduleEntry, String> {
    let venue_name = show.venue_name.trim().to_string();
    if venue_name.is_empty() {
        return Err("blank venue name".to_string());
    }
    let day_of_week =
        parse_weekday(&show.day_of_week).ok_or_else(|| format!("unreadable weekday '{}'", show.day_of_week))?;
    let start_time =
        parse_time(&show.start_time).ok_or_else(|| format!("unreadable start time '{}'", show.start_time))?;
    let end_time = clean(show.end_time).and_then(|t| parse_time(&t));
    Ok(ScheduleEntry {
        venue_name,
        venue_address: clean(show.venue_address),
        city: clean(show.city),
        state: clean(show.state),
        venue_website: clean(show.venue_website),
        venue_instagram: clean(show.venue_instagram),
        venue_facebook: clean(show.venue_facebook),
        day_of_week,
        start_time,
        end_time,
        host: clean(show.host),
        description: clean(show.description),
    })
}

/// "Friday", "fri", "Fridays", "FRI." all read as Friday
pub fn parse_weekday(raw: &str) -> Option<Weekday> {
    let word = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    let word = word.strip_suffix("days").map(|w| format!("{w}day")).unwrap_or(word);
    match word.get(..3)? {
        "mon" => Some(Weekday::Mon),
        "tue" => Some(Weekday::Tue),
        "wed" => Some(Weekday::Wed),
        "thu" => Some(Weekday::Thu),
        "fri" => Some(Weekday::Fri),
        "sat" => Some(Weekday::Sat),
        "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d{1,2})(?:[:.](\d{2}))?\s*(a\.?m\.?|p\.?m\.?)?\s*$").expect("static regex")
});

/// Accepts "21:00", "9pm", "9:30 PM", "9.30p.m."; "noon" and "midnight" too.
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "noon" => return NaiveTime::from_hms_opt(12, 0, 0),
        "midnight" => return NaiveTime::from_hms_opt(0, 0, 0),
        _ => {}
    }
    let caps = TIME_RE.captures(raw)?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(2).map(|m| m.as_str().parse()).transpose().ok()?.unwrap_or(0);
    if let Some(meridiem) = caps.get(3) {
        if hour == 0 || hour > 12 {
            return None;
        }
        let pm = meridiem.as_str().to_ascii_lowercase().starts_with('p');
        hour = match (pm, hour) {
            (false, 12) => 0,
            (true, 12) => 12,
            (true, h) => h + 12,
            (false, h) => h,
        };
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_weekday_variants() {
        assert_eq!(parse_weekday("Friday"), Some(Weekday::Fri));
        assert_eq!(parse_weekday(" fri. "), Some(Weekday::Fri));
        assert_eq!(parse_weekday("Thursdays"), Some(Weekday::Thu));
        assert_eq!(parse_weekday("TUE"), Some(Weekday::Tue));
        assert_eq!(parse_weekday("weekly"), None);
        assert_eq!(parse_weekday("m"), None);
    }

    #[test]
    fn test_parse_time_variants() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0);
        assert_eq!(parse_time("21:00"), t(21, 0));
        assert_eq!(parse_time("9pm"), t(21, 0));
        assert_eq!(parse_time("9:30 PM"), t(21, 30));
        assert_eq!(parse_time("9.30p.m."), t(21, 30));
        assert_eq!(parse_time("12am"), t(0, 0));
        assert_eq!(parse_time("12 pm"), t(12, 0));
        assert_eq!(parse_time("midnight"), t(0, 0));
        assert_eq!(parse_time("25:00"), None);
        assert_eq!(parse_time("13pm"), None);
        assert_eq!(parse_time("late"), None);
    }

    #[test]
    fn test_entries_from_valid_output() {
        let output = json!({"shows": [
            {"venue_name": "The Rusty Mic", "day_of_week": "Friday", "start_time": "9pm", "end_time": "1:00 AM",
             "host": "DJ Sparkle", "city": " Austin ", "state": "TX"},
            {"venue_name": "The Rusty Mic", "day_of_week": "Tuesday", "start_time": "20:00"}
        ]});
        let entries = entries_from_output(&output).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].city.as_deref(), Some("Austin"));
        assert_eq!(entries[0].end_time, NaiveTime::from_hms_opt(1, 0, 0));
        assert_eq!(entries[1].day_of_week, Weekday::Tue);
    }

    #[test]
    fn test_structural_violation_is_error() {
        assert!(entries_from_output(&json!({"shows": [{"venue_name": "Bar"}]})).is_err());
        assert!(entries_from_output(&json!({"shows": "none"})).is_err());
        assert!(entries_from_output(&json!({"shows": []})).unwrap().is_empty());
    }

    #[test]
    fn test_all_unreadable_is_error_but_partial_is_kept() {
        let bad = json!({"shows": [{"venue_name": "Bar", "day_of_week": "weekly", "start_time": "9pm"}]});
        assert!(entries_from_output(&bad).is_err());

        let mixed = json!({"shows": [
            {"venue_name": "Bar", "day_of_week": "weekly", "start_time": "9pm"},
            {"venue_name": "Bar", "day_of_week": "Sat", "start_time": "10pm"}
        ]});
        assert_eq!(entries_from_output(&mixed).unwrap().len(), 1);
    }

    #[test]
    fn test_whitespace_venue_name_is_dropped() {
        let mixed = json!({"shows": [
            {"venue_name": "   ", "day_of_week": "Fri", "start_time": "9pm"},
            {"venue_name": " Bar ", "day_of_week": "Fri", "start_time": "9pm"}
        ]});
        let entries = entries_from_output(&mixed).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].venue_name, "Bar");

        let blank = json!({"shows": [{"venue_name": "\t\n", "day_of_week": "Fri", "start_time": "9pm"}]});
        assert!(entries_from_output(&blank).is_err());
    }

    #[test]
    fn test_split_batch_response_by_index() {
        let content = r#"{"results": [
            {"item": 1, "shows": []},
            {"item": 0, "shows": [{"venue_name": "Bar", "day_of_week": "Mon", "start_time": "8pm"}]},
            {"item": 7, "shows": []}
        ]}"#;
        let outputs = split_batch_response(content, 3);
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[1].as_ref().unwrap()["shows"], json!([]));
        assert!(outputs[0].as_ref().unwrap()["shows"].is_array());
        assert!(matches!(outputs[2], Err(ProviderError::Malformed(_))));
    }

    #[test]
    fn test_split_non_json_marks_all_malformed() {
        let outputs = split_batch_response("Sorry, I can't help", 2);
        assert!(outputs.iter().all(|o| matches!(o, Err(ProviderError::Malformed(_)))));
    }
}
