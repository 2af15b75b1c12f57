//! Permissive timestamp parsing for feed text.
//!
//! Agency feeds disagree on everything: epoch seconds, epoch millis, ISO
//! 8601, RFC 2822, slashed dates, bare wall-clock times in a local zone,
//! Japanese 時/分/秒 markers. This parser tries the precise forms first and
//! falls back to fuzzy wall-clock interpretation anchored to today in the
//! feed's timezone, preferring the past when asked.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Date+time layouts tried in order.
const LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Time-only layouts, anchored to the current date in the feed's zone.
const TIME_LAYOUTS: &[&str] = &["%H:%M:%S", "%H:%M"];

/// Parse a feed timestamp with a fixed-offset timezone (hours east of UTC).
///
/// `prefer_past` resolves ambiguous wall-clock times to the most recent past
/// occurrence, which is always right for quake reports.
pub fn parse_time(text: &str, offset_hours: f64, prefer_past: bool) -> Option<DateTime<Utc>> {
    if let Some(parsed) = parse_exact(text, offset_hours, prefer_past) {
        return Some(parsed);
    }

    // Fuzzy: pull a timestamp-looking substring out of surrounding prose
    // ("quake struck at 12:30:15 near ..."), date-and-clock first.
    static STAMP: OnceLock<Option<Regex>> = OnceLock::new();
    static CLOCK: OnceLock<Option<Regex>> = OnceLock::new();
    let stamp = STAMP
        .get_or_init(|| Regex::new(r"\d{4}[-/]\d{1,2}[-/]\d{1,2}[ T]\d{1,2}:\d{2}(:\d{2})?").ok())
        .as_ref()?;
    let clock = CLOCK
        .get_or_init(|| Regex::new(r"\b\d{1,2}:\d{2}(:\d{2})?\b").ok())
        .as_ref();

    if let Some(found) = stamp.find(text) {
        return parse_exact(found.as_str(), offset_hours, prefer_past);
    }
    if let Some(found) = clock.and_then(|c| c.find(text)) {
        return parse_exact(found.as_str(), offset_hours, prefer_past);
    }
    None
}

fn parse_exact(text: &str, offset_hours: f64, prefer_past: bool) -> Option<DateTime<Utc>> {
    let cleaned = normalize(text);
    if cleaned.is_empty() {
        return None;
    }

    let offset = FixedOffset::east_opt((offset_hours * 3600.0) as i32)?;

    // Numeric epochs, seconds or milliseconds.
    if let Ok(number) = cleaned.parse::<f64>() {
        // Anything beyond the year ~5000 in seconds must be milliseconds.
        let secs = if number > 95_617_584_000.0 {
            number / 1000.0
        } else {
            number
        };
        return Utc.timestamp_opt(secs as i64, 0).single();
    }

    if let Ok(t) = DateTime::parse_from_rfc3339(&cleaned) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_rfc2822(&cleaned) {
        return Some(t.with_timezone(&Utc));
    }

    for layout in LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, layout) {
            return offset
                .from_local_datetime(&naive)
                .single()
                .map(|t| t.with_timezone(&Utc));
        }
    }

    // Date-only.
    if let Ok(date) = NaiveDate::parse_from_str(&cleaned, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return offset
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.with_timezone(&Utc));
    }

    // Bare wall-clock time: anchor to today in the feed's zone.
    for layout in TIME_LAYOUTS {
        if let Ok(time) = NaiveTime::parse_from_str(&cleaned, layout) {
            return anchor_time(time, offset, prefer_past);
        }
    }

    None
}

/// Combine a date string and a time string, either possibly absent.
pub fn parse_date_time(
    date: Option<&str>,
    time: Option<&str>,
    offset_hours: f64,
    prefer_past: bool,
) -> Option<DateTime<Utc>> {
    match (date, time) {
        (Some(d), Some(t)) => parse_time(&format!("{d} {t}"), offset_hours, prefer_past)
            .or_else(|| parse_time(t, offset_hours, prefer_past)),
        (None, Some(t)) => parse_time(t, offset_hours, prefer_past),
        (Some(d), None) => parse_time(d, offset_hours, prefer_past),
        (None, None) => None,
    }
}

fn anchor_time(
    time: NaiveTime,
    offset: FixedOffset,
    prefer_past: bool,
) -> Option<DateTime<Utc>> {
    let now_local = Utc::now().with_timezone(&offset);
    let candidate = offset
        .from_local_datetime(&now_local.date_naive().and_time(time))
        .single()?
        .with_timezone(&Utc);

    if prefer_past && candidate > Utc::now() {
        Some(candidate - Duration::days(1))
    } else {
        Some(candidate)
    }
}

/// Strip decoration that confuses the layout parsers: duplicate whitespace,
/// Japanese clock markers, trailing zone words.
fn normalize(text: &str) -> String {
    let mut cleaned = text
        .replace('時', ":")
        .replace('分', ":")
        .replace('秒', "")
        .replace("頃", "")
        .replace("UTC", " ")
        .replace("GMT", " ")
        .replace("JST", " ")
        .replace("TSİ", " ")
        .replace("hrs", " ");
    cleaned = cleaned.trim().trim_end_matches([':', '.', ',']).to_string();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn epoch_seconds_and_millis() {
        let secs = parse_time("1700000000", 0.0, false).expect("parses");
        let millis = parse_time("1700000000000", 0.0, false).expect("parses");
        assert_eq!(secs, millis);
    }

    #[test]
    fn iso8601() {
        let t = parse_time("2024-02-01T12:30:00Z", 0.0, false).expect("parses");
        assert_eq!(t.hour(), 12);
    }

    #[test]
    fn offset_applies_to_naive_layouts() {
        let tokyo = parse_time("2024-02-01 21:00:00", 9.0, false).expect("parses");
        let utc = parse_time("2024-02-01 12:00:00", 0.0, false).expect("parses");
        assert_eq!(tokyo, utc);
    }

    #[test]
    fn japanese_clock_markers() {
        let t = parse_time("2024-02-01 21時30分15秒", 9.0, false).expect("parses");
        assert_eq!(t.minute(), 30);
        assert_eq!(t.second(), 15);
    }

    #[test]
    fn bare_time_prefers_past() {
        let t = parse_time("23:59:59", 0.0, true).expect("parses");
        assert!(t <= Utc::now());
    }

    #[test]
    fn combined_date_and_time() {
        let t = parse_date_time(Some("2024-02-01"), Some("12:00:00"), 0.0, true).expect("parses");
        assert_eq!(t.hour(), 12);
    }

    #[test]
    fn garbage_is_none() {
        assert!(parse_time("not a time at all", 0.0, true).is_none());
        assert!(parse_time("", 0.0, true).is_none());
    }
}
