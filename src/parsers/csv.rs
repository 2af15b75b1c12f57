//! CSV catalog dumps.
//!
//! The dialect is sniffed from the header line (delimiter must be one of
//! comma, semicolon, pipe or tab and must produce a consistent column
//! count), then columns are matched by name against the aliases the various
//! agencies use. Quoted fields are handled by a small splitter; no CSV crate
//! in the dependency tree is worth the weight for these feeds.

use tracing::debug;

use crate::error::Rejection;
use crate::parsers::when;
use crate::parsers::{Payload, PayloadParser};
use crate::types::{Coords, Magnitude, Report, Status};

const DELIMITERS: &[char] = &[',', ';', '|', '\t'];

/// Split one CSV line honoring double-quoted fields.
fn split_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '"' => quoted = !quoted,
            d if d == delimiter && !quoted => {
                fields.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Choose the delimiter that yields the most columns, consistently across
/// the first few lines.
fn sniff(sample: &str) -> Option<char> {
    let lines: Vec<&str> = sample.lines().filter(|l| !l.trim().is_empty()).take(4).collect();
    if lines.len() < 2 {
        return None;
    }

    let mut best: Option<(char, usize)> = None;
    for &delimiter in DELIMITERS {
        let counts: Vec<usize> = lines
            .iter()
            .map(|l| split_line(l, delimiter).len())
            .collect();
        let first = counts[0];
        if first >= 2 && counts.iter().all(|&c| c == first) {
            if best.map_or(true, |(_, cols)| first > cols) {
                best = Some((delimiter, first));
            }
        }
    }
    best.map(|(d, _)| d)
}

/// Find the index of the first header matching any alias (case-insensitive).
fn column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    headers.iter().position(|h| {
        let h = h.trim().to_lowercase();
        aliases.iter().any(|a| h == a.to_lowercase())
    })
}

pub struct CsvParser;

impl PayloadParser for CsvParser {
    fn name(&self) -> &'static str {
        "csv"
    }

    /// Last resort: plenty of non-CSV text splits on commas.
    fn priority(&self) -> i32 {
        -1
    }

    fn parse(&self, payload: &Payload, limit: usize) -> Result<Vec<Report>, Rejection> {
        let data = payload.text().ok_or_else(|| Rejection::new("not text"))?;
        let sample: String = data.chars().take(4096).collect();
        let delimiter = sniff(&sample).ok_or_else(|| Rejection::new("no CSV dialect"))?;

        let mut lines = data.lines().filter(|l| !l.trim().is_empty());
        let headers = split_line(lines.next().ok_or_else(|| Rejection::new("empty"))?, delimiter);

        let mag_col = column(&headers, &["magnitude", "mag", "ml", "magnitud"])
            .ok_or_else(|| Rejection::new("no magnitude column"))?;
        let lat_col = column(&headers, &["latitude", "lat"])
            .ok_or_else(|| Rejection::new("no latitude column"))?;
        let lon_col = column(&headers, &["longitude", "lon", "long"])
            .ok_or_else(|| Rejection::new("no longitude column"))?;
        let time_col = column(
            &headers,
            &["time", "origin time", "time utc", "datetime", "origintime", "date & time"],
        )
        .ok_or_else(|| Rejection::new("no time column"))?;

        let magtype_col = column(&headers, &["magnitude type", "magtype", "mag type"]);
        let depth_col = column(&headers, &["depth", "depth km", "depth/km", "depth (km)"]);
        let status_col = column(&headers, &["status", "evaluation"]);

        let mut reports = Vec::new();
        for line in lines.take(limit) {
            let fields = split_line(line, delimiter);
            let get = |i: usize| fields.get(i).map(String::as_str).unwrap_or_default();

            let lat: f64 = match get(lat_col).parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            let lon: f64 = match get(lon_col).parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            let depth: f64 = depth_col
                .and_then(|i| get(i).parse().ok())
                .unwrap_or(10.0);

            let Some(time) = when::parse_time(get(time_col), 0.0, true) else {
                debug!(line, "unparsable CSV time");
                continue;
            };
            let Some(mag) = Magnitude::parse(get(mag_col), magtype_col.map(|i| get(i))) else {
                continue;
            };

            let mut report = Report::new(Coords::new(lat, lon, -depth.abs()), time, mag);
            report.status = status_col
                .map(|i| Status::parse(get(i)))
                .unwrap_or(Status::Detection);
            reports.push(report);
        }

        if reports.is_empty() {
            Err(Rejection::new("no convertible CSV rows"))
        } else {
            Ok(reports)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn comma_catalog() {
        let time = (Utc::now() - Duration::minutes(30)).format("%Y-%m-%d %H:%M:%S");
        let csv = format!(
            "Time,Latitude,Longitude,Depth,Magnitude,Magnitude Type\n{time},38.1,22.9,12.5,4.1,ML\n"
        );
        let reports = CsvParser.parse(&Payload::Text(csv), 12).expect("parses");
        assert_eq!(reports.len(), 1);
        assert!((reports[0].mag.value() - 4.1).abs() < 1e-9);
        assert!((reports[0].depth_km() - 12.5).abs() < 1e-9);
        assert_eq!(reports[0].status, Status::Detection);
    }

    #[test]
    fn semicolon_dialect() {
        let time = (Utc::now() - Duration::minutes(30)).format("%Y-%m-%d %H:%M:%S");
        let csv = format!("Lat;Lon;Origin time;Mag\n35.0;25.0;{time};3.9\n");
        let reports = CsvParser.parse(&Payload::Text(csv), 12).expect("parses");
        assert!((reports[0].coords.lon - 25.0).abs() < 1e-9);
    }

    #[test]
    fn quoted_fields() {
        let time = (Utc::now() - Duration::minutes(30)).format("%Y-%m-%d %H:%M:%S");
        let csv = format!(
            "Time,Latitude,Longitude,Magnitude,Place\n\"{time}\",35.0,25.0,4.0,\"Crete, Greece\"\n"
        );
        let reports = CsvParser.parse(&Payload::Text(csv), 12).expect("parses");
        assert_eq!(reports.len(), 1);
    }

    #[test]
    fn prose_rejected() {
        let text = "This is just a sentence, with a comma or two, in it.\nAnd another line.";
        assert!(CsvParser.parse(&Payload::Text(text.into()), 12).is_err());
    }

    #[test]
    fn json_rejected() {
        assert!(CsvParser
            .parse(&Payload::Text("{\"a\": 1}\n{\"b\": 2}".into()), 12)
            .is_err());
    }
}
