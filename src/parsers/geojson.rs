//! JSON quake feeds: GeoJSON feature collections, assorted national-agency
//! JSON dialects, and the P2PQuake JSON API.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Rejection;
use crate::parsers::when;
use crate::parsers::{Payload, PayloadParser};
use crate::types::{Coords, Magnitude, Report, Severity, Status, Water};

/// Walk a path of object keys / array indexes.
fn dig<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for step in path {
        current = match step.parse::<usize>() {
            Ok(index) => current.get(index)?,
            Err(_) => current.get(step)?,
        };
    }
    Some(current)
}

/// First present value among several paths (dot-separated).
fn first<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths.iter().find_map(|path| {
        let steps: Vec<&str> = path.split('.').collect();
        dig(value, &steps)
    })
}

/// Numbers come as numbers or strings depending on the agency.
fn num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// GeoJSON / generic JSON feeds
// ============================================================================

pub struct GeoJsonParser;

impl GeoJsonParser {
    /// Pull the item list out of the envelope. Several agencies wrap their
    /// arrays under ad-hoc keys.
    fn load(data: &str) -> Result<Vec<Value>, Rejection> {
        let mut parsed: Value = serde_json::from_str(data)
            .map_err(|e| Rejection::new(format!("not JSON: {e}")))?;

        // Some push services put the review action beside the data object.
        if let (Some(action), Some(data_obj)) = (
            parsed.get("action").cloned(),
            parsed.get_mut("data").and_then(Value::as_object_mut),
        ) {
            data_obj.insert("action".to_string(), action);
        }

        for key in ["features", "data", "ultimos_sismos", "ultimos_sismos_chile"] {
            match parsed.get(key) {
                Some(Value::Array(items)) => return Ok(items.clone()),
                Some(single @ Value::Object(_)) => return Ok(vec![single.clone()]),
                _ => {}
            }
        }

        match parsed {
            Value::Array(items) => Ok(items),
            item @ Value::Object(_) => Ok(vec![item]),
            _ => Err(Rejection::new("JSON with no item list")),
        }
    }

    fn convert(item: &Value) -> Result<Report, Rejection> {
        // GeoJSON features keep the payload under `properties`.
        let (coords, body) = match dig(item, &["geometry", "coordinates"]) {
            Some(Value::Array(position)) => {
                let values: Vec<f64> = position.iter().filter_map(num).collect();
                let coords = Coords::from_geojson(&values)
                    .ok_or_else(|| Rejection::new("bad GeoJSON coordinates"))?;
                (coords, item.get("properties").unwrap_or(item))
            }
            _ => {
                let lat = first(item, &["latitude", "lat"])
                    .and_then(num)
                    .ok_or_else(|| Rejection::new("no latitude"))?;
                let lon = first(item, &["longitude", "lon"])
                    .and_then(num)
                    .ok_or_else(|| Rejection::new("no longitude"))?;
                let depth = first(item, &["depth", "profundidad"]).and_then(num).unwrap_or(10.0);
                (Coords::new(lat, lon, depth), item)
            }
        };

        let mut coords = coords;
        coords.alt_km = -coords.alt_km.abs();

        let time = first(body, &["time.time", "time", "utc_time", "date_time", "origintime"])
            .and_then(|v| text(v))
            .and_then(|t| when::parse_time(&t, 0.0, true))
            .ok_or_else(|| Rejection::new("no usable time"))?;

        let mag_value = first(body, &["magnitude.mag", "magnitude", "mag"])
            .and_then(num)
            .ok_or_else(|| Rejection::new("no magnitude"))?;
        let mag_type = first(
            body,
            &["magType", "magtype", "magnitudetype", "scale", "magnitude.mag_type"],
        )
        .and_then(|v| text(v));

        let mut report = Report::new(coords, time, Magnitude::new(mag_value, mag_type.as_deref()));

        if let Some(update) = first(
            body,
            &["time.last_update_time", "updated", "lastupdate", "modificationtime"],
        )
        .and_then(|v| text(v))
        .and_then(|t| when::parse_time(&t, 0.0, true))
        {
            report.update = report.update.max(update);
        }

        report.sources = first(body, &["auth", "sources", "source", "agency"])
            .and_then(|v| text(v))
            .map(|s| s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();

        if let Some(alert) = first(body, &["alert", "effects.color.0"]).and_then(|v| text(v)) {
            report.alert = Severity::parse(&alert);
        }

        if let Some(status) = first(body, &["quality", "action", "status"]).and_then(|v| text(v)) {
            report.status = Status::parse(&status);
        }

        match first(body, &["tsunami"]) {
            Some(Value::Bool(true)) => report.water = Some(Water::Yes),
            Some(Value::Number(n)) if n.as_f64().unwrap_or(0.0) != 0.0 => {
                report.water = Some(Water::Yes);
            }
            _ => {}
        }

        if let Some(link) = first(body, &["url", "link"]).and_then(|v| text(v)) {
            report.links.push(link);
        }

        if report.time > Utc::now() {
            return Err(Rejection::new("future time"));
        }

        Ok(report)
    }
}

impl PayloadParser for GeoJsonParser {
    fn name(&self) -> &'static str {
        "geojson"
    }

    fn priority(&self) -> i32 {
        5
    }

    fn parse(&self, payload: &Payload, limit: usize) -> Result<Vec<Report>, Rejection> {
        let data = payload.text().ok_or_else(|| Rejection::new("not text"))?;
        let items = Self::load(data)?;

        let mut reports = Vec::new();
        for item in items.iter().take(limit) {
            match Self::convert(item) {
                Ok(report) => reports.push(report),
                Err(rejection) => debug!(reason = %rejection, "skipping JSON item"),
            }
        }

        if reports.is_empty() {
            Err(Rejection::new("no convertible JSON items"))
        } else {
            Ok(reports)
        }
    }
}

// ============================================================================
// P2PQuake
// ============================================================================

/// P2PQuake JSON: the websocket service pushes single objects, the REST API
/// returns a list. Times are JST.
pub struct P2PQuakeParser;

impl P2PQuakeParser {
    fn load(data: &str) -> Result<Vec<Value>, Rejection> {
        let parsed: Value =
            serde_json::from_str(data).map_err(|e| Rejection::new(format!("not JSON: {e}")))?;

        let items = match parsed {
            Value::Array(items) => items,
            item @ Value::Object(_) => vec![item],
            _ => return Err(Rejection::new("unexpected JSON shape")),
        };

        // Every P2PQuake message has a time and a message code.
        match items.first() {
            Some(head) if head.get("time").is_some() && head.get("code").is_some() => Ok(items),
            _ => Err(Rejection::new("not a P2PQuake message")),
        }
    }

    fn convert(item: &Value) -> Result<Report, Rejection> {
        let hypocenter = dig(item, &["earthquake", "hypocenter"])
            .ok_or_else(|| Rejection::new("non-earthquake P2PQuake message"))?;

        // The v1 API passes these as annotated strings, v2 as numbers.
        let lat = hypocenter
            .get("latitude")
            .and_then(|v| text(v))
            .map(|s| s.trim_matches(['N', 'S']).to_string())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| Rejection::new("no hypocenter latitude"))?;
        let lon = hypocenter
            .get("longitude")
            .and_then(|v| text(v))
            .map(|s| s.trim_matches(['E', 'W']).to_string())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| Rejection::new("no hypocenter longitude"))?;
        let depth = hypocenter
            .get("depth")
            .and_then(|v| text(v))
            .map(|s| s.replace("km", "").replace("ごく浅い", "10"))
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(10.0);

        let time = dig(item, &["earthquake", "time"])
            .and_then(|v| text(v))
            .and_then(|t| when::parse_time(&t, 9.0, true))
            .ok_or_else(|| Rejection::new("no origin time"))?;

        let mag = hypocenter
            .get("magnitude")
            .and_then(num)
            .ok_or_else(|| Rejection::new("no magnitude"))?;

        let mut report = Report::new(
            Coords::new(lat, lon, -depth.abs()),
            time,
            Magnitude::new(mag, None),
        );

        if let Some(update) = item
            .get("time")
            .and_then(|v| text(v))
            .and_then(|t| when::parse_time(&t, 9.0, true))
        {
            report.update = report.update.max(update);
        }

        if let Some(source) = dig(item, &["issue", "source"]).and_then(|v| text(v)) {
            report.sources = vec![source];
        }

        Ok(report)
    }
}

impl PayloadParser for P2PQuakeParser {
    fn name(&self) -> &'static str {
        "p2pquake"
    }

    fn priority(&self) -> i32 {
        6
    }

    fn parse(&self, payload: &Payload, limit: usize) -> Result<Vec<Report>, Rejection> {
        let data = payload.text().ok_or_else(|| Rejection::new("not text"))?;
        let items = Self::load(data)?;

        let mut reports = Vec::new();
        for item in items.iter().take(limit) {
            match Self::convert(item) {
                Ok(report) => reports.push(report),
                Err(rejection) => warn!(reason = %rejection, "skipping P2PQuake item"),
            }
        }

        if reports.is_empty() {
            Err(Rejection::new("no convertible P2PQuake items"))
        } else {
            Ok(reports)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn minutes_ago(m: i64) -> String {
        (Utc::now() - Duration::minutes(m))
            .format("%Y-%m-%dT%H:%M:%S+00:00")
            .to_string()
    }

    #[test]
    fn usgs_style_feature_collection() {
        let json = format!(
            r#"{{
                "type": "FeatureCollection",
                "features": [{{
                    "type": "Feature",
                    "properties": {{
                        "mag": 5.2, "magType": "mw", "time": "{}",
                        "updated": "{}", "alert": "green", "tsunami": 0,
                        "sources": "us,jma", "url": "https://example.org/ev"
                    }},
                    "geometry": {{"type": "Point", "coordinates": [139.7, 35.6, 10.0]}}
                }}]
            }}"#,
            minutes_ago(5),
            minutes_ago(3),
        );

        let reports = GeoJsonParser
            .parse(&Payload::Text(json), 12)
            .expect("parses");
        assert_eq!(reports.len(), 1);
        let r = &reports[0];
        assert!((r.coords.lat - 35.6).abs() < 1e-9);
        assert!(r.coords.alt_km < 0.0, "depth must be below surface");
        assert!((r.mag.value() - 5.2).abs() < 1e-9);
        assert_eq!(r.sources, vec!["us".to_string(), "jma".to_string()]);
        assert_eq!(r.alert, Severity::Green);
    }

    #[test]
    fn flat_json_dialect() {
        let json = format!(
            r#"[{{"latitude": "-33.4", "longitude": "-70.6", "depth": "35",
                 "magnitude": "6.1", "scale": "Mw", "utc_time": "{}",
                 "agency": "CSN"}}]"#,
            minutes_ago(10),
        );
        let reports = GeoJsonParser
            .parse(&Payload::Text(json), 12)
            .expect("parses");
        assert!((reports[0].coords.lat + 33.4).abs() < 1e-9);
        assert!((reports[0].depth_km() - 35.0).abs() < 1e-9);
    }

    #[test]
    fn p2pquake_v1_strings() {
        let json = format!(
            r#"{{
                "time": "{}",
                "code": 551,
                "issue": {{"source": "JMA"}},
                "earthquake": {{
                    "time": "{}",
                    "hypocenter": {{
                        "latitude": "35.6N", "longitude": "139.7E",
                        "depth": "30km", "magnitude": 5.5
                    }}
                }}
            }}"#,
            (Utc::now() + Duration::hours(9) - Duration::minutes(2)).format("%Y/%m/%d %H:%M:%S"),
            (Utc::now() + Duration::hours(9) - Duration::minutes(4)).format("%Y/%m/%d %H:%M:%S"),
        );

        let reports = P2PQuakeParser
            .parse(&Payload::Text(json), 12)
            .expect("parses");
        assert_eq!(reports[0].sources, vec!["JMA".to_string()]);
        assert!((reports[0].depth_km() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn non_earthquake_p2pquake_rejected() {
        let json = r#"{"time": "2024/02/01 12:00:00", "code": 555, "areas": []}"#;
        assert!(P2PQuakeParser.parse(&Payload::Text(json.into()), 12).is_err());
    }

    #[test]
    fn non_json_rejected() {
        assert!(GeoJsonParser
            .parse(&Payload::Text("<xml></xml>".into()), 12)
            .is_err());
    }
}
