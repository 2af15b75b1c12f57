//! QuakeML parsing: full `<event>` trees plus station-level `<pick>`
//! elements from early-estimation feeds.
//!
//! Events carry everything a report needs. Picks carry only a station code
//! and a characteristic period `t0`; the magnitude is estimated from `t0`
//! and the station coordinates come from a station table supplied at
//! construction (picks without a known station are skipped).

use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use std::collections::HashMap;
use tracing::debug;

use crate::error::Rejection;
use crate::parsers::when;
use crate::parsers::{Payload, PayloadParser};
use crate::types::{clip, Coords, Magnitude, Report, Status};

/// Accumulated fields of one `<event>` element.
#[derive(Default, Debug)]
struct EventFields {
    time: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    depth_m: Option<f64>,
    mag: Option<f64>,
    mag_type: Option<String>,
    station_count: Option<f64>,
    upper_uncertainty: Option<f64>,
    lower_uncertainty: Option<f64>,
    evaluation: Option<String>,
    agency: Option<String>,
    author: Option<String>,
    creation_time: Option<String>,
}

/// Accumulated fields of one `<pick>` element.
#[derive(Default, Debug)]
struct PickFields {
    t0: Option<f64>,
    network: Option<String>,
    station: Option<String>,
    time: Option<String>,
}

pub struct QuakeMlParser {
    /// "NET.STA" → station coordinates, for pick location.
    stations: HashMap<String, Coords>,
}

impl QuakeMlParser {
    pub fn new() -> Self {
        Self {
            stations: HashMap::new(),
        }
    }

    /// With a station table for pick handling.
    pub fn with_stations(stations: HashMap<String, Coords>) -> Self {
        Self { stations }
    }

    fn convert_event(&self, fields: &EventFields) -> Result<Report, Rejection> {
        let lat = fields.latitude.ok_or_else(|| Rejection::new("no latitude"))?;
        let lon = fields.longitude.ok_or_else(|| Rejection::new("no longitude"))?;
        let depth_km = fields.depth_m.map(|m| m.abs() / 1000.0).unwrap_or(10.0);

        let time = fields
            .time
            .as_deref()
            .and_then(|t| when::parse_time(t, 0.0, true))
            .ok_or_else(|| Rejection::new("no origin time"))?;

        let mag = fields.mag.ok_or_else(|| Rejection::new("no magnitude"))?;

        let mut report = Report::new(
            Coords::new(lat, lon, -depth_km),
            time,
            Magnitude::new(mag, fields.mag_type.as_deref()),
        );

        if let Some(update) = fields
            .creation_time
            .as_deref()
            .and_then(|t| when::parse_time(t, 0.0, true))
        {
            report.update = report.update.max(update);
        }

        if let Some(evaluation) = &fields.evaluation {
            report.status = Status::parse(evaluation);
        }
        // A solution from a couple of stations is barely better than a guess.
        if let Some(count) = fields.station_count {
            if count > 0.0 && count < 4.0 {
                report.status = Status::Guessed;
            }
            report.score = f64::max(0.1, report.score - 1.5 / count.max(1.0));
        }
        if let (Some(upper), Some(lower)) = (fields.upper_uncertainty, fields.lower_uncertainty) {
            report.score = f64::max(0.1, report.score - (upper - lower));
        }

        report.sources = fields
            .agency
            .clone()
            .or_else(|| fields.author.clone())
            .into_iter()
            .collect();

        Ok(report)
    }

    fn convert_pick(&self, fields: &PickFields) -> Result<Report, Rejection> {
        let t0 = fields.t0.ok_or_else(|| Rejection::new("pick without t0"))?;
        if t0 <= 0.0 {
            return Err(Rejection::new("bad pick t0"));
        }

        let key = format!(
            "{}.{}",
            fields.network.as_deref().unwrap_or(""),
            fields.station.as_deref().unwrap_or("")
        );
        let coords = self
            .stations
            .get(&key)
            .copied()
            .ok_or_else(|| Rejection::new(format!("cannot locate station {key}")))?;

        let time = fields
            .time
            .as_deref()
            .and_then(|t| when::parse_time(t, 0.0, true))
            .ok_or_else(|| Rejection::new("pick without time"))?;

        // Characteristic-period magnitude estimate.
        let log_t0 = t0.log10();
        let mag = clip(0.80 * log_t0.powi(2) + 1.7 * log_t0 - 0.87, 3.5, 6.5);

        let mut report = Report::new(coords, time, Magnitude::new(mag, Some("Md")));
        report.score = 0.5;
        report.status = Status::Guessed;
        report.sources = fields.network.clone().into_iter().collect();

        debug!(station = key, mag = report.mag.value(), "pick converted");
        Ok(report)
    }
}

impl Default for QuakeMlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadParser for QuakeMlParser {
    fn name(&self) -> &'static str {
        "quakeml"
    }

    fn priority(&self) -> i32 {
        2
    }

    fn parse(&self, payload: &Payload, limit: usize) -> Result<Vec<Report>, Rejection> {
        let data = payload.text().ok_or_else(|| Rejection::new("not text"))?;
        if !data.trim_start().starts_with('<') {
            return Err(Rejection::new("not XML"));
        }

        let mut reader = Reader::from_str(data);
        reader.trim_text(true);

        let mut path: Vec<String> = Vec::new();
        let mut reports = Vec::new();
        let mut event: Option<EventFields> = None;
        let mut pick: Option<PickFields> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(XmlEvent::Start(start)) => {
                    let name = local_name(start.name().as_ref());
                    path.push(name.clone());

                    match name.as_str() {
                        "event" => event = Some(EventFields::default()),
                        "pick" => pick = Some(PickFields::default()),
                        "waveformID" | "waveformid" => {
                            if let Some(p) = pick.as_mut() {
                                for attr in start.attributes().flatten() {
                                    let key = local_name(attr.key.as_ref());
                                    let value =
                                        String::from_utf8_lossy(&attr.value).into_owned();
                                    match key.to_lowercase().as_str() {
                                        "networkcode" => p.network = Some(value),
                                        "stationcode" => p.station = Some(value),
                                        _ => {}
                                    }
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Ok(XmlEvent::Empty(start)) => {
                    // Self-closing waveformID carries its codes as attributes.
                    let name = local_name(start.name().as_ref());
                    if name.eq_ignore_ascii_case("waveformid") {
                        if let Some(p) = pick.as_mut() {
                            for attr in start.attributes().flatten() {
                                let key = local_name(attr.key.as_ref());
                                let value = String::from_utf8_lossy(&attr.value).into_owned();
                                match key.to_lowercase().as_str() {
                                    "networkcode" => p.network = Some(value),
                                    "stationcode" => p.station = Some(value),
                                    _ => {}
                                }
                            }
                        }
                    }
                }
                Ok(XmlEvent::End(end)) => {
                    let name = local_name(end.name().as_ref());
                    path.pop();

                    match name.as_str() {
                        "event" => {
                            if let Some(fields) = event.take() {
                                match self.convert_event(&fields) {
                                    Ok(report) => reports.push(report),
                                    Err(rejection) => {
                                        debug!(reason = %rejection, "skipping QuakeML event");
                                    }
                                }
                            }
                        }
                        "pick" => {
                            if let Some(fields) = pick.take() {
                                match self.convert_pick(&fields) {
                                    Ok(report) => reports.push(report),
                                    Err(rejection) => {
                                        debug!(reason = %rejection, "skipping QuakeML pick");
                                    }
                                }
                            }
                        }
                        _ => {}
                    }

                    if reports.len() >= limit {
                        break;
                    }
                }
                Ok(XmlEvent::Text(content)) => {
                    let value = content
                        .unescape()
                        .map(|c| c.into_owned())
                        .unwrap_or_default();
                    if let Some(fields) = event.as_mut() {
                        assign_event_field(fields, &path, &value);
                    }
                    if let Some(fields) = pick.as_mut() {
                        assign_pick_field(fields, &path, &value);
                    }
                }
                Ok(XmlEvent::Eof) => break,
                Err(e) => return Err(Rejection::new(format!("not parsable as QuakeML: {e}"))),
                _ => {}
            }
            buf.clear();
        }

        if reports.is_empty() {
            Err(Rejection::new("no QuakeML events or picks"))
        } else {
            Ok(reports)
        }
    }
}

fn local_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    name.rsplit(':').next().unwrap_or(&name).to_string()
}

/// Does the element path end with the given (case-insensitive) suffix?
fn ends_with(path: &[String], suffix: &[&str]) -> bool {
    if path.len() < suffix.len() {
        return false;
    }
    path[path.len() - suffix.len()..]
        .iter()
        .zip(suffix)
        .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

fn assign_event_field(fields: &mut EventFields, path: &[String], value: &str) {
    let parse = || value.trim().parse::<f64>().ok();

    if ends_with(path, &["origin", "time", "value"]) {
        fields.time = Some(value.to_string());
    } else if ends_with(path, &["latitude", "value"]) {
        fields.latitude = fields.latitude.or_else(parse);
    } else if ends_with(path, &["longitude", "value"]) {
        fields.longitude = fields.longitude.or_else(parse);
    } else if ends_with(path, &["depth", "value"]) {
        fields.depth_m = fields.depth_m.or_else(parse);
    } else if ends_with(path, &["mag", "value"]) {
        fields.mag = fields.mag.or_else(parse);
    } else if ends_with(path, &["mag", "upperUncertainty"]) {
        fields.upper_uncertainty = parse();
    } else if ends_with(path, &["mag", "lowerUncertainty"]) {
        fields.lower_uncertainty = parse();
    } else if ends_with(path, &["magnitude", "type"]) {
        fields.mag_type = Some(value.to_string());
    } else if ends_with(path, &["stationCount"]) {
        fields.station_count = parse();
    } else if ends_with(path, &["evaluationStatus"]) || ends_with(path, &["evaluationMode"]) {
        fields.evaluation.get_or_insert_with(|| value.to_string());
    } else if ends_with(path, &["agencyID"]) {
        fields.agency.get_or_insert_with(|| value.to_string());
    } else if ends_with(path, &["creationInfo", "author"]) {
        fields.author.get_or_insert_with(|| value.to_string());
    } else if ends_with(path, &["creationTime"]) {
        fields.creation_time.get_or_insert_with(|| value.to_string());
    }
}

fn assign_pick_field(fields: &mut PickFields, path: &[String], value: &str) {
    if ends_with(path, &["t0"]) {
        fields.t0 = value.trim().parse().ok();
    } else if ends_with(path, &["pick", "time", "value"]) {
        fields.time = Some(value.to_string());
    } else if ends_with(path, &["networkCode"]) {
        fields.network = Some(value.to_string());
    } else if ends_with(path, &["stationCode"]) {
        fields.station = Some(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn quakeml_event(minutes_ago: i64) -> String {
        let time = (Utc::now() - Duration::minutes(minutes_ago))
            .format("%Y-%m-%dT%H:%M:%S+00:00");
        format!(
            r#"<?xml version="1.0"?>
<q:quakeml xmlns:q="http://quakeml.org/xmlns/quakeml/1.2">
  <eventParameters>
    <event publicID="smi:test/ev1">
      <origin>
        <time><value>{time}</value></time>
        <latitude><value>42.41</value></latitude>
        <longitude><value>13.39</value></longitude>
        <depth><value>10000</value></depth>
        <evaluationMode>manual</evaluationMode>
      </origin>
      <magnitude>
        <mag><value>5.3</value></mag>
        <type>Mw</type>
        <stationCount>25</stationCount>
      </magnitude>
      <creationInfo>
        <agencyID>INGV</agencyID>
        <creationTime>{time}</creationTime>
      </creationInfo>
    </event>
  </eventParameters>
</q:quakeml>"#
        )
    }

    #[test]
    fn event_tree_converts() {
        let parser = QuakeMlParser::new();
        let reports = parser
            .parse(&Payload::Text(quakeml_event(5)), 12)
            .expect("parses");
        assert_eq!(reports.len(), 1);
        let r = &reports[0];
        assert!((r.mag.value() - 5.3).abs() < 1e-9);
        assert!((r.depth_km() - 10.0).abs() < 1e-9);
        assert_eq!(r.status, Status::Manual);
        assert_eq!(r.sources, vec!["INGV".to_string()]);
        // 25 stations: score reduced but healthy.
        assert!(r.score > 0.9);
    }

    #[test]
    fn sparse_station_count_downgrades() {
        let xml = quakeml_event(5).replace(
            "<stationCount>25</stationCount>",
            "<stationCount>2</stationCount>",
        );
        let parser = QuakeMlParser::new();
        let reports = parser.parse(&Payload::Text(xml), 12).expect("parses");
        assert_eq!(reports[0].status, Status::Guessed);
        assert!(reports[0].score < 0.5);
    }

    #[test]
    fn pick_estimates_magnitude() {
        let time = (Utc::now() - Duration::minutes(1)).format("%Y-%m-%dT%H:%M:%S+00:00");
        let xml = format!(
            r#"<quakeml>
  <pick publicID="smi:test/p1">
    <time><value>{time}</value></time>
    <waveformID networkCode="IV" stationCode="AQU"/>
    <ee:t0>4.0</ee:t0>
  </pick>
</quakeml>"#
        );

        let mut stations = HashMap::new();
        stations.insert("IV.AQU".to_string(), Coords::new(42.35, 13.40, 0.0));
        let parser = QuakeMlParser::with_stations(stations);

        let reports = parser.parse(&Payload::Text(xml), 12).expect("parses");
        let r = &reports[0];
        assert_eq!(r.status, Status::Guessed);
        assert!((r.score - 0.5).abs() < 1e-9);
        // log10(4) ≈ 0.602 → 0.8*0.36 + 1.7*0.602 − 0.87 ≈ 1.44, clipped to 3.5.
        assert!((r.mag.value() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn pick_without_station_table_skipped() {
        let time = (Utc::now() - Duration::minutes(1)).format("%Y-%m-%dT%H:%M:%S+00:00");
        let xml = format!(
            r#"<quakeml><pick><time><value>{time}</value></time>
  <waveformID networkCode="IV" stationCode="AQU"/><ee:t0>4.0</ee:t0></pick></quakeml>"#
        );
        assert!(QuakeMlParser::new().parse(&Payload::Text(xml), 12).is_err());
    }

    #[test]
    fn non_xml_rejected() {
        assert!(QuakeMlParser::new()
            .parse(&Payload::Text("{\"json\": true}".into()), 12)
            .is_err());
    }
}
