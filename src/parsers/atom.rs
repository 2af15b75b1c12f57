//! Atom/RSS feed entries.
//!
//! Most agency feeds put their data in the entry title and summary as prose,
//! so each entry is routed through the pattern catalog. A few (GDACS, the
//! Iranian IRSC "generic XML") carry structured extension elements, which
//! are honored when present and make an entry usable even when no pattern
//! matches.

use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use std::sync::Arc;
use tracing::debug;

use crate::error::Rejection;
use crate::geo::{Gazetteer, RegionIndex};
use crate::parsers::draft::Draft;
use crate::parsers::{pattern, when, Payload, PayloadParser};
use crate::types::{Coords, Magnitude, Severity};

/// One feed entry's extracted fields.
#[derive(Default, Debug)]
struct Entry {
    title: Option<String>,
    summary: Option<String>,
    link: Option<String>,
    updated: Option<String>,
    source_title: Option<String>,
    author: Option<String>,
    geo_lat: Option<f64>,
    geo_long: Option<f64>,
    georss_point: Option<String>,
    depth: Option<f64>,
    mag: Option<String>,
    date: Option<String>,
    alert_level: Option<String>,
}

pub struct AtomParser {
    gazetteer: Arc<dyn Gazetteer>,
    regions: Arc<dyn RegionIndex>,
}

impl AtomParser {
    pub fn new(gazetteer: Arc<dyn Gazetteer>, regions: Arc<dyn RegionIndex>) -> Self {
        Self { gazetteer, regions }
    }

    fn load(data: &str) -> Result<Vec<Entry>, Rejection> {
        if !data.trim_start().starts_with('<') {
            return Err(Rejection::new("not XML"));
        }

        let mut reader = Reader::from_str(data);
        reader.trim_text(true);

        let mut entries = Vec::new();
        let mut current: Option<Entry> = None;
        let mut path: Vec<String> = Vec::new();
        let mut saw_feed_root = false;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(XmlEvent::Start(start)) => {
                    let name = local(start.name().as_ref());
                    if path.is_empty() && matches!(name.as_str(), "feed" | "rss" | "rdf") {
                        saw_feed_root = true;
                    }
                    if matches!(name.as_str(), "entry" | "item") {
                        current = Some(Entry::default());
                    }
                    if name == "link" {
                        if let Some(entry) = current.as_mut() {
                            for attr in start.attributes().flatten() {
                                if local(attr.key.as_ref()) == "href" {
                                    entry.link =
                                        Some(String::from_utf8_lossy(&attr.value).into_owned());
                                }
                            }
                        }
                    }
                    path.push(name);
                }
                Ok(XmlEvent::Empty(start)) => {
                    let name = local(start.name().as_ref());
                    if name == "link" {
                        if let Some(entry) = current.as_mut() {
                            for attr in start.attributes().flatten() {
                                if local(attr.key.as_ref()) == "href" {
                                    entry.link =
                                        Some(String::from_utf8_lossy(&attr.value).into_owned());
                                }
                            }
                        }
                    }
                }
                Ok(XmlEvent::End(end)) => {
                    let name = local(end.name().as_ref());
                    path.pop();
                    if matches!(name.as_str(), "entry" | "item") {
                        if let Some(entry) = current.take() {
                            entries.push(entry);
                        }
                    }
                }
                Ok(XmlEvent::Text(content)) => {
                    let value = String::from_utf8_lossy(content.as_ref()).trim().to_string();
                    if let (Some(entry), Some(field)) = (current.as_mut(), path.last()) {
                        if !value.is_empty() {
                            assign(entry, field, &value);
                        }
                    }
                }
                Ok(XmlEvent::CData(content)) => {
                    let value = String::from_utf8_lossy(content.as_ref()).trim().to_string();
                    if let (Some(entry), Some(field)) = (current.as_mut(), path.last()) {
                        if !value.is_empty() {
                            assign(entry, field, &value);
                        }
                    }
                }
                Ok(XmlEvent::Eof) => break,
                Err(e) => return Err(Rejection::new(format!("not parsable as a feed: {e}"))),
                _ => {}
            }
            buf.clear();
        }

        // An agency "generic XML" without a feed root still counts when its
        // entries carry magnitudes.
        if entries.is_empty() || (!saw_feed_root && entries.iter().all(|e| e.mag.is_none())) {
            return Err(Rejection::new("no feed entries"));
        }
        Ok(entries)
    }

    fn convert(&self, entry: &Entry) -> Result<crate::types::Report, Rejection> {
        let mut draft = Draft::new();

        // Structured extension elements first.
        if let (Some(lat), Some(lon)) = (entry.geo_lat, entry.geo_long) {
            draft.coords = Some(Coords::new(lat, lon, -entry.depth.unwrap_or(10.0).abs()));
        } else if let Some(point) = &entry.georss_point {
            if let Some(mut coords) = pattern::parse_coords_text(point) {
                coords.alt_km = -entry.depth.unwrap_or(10.0).abs();
                draft.coords = Some(coords);
            }
        }

        if let Some(mag) = &entry.mag {
            // "5.1 Mw" or bare number.
            let mut parts = mag.split_whitespace();
            let value = parts.next().unwrap_or_default();
            draft.mag = Magnitude::parse(value, parts.next());
        }

        draft.sources = entry
            .source_title
            .clone()
            .or_else(|| entry.author.clone())
            .into_iter()
            .collect();
        if let Some(alert) = &entry.alert_level {
            draft.alert = Severity::parse(alert);
        }
        if let Some(date) = &entry.date {
            draft.time = when::parse_time(date, 0.0, true);
        }
        if let Some(updated) = &entry.updated {
            draft.update = when::parse_time(updated, 0.0, true);
        }
        if let Some(link) = &entry.link {
            draft.links.push(link.clone());
        }

        let text = format!(
            "{}: {}",
            entry.title.as_deref().unwrap_or("Earthquake"),
            entry.summary.as_deref().unwrap_or_default()
        );
        draft.text = Some(text.clone());

        // The pattern catalog does the heavy lifting; entries with complete
        // structured fields survive without it.
        let fallback = draft.clone();
        match pattern::complete(draft, &text, self.gazetteer.as_ref(), self.regions.as_ref()) {
            Ok(report) => Ok(report),
            Err(rejection) => {
                if fallback.mag.is_some() && fallback.coords.is_some() && fallback.time.is_some() {
                    debug!(reason = %rejection, "returning raw feed entry");
                    fallback.finish()
                } else {
                    Err(rejection)
                }
            }
        }
    }
}

fn local(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    name.rsplit(':').next().unwrap_or(&name).to_lowercase()
}

fn assign(entry: &mut Entry, field: &str, value: &str) {
    let parse = || value.replace(',', ".").parse::<f64>().ok();
    let keep = |slot: &mut Option<String>| {
        slot.get_or_insert_with(|| value.to_string());
    };
    match field {
        "title" => keep(&mut entry.title),
        "summary" | "description" => keep(&mut entry.summary),
        "updated" | "published" | "pubdate" => keep(&mut entry.updated),
        "date" => keep(&mut entry.date),
        "mag" => keep(&mut entry.mag),
        "alertlevel" => keep(&mut entry.alert_level),
        "name" => keep(&mut entry.author),
        "lat" => entry.geo_lat = entry.geo_lat.or_else(parse),
        "long" | "lon" => entry.geo_long = entry.geo_long.or_else(parse),
        "point" => entry.georss_point = Some(value.to_string()),
        "eqdepth" | "dep" | "depth" => entry.depth = entry.depth.or_else(parse),
        _ => {}
    }
}

impl PayloadParser for AtomParser {
    fn name(&self) -> &'static str {
        "atom"
    }

    fn priority(&self) -> i32 {
        3
    }

    fn parse(&self, payload: &Payload, limit: usize) -> Result<Vec<crate::types::Report>, Rejection> {
        let data = payload.text().ok_or_else(|| Rejection::new("not text"))?;
        let entries = Self::load(data)?;

        let mut reports = Vec::new();
        for entry in entries.iter().take(limit) {
            match self.convert(entry) {
                Ok(report) => reports.push(report),
                Err(rejection) => debug!(reason = %rejection, "skipping feed entry"),
            }
        }

        if reports.is_empty() {
            Err(Rejection::new("no convertible feed entries"))
        } else {
            Ok(reports)
        }
    }
}
