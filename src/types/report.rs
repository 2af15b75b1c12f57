//! The canonical report: one observation of one event from one source.
//!
//! Every adapter/parser pair ultimately produces `Report`s; the fusion engine
//! merges them into events. Derived attributes (felt radius, confidence,
//! priority) are computed on demand from the stored fields.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::TravelTimes;
use crate::types::{Coords, Intensity, Magnitude, Severity, Status};

/// Clamp helper used throughout the scoring math.
pub fn clip(value: f64, min: f64, max: f64) -> f64 {
    value.clamp(min, max)
}

/// Water involvement of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Water {
    /// Known to be on land.
    No,
    /// On or affecting water, body unnamed.
    Yes,
    /// Named body of water or threatened coasts ("Sea of Japan", ...).
    Body(String),
}

impl Water {
    /// Interpret a free-text water field: very short strings are just flags,
    /// anything longer names the water.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.len() < 4 {
            Water::Yes
        } else {
            Water::Body(text.to_string())
        }
    }

    pub fn is_wet(&self) -> bool {
        !matches!(self, Water::No)
    }
}

/// A single observation from a single source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub coords: Coords,
    /// Origin time of the physical event.
    pub time: DateTime<Utc>,
    /// When the source last touched this report.
    pub update: DateTime<Utc>,
    pub mag: Magnitude,
    pub intensity: Option<Intensity>,
    pub alert: Severity,
    pub status: Status,
    pub water: Option<Water>,
    pub victims: Option<u32>,
    /// Agency identifiers that vouch for this report.
    pub sources: Vec<String>,
    pub links: Vec<String>,
    /// Raw text, present for crowdsourced reports.
    pub text: Option<String>,
    /// Matched relevance keywords (crowdsourced).
    pub keywords: Vec<String>,
    /// Posting handle (crowdsourced).
    pub user: Option<String>,
    /// Base score before status weighting.
    pub score: f64,
    /// Triggered heuristic features as (weight, label).
    pub heuristics: Vec<(f64, String)>,
}

impl Report {
    /// A fresh report; `update` starts at one minute ago unless the origin
    /// time is newer, so stale feeds cannot claim future freshness.
    pub fn new(coords: Coords, time: DateTime<Utc>, mag: Magnitude) -> Self {
        let floor = Utc::now() - Duration::seconds(60);
        Self {
            coords,
            time,
            update: if time > floor { time } else { floor },
            mag,
            intensity: None,
            alert: Severity::None,
            status: Status::Confirmed,
            water: None,
            victims: None,
            sources: Vec::new(),
            links: Vec::new(),
            text: None,
            keywords: Vec::new(),
            user: None,
            score: 1.0,
            heuristics: Vec::new(),
        }
    }

    /// Depth below surface in km (never negative, defaults 10 km).
    pub fn depth_km(&self) -> f64 {
        self.coords.depth_km()
    }

    /// Radius within which the quake is likely felt, km, capped at 800.
    pub fn radius_km(&self) -> f64 {
        let r = (0.666 * self.mag.value() + 1.2).exp() * self.depth_km().powf(0.2);
        r.min(800.0)
    }

    /// Combined confidence: base score weighted by the status tier, clamped
    /// away from zero so one negative heuristic cannot erase a report.
    pub fn confidence(&self) -> f64 {
        clip(self.score * self.status.confidence(), 5e-5, 1.0)
    }

    /// Dispatch priority: recency × confidence × size.
    pub fn priority(&self) -> f64 {
        let age_s = (Utc::now() - self.time).num_seconds() as f64;
        30.0 / clip(age_s, 1.0, 3600.0) * self.confidence() * self.mag.value()
    }

    /// When this report surfaced, for replay/staleness gates.
    pub fn posted(&self) -> DateTime<Utc> {
        self.update.max(self.time)
    }

    /// An official report: reviewed at least to the reported tier and with a
    /// usefully tight location.
    pub fn official(&self) -> bool {
        self.status >= Status::Reported && self.coords.radius_km < 300.0
    }

    /// A crowdsourced report: unreviewed free text that scored positive.
    pub fn crowdsourced(&self) -> bool {
        self.status <= Status::Guessed && self.text.is_some() && self.score > 0.0
    }

    /// First matched keyword, if any.
    pub fn keyword(&self) -> Option<&str> {
        self.keywords.first().map(String::as_str)
    }

    /// Stable content key for the replay-suppression store.
    pub fn canonical(&self) -> String {
        let c = self.coords.round(2);
        format!(
            "{:.2},{:.2},{:.1}|{:.1}|{}|{}|{}",
            c.lat,
            c.lon,
            c.alt_km,
            self.mag.value(),
            self.time.timestamp(),
            self.status,
            self.sources.join("+"),
        )
    }

    /// The space-time-magnitude equivalence predicate used for fusion.
    ///
    /// Reflexive by construction; symmetric up to the shared min-confidence.
    /// The time window scales with the shear travel time across the distance
    /// between the two epicenters (a far-away duplicate legitimately reports
    /// a later felt time) and the distance window scales with the combined
    /// felt radii.
    pub fn matches(&self, other: &Report, travel: &TravelTimes) -> bool {
        if self.canonical() == other.canonical() {
            return true;
        }

        if (self.mag.value() - other.mag.value()).abs() > 2.5 {
            return false;
        }

        let dt = (self.time - other.time).num_seconds().unsigned_abs() as f64;
        if dt > 300.0 {
            return false;
        }

        let distance = self.coords.distance_km(&other.coords);
        if distance > 600.0 {
            return false;
        }

        let confidence = self.confidence().min(other.confidence());
        let depth = self.depth_km().max(other.depth_km());
        let shear = travel.slowest(depth, distance);

        if dt > clip(shear / confidence, 60.0, 300.0) {
            return false;
        }

        let reach = (self.radius_km() + other.radius_km()) / f64::max(0.5, confidence);
        if distance > clip(reach, 100.0, 500.0) {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(lat: f64, lon: f64, mag: f64, seconds_ago: i64) -> Report {
        Report::new(
            Coords::new(lat, lon, -10.0),
            Utc::now() - Duration::seconds(seconds_ago),
            Magnitude::new(mag, Some("Mw")),
        )
    }

    #[test]
    fn update_never_precedes_time_by_much() {
        let r = report(35.0, 139.0, 5.0, 10);
        assert!(r.update >= r.time - Duration::seconds(1));
    }

    #[test]
    fn radius_grows_with_magnitude_and_caps() {
        let small = report(0.0, 0.0, 3.0, 60);
        let big = report(0.0, 0.0, 7.5, 60);
        assert!(big.radius_km() > small.radius_km());
        let huge = report(0.0, 0.0, 9.5, 60);
        assert!((huge.radius_km() - 800.0).abs() < 1e-9);
    }

    #[test]
    fn confidence_is_clamped() {
        let mut r = report(0.0, 0.0, 5.0, 60);
        r.score = -3.0;
        assert!((r.confidence() - 5e-5).abs() < 1e-12);
        r.score = 100.0;
        assert!((r.confidence() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn official_requires_status_and_tight_location() {
        let mut r = report(35.0, 139.0, 5.0, 60);
        r.status = Status::Revised;
        assert!(r.official());

        r.status = Status::Guessed;
        assert!(!r.official());

        r.status = Status::Revised;
        r.coords.radius_km = 500.0;
        assert!(!r.official());
    }

    #[test]
    fn crowdsourced_requires_text_and_positive_score() {
        let mut r = report(35.0, 139.0, 5.0, 60);
        r.status = Status::Guessed;
        assert!(!r.crowdsourced());

        r.text = Some("terremoto!!".into());
        r.score = 0.3;
        assert!(r.crowdsourced());

        r.score = -0.1;
        assert!(!r.crowdsourced());
    }

    #[test]
    fn equivalence_is_reflexive() {
        let travel = TravelTimes::default();
        let r = report(35.0, 139.0, 5.0, 60);
        assert!(r.matches(&r.clone(), &travel));
    }

    #[test]
    fn nearby_duplicates_match() {
        let travel = TravelTimes::default();
        let a = report(35.60, 139.70, 5.2, 120);
        let b = report(35.61, 139.71, 5.5, 75);
        assert!(a.matches(&b, &travel));
        assert!(b.matches(&a, &travel));
    }

    #[test]
    fn distant_events_do_not_match() {
        let travel = TravelTimes::default();
        let a = report(35.6, 139.7, 5.2, 60);
        let b = report(37.98, 23.73, 5.2, 60);
        assert!(!a.matches(&b, &travel));
    }

    #[test]
    fn magnitude_gap_blocks_match() {
        let travel = TravelTimes::default();
        let a = report(35.6, 139.7, 3.0, 60);
        let b = report(35.6, 139.7, 6.0, 60);
        assert!(!a.matches(&b, &travel));
    }

    #[test]
    fn time_gap_blocks_match() {
        let travel = TravelTimes::default();
        let a = report(35.6, 139.7, 5.0, 10);
        let b = report(35.6, 139.7, 5.0, 400);
        assert!(!a.matches(&b, &travel));
    }

    #[test]
    fn water_parsing() {
        assert_eq!(Water::parse("1"), Water::Yes);
        assert_eq!(
            Water::parse("Sea of Japan"),
            Water::Body("Sea of Japan".into())
        );
        assert!(Water::Yes.is_wet());
        assert!(!Water::No.is_wet());
    }
}
