//! Subscription predicates.
//!
//! A [`Domain`] describes which notices a subscriber cares about: a
//! geographic scope (box, target point, region regex), floors on magnitude,
//! score, alert color, crowd reports and population, plus the adaptive
//! seasonal threshold for early crowd-only warnings. `relevance` is the
//! monitor's single entry point: it answers "should this occurrence of the
//! notice be delivered, and why".

mod threshold;

pub use threshold::Threshold;

use regex::Regex;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::geo::{Demographics, TravelTimes};
use crate::notice::{Category, Notice, Reason};
use crate::storage::ThresholdDb;
use crate::types::{Coords, Severity, Status};

/// Remembered deliveries per domain.
const HISTORY_SIZE: usize = 64;

/// Shared per-region thresholds plus persistence for all of them.
pub struct ThresholdBook {
    db: Option<Arc<ThresholdDb>>,
    regional: dashmap::DashMap<String, Threshold>,
}

impl ThresholdBook {
    pub fn new(db: Option<Arc<ThresholdDb>>) -> Self {
        Self {
            db,
            regional: dashmap::DashMap::new(),
        }
    }

    /// The seasonal threshold for a region, seeded from `like` on first use
    /// (or from disk when persisted).
    pub fn regional(&self, region: &str, like: &Threshold) -> Threshold {
        if let Some(existing) = self.regional.get(region) {
            return existing.clone();
        }
        let loaded = self
            .db
            .as_ref()
            .and_then(|db| db.load::<Threshold>(&Self::key(region)).ok().flatten());
        let threshold =
            loaded.unwrap_or_else(|| Threshold::new(like.minimum(), like.sigmas()));
        self.regional.insert(region.to_string(), threshold.clone());
        threshold
    }

    pub fn update_regional(&self, region: &str, like: &Threshold, value: f64) {
        let mut threshold = self.regional(region, like);
        threshold.update(value, true);
        self.regional.insert(region.to_string(), threshold.clone());
        self.persist(&Self::key(region), &threshold);
    }

    pub fn persist(&self, key: &str, threshold: &Threshold) {
        if let Some(db) = &self.db {
            if let Err(e) = db.save(key, threshold) {
                tracing::warn!(error = %e, key, "threshold persistence failed");
            }
        }
    }

    fn key(region: &str) -> String {
        format!("Domain(region={region})")
    }

    /// Stored keys, for the diagnostics surface.
    pub fn keys(&self) -> Vec<String> {
        self.db.as_ref().map(|db| db.keys()).unwrap_or_default()
    }
}

/// Everything domain evaluation needs from the outside.
pub struct DomainContext {
    pub travel: Arc<TravelTimes>,
    pub demographics: Arc<dyn Demographics>,
    pub thresholds: Arc<ThresholdBook>,
}

/// A subscription predicate.
pub struct Domain {
    pub name: Option<String>,
    /// Minimum magnitude (earthquakes only).
    pub mag_floor: Option<f64>,
    /// (south-west, north-east) corners; non-wrapping longitudes.
    pub bbox: Option<(Coords, Coords)>,
    /// Point of interest; its radius (if set) overrides the event's.
    pub target: Option<Coords>,
    /// Regex over the event region or tsunami locality.
    pub region: Option<Regex>,
    /// Floor on both score and confidence.
    pub score_floor: f64,
    /// Deliver only shear-wave-racing warnings.
    pub warning_only: bool,
    pub alert_floor: Severity,
    pub people_floor: Option<u64>,
    /// Maximum acceptable events-per-year recurrence rate.
    pub rate_ceiling: Option<f64>,
    /// Whether supersedes are delivered.
    pub updates: bool,
    /// Minimum crowdsourced witness count.
    pub reports_floor: Option<usize>,
    pub categories: Vec<Category>,
    /// Adaptive gate for early crowd-only warnings.
    pub threshold: Option<Mutex<Threshold>>,
    /// A domain that never matches (placeholders in config).
    pub empty: bool,
    pub debug: bool,

    pub history: Mutex<VecDeque<Notice>>,
    pub last: Mutex<Option<Notice>>,
}

impl Default for Domain {
    fn default() -> Self {
        Self {
            name: None,
            mag_floor: Some(3.0),
            bbox: None,
            target: None,
            region: None,
            score_floor: 0.09,
            warning_only: false,
            alert_floor: Severity::None,
            people_floor: None,
            rate_ceiling: None,
            updates: true,
            reports_floor: None,
            categories: vec![Category::Earthquake],
            threshold: None,
            empty: false,
            debug: false,
            history: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
        }
    }
}

impl Domain {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Canonical description; doubles as the persistence key.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(name) = &self.name {
            parts.push(format!("name={name}"));
        }
        if let Some(region) = &self.region {
            parts.push(format!("region={}", region.as_str()));
        }
        if let Some(target) = &self.target {
            parts.push(format!("target=({:.3},{:.3})", target.lat, target.lon));
        }
        if let Some((sw, ne)) = &self.bbox {
            parts.push(format!(
                "box=({:.1},{:.1})-({:.1},{:.1})",
                sw.lat, sw.lon, ne.lat, ne.lon
            ));
        }
        if let Some(mag) = self.mag_floor {
            parts.push(format!("mag={mag}"));
        }
        if self.warning_only {
            parts.push("warning".to_string());
        }
        format!("Domain({})", parts.join(", "))
    }

    /// Does the notice satisfy this domain's predicates, and which rule
    /// made it interesting? Short-circuits on the first failure; the
    /// expensive checks (population lookups) come last.
    pub fn significance(&self, notice: &Notice, ctx: &DomainContext) -> Option<&'static str> {
        if self.empty {
            return None;
        }

        let mut reason = "interest";

        if !self.categories.is_empty() {
            if !self.categories.contains(&notice.category()) {
                return None;
            }
            reason = "emergency";
        }

        if let Some(threshold) = &self.threshold {
            let warners = notice.event.warners(&ctx.travel).len();
            if notice.early(&ctx.travel) && warners >= 3 {
                let own = match threshold.lock() {
                    Ok(guard) => guard.clone(),
                    Err(poisoned) => poisoned.into_inner().clone(),
                };
                let regional = ctx.thresholds.regional(&notice.event.region, &own);
                let floor = own.minimum() * 0.8 + regional.minimum() * 0.2;
                if notice.confidence() < floor {
                    debug!(
                        domain = self.describe(),
                        floor,
                        confidence = notice.confidence(),
                        "below seasonal threshold"
                    );
                    return None;
                }
                reason = "warning";
            }
        }

        if self.score_floor > 0.0 {
            if notice.event.score < self.score_floor || notice.confidence() < self.score_floor {
                return None;
            }
            reason = "confidence";
        }

        if let Some(mag_floor) = self.mag_floor {
            if notice.category() == Category::Earthquake {
                if notice.event.mag.value() < mag_floor {
                    return None;
                }
                reason = "magnitude";
            }
        }

        if self.alert_floor.is_set() {
            if self.alert_floor > notice.event.alert {
                return None;
            }
            reason = "alert";
        }

        if let Some(reports_floor) = self.reports_floor {
            if notice.event.witnesses().len() < reports_floor {
                return None;
            }
            reason = "felt";
        }

        if let Some(region) = &self.region {
            let tsunami = notice.event.tsunami();
            let haystack = tsunami.as_deref().unwrap_or(&notice.event.region);
            if !region.is_match(haystack) && !region.is_match(&notice.event.region) {
                return None;
            }
            reason = "region";
        }

        if let Some((sw, ne)) = &self.bbox {
            let c = &notice.event.coords;
            if !(sw.lat < c.lat && c.lat < ne.lat && sw.lon < c.lon && c.lon < ne.lon) {
                return None;
            }
            reason = "epicenter";
        }

        if let Some(target) = &self.target {
            let c = &notice.event.coords;
            if (c.lat - target.lat).abs() > 1000.0 / 110.0 {
                return None;
            }
            if (c.lon - target.lon).abs() > 1000.0 / 60.0 {
                return None;
            }
            let reach = if target.radius_km > 0.0 {
                target.radius_km
            } else {
                notice.event.radius_km()
            };
            if c.distance_km(target) > reach {
                return None;
            }
            reason = "felt";
        }

        if self.warning_only {
            if !notice.early(&ctx.travel) {
                return None;
            }
            reason = "warning";
        }

        if let Some(ceiling) = self.rate_ceiling {
            let rate = ctx.demographics.rate(
                &notice.event.coords,
                notice.event.mag.value(),
                notice.event.radius_km(),
            );
            match rate {
                Some(rate) if rate <= ceiling => {
                    reason = "frequency";
                }
                _ => {
                    let population = ctx.demographics.population_within(
                        &notice.event.coords,
                        notice.event.radius_km(),
                    );
                    match notice.significance(population) {
                        Some(
                            crate::notice::Significance::Magnitude
                            | crate::notice::Significance::Population,
                        ) => {
                            reason = "frequency";
                        }
                        _ => return None,
                    }
                }
            }
        }

        if let Some(people_floor) = self.people_floor {
            let population = ctx
                .demographics
                .population_within(&notice.event.coords, notice.event.radius_km());
            match population {
                Some(population) if population > people_floor => {
                    reason = "population";
                }
                _ => return None,
            }
        }

        Some(reason)
    }

    /// Should THIS occurrence of the notice go out?
    ///
    /// A notice for an event this domain already delivered is a supersede
    /// decision (honored only when `updates` is set, or when an official
    /// notice corrects a crowd-only one). A new event is delivered iff
    /// `significance` finds a reason.
    pub fn relevance(&self, notice: &mut Notice, ctx: &DomainContext) -> Option<Reason> {
        let previous = {
            let history = match self.history.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            history
                .iter()
                .find(|other| notice.same_event(other, &ctx.travel))
                .cloned()
        };

        match previous {
            Some(other) => {
                notice.tag = other.tag.clone();
                self.confirm(&other, notice, ctx);
                self.set_last(notice);

                let wanted = self.updates
                    || (!other.event.has_official() && notice.event.has_official());
                if !wanted {
                    return None;
                }
                notice.supersedes(&other, &ctx.travel)
            }
            None => {
                self.set_last(notice);
                self.significance(notice, ctx).map(|reason| {
                    debug!(domain = self.describe(), reason, "new relevant event");
                    Reason::Significance
                })
            }
        }
    }

    /// Threshold feedback: when an event this domain warned about early is
    /// later confirmed by a reviewed report, the warners' combined
    /// confidence becomes a data point for the seasonal gate, both for this
    /// domain and for the event's region.
    fn confirm(&self, previous: &Notice, confirmation: &Notice, ctx: &DomainContext) {
        if confirmation.event.status < Status::Incomplete
            || previous.event.status >= Status::Incomplete
        {
            return;
        }
        let warners = previous.event.warners(&ctx.travel);
        if warners.len() <= 2 {
            return;
        }
        let evidence: f64 = warners.iter().map(|w| w.confidence()).sum();

        if let Some(threshold) = &self.threshold {
            let updated = {
                let mut guard = match threshold.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.update(evidence, true);
                guard.clone()
            };
            ctx.thresholds.persist(&self.describe(), &updated);
            info!(
                domain = self.describe(),
                threshold = %updated,
                "threshold adapted"
            );
            ctx.thresholds
                .update_regional(&previous.event.region, &updated, evidence);
        }
    }

    /// Record a delivery so later notices of the same event are judged as
    /// supersedes.
    pub fn remember(&self, notice: &Notice, ctx: &DomainContext) {
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.retain(|other| !notice.same_event(other, &ctx.travel));
        if history.len() >= HISTORY_SIZE {
            history.pop_front();
        }
        history.push_back(notice.clone());
    }

    fn set_last(&self, notice: &Notice) {
        match self.last.lock() {
            Ok(mut guard) => *guard = Some(notice.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(notice.clone()),
        }
    }

    /// Most recently considered notice (the `lastquake` surface).
    pub fn last_notice(&self) -> Option<Notice> {
        match self.last.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::Event;
    use crate::geo::NoDemographics;
    use crate::types::{Magnitude, Report};
    use chrono::{Duration, Utc};

    fn ctx() -> DomainContext {
        DomainContext {
            travel: Arc::new(TravelTimes::default()),
            demographics: Arc::new(NoDemographics),
            thresholds: Arc::new(ThresholdBook::new(None)),
        }
    }

    fn tokyo_notice(mag: f64, minutes_ago: i64) -> Notice {
        let mut r = Report::new(
            Coords::new(35.60, 139.70, -10.0).with_radius(15.0),
            Utc::now() - Duration::minutes(minutes_ago),
            Magnitude::new(mag, Some("Mw")),
        );
        r.status = Status::Reported;
        r.sources = vec!["JMA".to_string()];
        Notice::new(
            Event::seed(1, r, "Japan".to_string(), &TravelTimes::default()),
            "test".to_string(),
        )
    }

    #[test]
    fn empty_never_matches() {
        let domain = Domain {
            empty: true,
            ..Domain::default()
        };
        assert!(domain.significance(&tokyo_notice(6.0, 5), &ctx()).is_none());
    }

    #[test]
    fn magnitude_floor() {
        let domain = Domain {
            mag_floor: Some(5.5),
            ..Domain::default()
        };
        assert!(domain.significance(&tokyo_notice(5.2, 5), &ctx()).is_none());
        assert_eq!(
            domain.significance(&tokyo_notice(5.8, 5), &ctx()),
            Some("magnitude")
        );
    }

    #[test]
    fn region_regex() {
        let domain = Domain {
            mag_floor: Some(3.0),
            region: Some(Regex::new("(?i)japan|honshu").expect("regex")),
            ..Domain::default()
        };
        assert_eq!(
            domain.significance(&tokyo_notice(5.2, 5), &ctx()),
            Some("region")
        );

        let elsewhere = Domain {
            mag_floor: Some(3.0),
            region: Some(Regex::new("Italy").expect("regex")),
            ..Domain::default()
        };
        assert!(elsewhere.significance(&tokyo_notice(5.2, 5), &ctx()).is_none());
    }

    #[test]
    fn bounding_box() {
        let domain = Domain {
            bbox: Some((Coords::new(30.0, 129.0, 0.0), Coords::new(46.0, 146.0, 0.0))),
            ..Domain::default()
        };
        assert_eq!(
            domain.significance(&tokyo_notice(5.2, 5), &ctx()),
            Some("epicenter")
        );

        let europe = Domain {
            bbox: Some((Coords::new(35.0, -10.0, 0.0), Coords::new(80.0, 35.0, 0.0))),
            ..Domain::default()
        };
        assert!(europe.significance(&tokyo_notice(5.2, 5), &ctx()).is_none());
    }

    #[test]
    fn target_proximity() {
        let tokyo = Domain {
            target: Some(Coords::new(35.683, 139.767, 0.0)),
            ..Domain::default()
        };
        assert_eq!(
            tokyo.significance(&tokyo_notice(5.5, 5), &ctx()),
            Some("felt")
        );

        let london = Domain {
            target: Some(Coords::new(51.507, -0.128, 0.0)),
            ..Domain::default()
        };
        assert!(london.significance(&tokyo_notice(5.5, 5), &ctx()).is_none());
    }

    #[test]
    fn warning_only_requires_early() {
        let domain = Domain {
            warning_only: true,
            ..Domain::default()
        };
        assert!(domain.significance(&tokyo_notice(5.5, 1), &ctx()).is_some());
        assert!(domain.significance(&tokyo_notice(5.5, 30), &ctx()).is_none());
    }

    #[test]
    fn people_floor_without_oracle_blocks() {
        let domain = Domain {
            people_floor: Some(1000),
            ..Domain::default()
        };
        assert!(domain.significance(&tokyo_notice(6.5, 5), &ctx()).is_none());
    }

    #[test]
    fn first_delivery_then_supersede() {
        let context = ctx();
        let domain = Domain::default();

        let mut first = tokyo_notice(5.2, 5);
        assert_eq!(
            domain.relevance(&mut first, &context),
            Some(Reason::Significance)
        );
        domain.remember(&first, &context);

        // The same event again, slightly stronger but not enough: no reason.
        let mut repeat = tokyo_notice(5.3, 5);
        assert_eq!(domain.relevance(&mut repeat, &context), None);

        // Strong revision supersedes.
        let mut stronger = tokyo_notice(5.9, 5);
        stronger.event.status = Status::Revised;
        assert_eq!(
            domain.relevance(&mut stronger, &context),
            Some(Reason::Stronger)
        );
        // The tag carries over so sinks can edit in place.
        assert_eq!(stronger.tag, first.tag);
    }

    #[test]
    fn updates_disabled_suppresses_supersedes() {
        let context = ctx();
        let domain = Domain {
            updates: false,
            ..Domain::default()
        };

        let mut first = tokyo_notice(5.2, 5);
        domain.relevance(&mut first, &context);
        domain.remember(&first, &context);

        let mut stronger = tokyo_notice(5.9, 5);
        stronger.event.status = Status::Revised;
        assert_eq!(domain.relevance(&mut stronger, &context), None);
    }

    #[test]
    fn threshold_gate_blocks_weak_swarms() {
        let context = ctx();
        let domain = Domain {
            mag_floor: Some(3.0),
            score_floor: 0.0,
            threshold: Some(Mutex::new(Threshold::new(5.0, 0.5))),
            ..Domain::default()
        };

        // An early crowd-only event with several warners but tiny combined
        // confidence: gate at minimum 5.0 blocks it.
        let time = Utc::now() - Duration::seconds(30);
        let mut seed = Report::new(
            Coords::new(37.98, 23.73, -10.0),
            time,
            Magnitude::new(5.0, Some("(guessing)")),
        );
        seed.status = Status::Guessed;
        seed.score = 0.3;
        seed.text = Some("σεισμός!!".to_string());
        seed.update = time + Duration::seconds(10);
        let travel = TravelTimes::default();
        let mut event = Event::seed(9, seed.clone(), "Greece".to_string(), &travel);
        for i in 0..4 {
            let mut w = seed.clone();
            w.update = time + Duration::seconds(11 + i);
            w.user = Some(format!("user{i}"));
            event.absorb(w, &travel);
        }
        let notice = Notice::new(event, "social".to_string());

        assert!(notice.early(&context.travel));
        assert!(notice.event.warners(&context.travel).len() >= 3);
        assert!(domain.significance(&notice, &context).is_none());
    }
}
