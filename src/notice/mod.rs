//! Dispatch-time classification of events.
//!
//! A [`Notice`] wraps a fused event with its provider and answers the
//! questions the monitor asks: is it still timely, is it early enough to be
//! a warning, what category is it, why is it significant, and does it
//! supersede an earlier notice of the same event.

pub mod message;

pub use message::Messages;

use chrono::{DateTime, Utc};

use crate::fusion::Event;
use crate::geo::TravelTimes;
use crate::scoring::keywords;
use crate::types::{clip, Severity, Status};

/// Time-based classification tiers, checked in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timely {
    Warning,
    Emergency,
    Breaking,
    Preliminary,
    Fresh,
    Official,
    Tsunami,
    Alert,
    Victims,
}

impl std::fmt::Display for Timely {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Timely::Warning => "warning",
            Timely::Emergency => "emergency",
            Timely::Breaking => "breaking",
            Timely::Preliminary => "preliminary",
            Timely::Fresh => "fresh",
            Timely::Official => "official",
            Timely::Tsunami => "tsunami",
            Timely::Alert => "alert",
            Timely::Victims => "victims",
        };
        write!(f, "{name}")
    }
}

/// What kind of occurrence the notice describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Earthquake,
    /// Non-seismic emergencies reported through the same crowd channels
    /// (air raids, explosions, sirens).
    Alert,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Earthquake => write!(f, "earthquake"),
            Category::Alert => write!(f, "alert"),
        }
    }
}

/// Why a notice is worth a subscriber's attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Significance {
    Victims,
    Tsunami,
    Magnitude,
    Population,
    Frequency,
    AlertColor(Severity),
}

/// Why a notice replaces an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Tsunami,
    Official,
    AlertUpgrade(Severity),
    Stronger,
    Worse,
    Felt,
    Detailed,
    Weaker,
    Epicenter,
    AlertDowngrade(Severity),
    IntensityNew,
    /// Not a supersede: the first time a domain matched this event.
    Significance,
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::Tsunami => write!(f, "tsunami"),
            Reason::Official => write!(f, "official"),
            Reason::AlertUpgrade(color) | Reason::AlertDowngrade(color) => write!(f, "{color}"),
            Reason::Stronger => write!(f, "stronger"),
            Reason::Worse => write!(f, "worse"),
            Reason::Felt => write!(f, "felt"),
            Reason::Detailed => write!(f, "detailed"),
            Reason::Weaker => write!(f, "weaker"),
            Reason::Epicenter => write!(f, "epicenter"),
            Reason::IntensityNew => write!(f, "intensity"),
            Reason::Significance => write!(f, "significance"),
        }
    }
}

/// Seconds that must pass between low-precedence supersedes of the same
/// subscription.
pub const SUPERSEDE_THROTTLE_SECS: i64 = 120;

/// The timeliness ladder: first rule that fires wins; `None` means the
/// event is no longer worth announcing.
pub fn timely_of(event: &Event) -> Option<Timely> {
    let confidence = event.confidence();

    if !event.elapsed(3) {
        return Some(Timely::Warning);
    }
    if !event.elapsed(7) && category_of(event) != Category::Earthquake {
        return Some(Timely::Emergency);
    }
    if !event.elapsed(10) && confidence >= 0.2 {
        return Some(Timely::Breaking);
    }
    if !event.elapsed(15) && confidence >= 0.4 {
        return Some(Timely::Preliminary);
    }
    if !event.elapsed(20) && confidence >= 0.2 {
        return Some(Timely::Fresh);
    }
    if !event.elapsed(60) && event.has_official() {
        return Some(Timely::Official);
    }
    if !event.elapsed(120) && event.tsunami().is_some() {
        return Some(Timely::Tsunami);
    }
    if !event.elapsed(event.alert.duration_minutes()) && event.alert.is_set() {
        return Some(Timely::Alert);
    }
    if let Some(victims) = event.victims {
        let window = clip(f64::from(victims) * 100.0, 60.0 * 24.0, 60.0 * 24.0 * 7.0);
        if !event.elapsed(window as i64) {
            return Some(Timely::Victims);
        }
    }
    None
}

/// Category: official provenance means a real earthquake; otherwise the
/// crowd's keywords decide, with earthquake as the default.
pub fn category_of(event: &Event) -> Category {
    if event.has_official() || !event.sources.is_empty() {
        return Category::Earthquake;
    }

    for keyword in &event.keywords {
        if keywords::contained_any("earthquake", keyword).is_some() {
            return Category::Earthquake;
        }
    }
    for keyword in &event.keywords {
        if keywords::contained_any("alert", keyword).is_some() {
            return Category::Alert;
        }
    }
    Category::Earthquake
}

/// An event ready for dispatch.
#[derive(Debug, Clone)]
pub struct Notice {
    pub event: Event,
    /// Adapter description that produced the triggering report.
    pub provider: String,
    /// When this notice was created (latency metering, supersede throttle).
    pub timestamp: DateTime<Utc>,
    /// Sink-side threading key; inherited from a superseded notice so sinks
    /// can edit-in-place.
    pub tag: String,
}

impl Notice {
    pub fn new(event: Event, provider: String) -> Self {
        let tag = event.region.clone();
        Self {
            event,
            provider,
            timestamp: Utc::now(),
            tag,
        }
    }

    pub fn timely(&self) -> Option<Timely> {
        timely_of(&self.event)
    }

    pub fn category(&self) -> Category {
        category_of(&self.event)
    }

    pub fn confidence(&self) -> f64 {
        self.event.confidence()
    }

    /// Early: fresh enough to be a warning, with shear waves still short of
    /// the felt radius. Non-earthquake emergencies are always "early" while
    /// they are warnings — there is no wavefront to race.
    pub fn early(&self, travel: &TravelTimes) -> bool {
        if !matches!(self.timely(), Some(Timely::Warning | Timely::Emergency)) {
            return false;
        }
        if self.category() != Category::Earthquake {
            return true;
        }

        let radius =
            self.event.radius_km() + f64::min(200.0, self.event.coords.radius_km);
        let arrival = travel.slowest(self.event.depth_km(), radius);
        let deadline =
            self.event.time + chrono::Duration::seconds(20 + arrival as i64);
        deadline > Utc::now()
    }

    /// Built-in significance rules. Population/frequency gates only fire
    /// when the caller supplies external demographics.
    pub fn significance(&self, population: Option<u64>) -> Option<Significance> {
        let event = &self.event;
        let mag = event.mag.value();
        let depth = event.depth_km();

        if event.victims.is_some() {
            return Some(Significance::Victims);
        }
        if event.tsunami().is_some() {
            return Some(Significance::Tsunami);
        }
        if mag > 7.0 {
            return Some(Significance::Magnitude);
        }
        if mag > 6.5 && depth < 300.0 {
            return Some(Significance::Magnitude);
        }
        if mag > 6.0 && event.alert > Severity::Green {
            return Some(Significance::Magnitude);
        }
        if mag > 5.0 && event.alert > Severity::Yellow {
            return Some(Significance::AlertColor(event.alert));
        }
        if let Some(population) = population {
            if mag > 6.0 && depth < 200.0 && population > 100 {
                return Some(Significance::Magnitude);
            }
            if mag > 5.0 && depth < 150.0 && population > 100_000 {
                return Some(Significance::Population);
            }
        }
        None
    }

    /// Whether the two notices describe the same occurrence.
    pub fn same_event(&self, other: &Notice, travel: &TravelTimes) -> bool {
        self.event.id == other.event.id
            || self
                .event
                .representative()
                .matches(&other.event.representative(), travel)
    }

    /// The supersede decision: does this notice replace `other` for a
    /// subscription that already received `other`?
    ///
    /// Anti-symmetric given distinct creation timestamps: the confidence /
    /// status precondition and the per-reason inequalities cannot hold in
    /// both directions at once.
    pub fn supersedes(&self, other: &Notice, travel: &TravelTimes) -> Option<Reason> {
        if self.early(travel) && !self.event.has_official() {
            return None;
        }
        if self.confidence() < other.confidence() && self.event.status <= other.event.status {
            return None;
        }
        if !self.same_event(other, travel) {
            return None;
        }

        let confidence = f64::max(
            clip(self.confidence(), 0.01, 1.0),
            clip(other.confidence(), 0.01, 1.0),
        );

        let self_tsunami = self.event.tsunami().is_some();
        let other_tsunami = other.event.tsunami().is_some();
        if self.event.status > Status::Incomplete && self_tsunami && !other_tsunami {
            return Some(Reason::Tsunami);
        }
        if self.event.has_official() && !other.event.has_official() {
            return Some(Reason::Official);
        }
        if self.event.alert > Severity::Green && self.event.alert > other.event.alert {
            return Some(Reason::AlertUpgrade(self.event.alert));
        }

        let mag_gain = self.event.mag.value() - other.event.mag.value();
        if mag_gain > clip(0.25 / confidence, 0.15, 3.0) {
            return Some(Reason::Stronger);
        }
        if let (Some(mine), Some(theirs)) = (self.event.intensity, other.event.intensity) {
            if mine > theirs {
                return Some(Reason::Worse);
            }
        }

        // Everything below is routine refinement; those wait their turn.
        if (self.timestamp - other.timestamp).num_seconds() < SUPERSEDE_THROTTLE_SECS {
            return None;
        }

        if other.early(travel) {
            let witnesses = self.event.witnesses().len();
            let warners = self.event.warners(travel).len();
            let felt = witnesses.saturating_sub(warners);
            if warners > 0 && felt >= 10 && felt % 10 == 0 {
                return Some(Reason::Felt);
            }
            if self.confidence() > 0.5 {
                return Some(Reason::Detailed);
            }
        }
        if -mag_gain > clip(0.4 / confidence, 0.3, 3.0) {
            return Some(Reason::Weaker);
        }

        let shift = self.event.coords.distance_km(&other.event.coords);
        if self.event.coords.radius_km < other.event.coords.radius_km
            && shift
                > clip(
                    self.event.radius_km() + other.event.radius_km(),
                    20.0,
                    300.0,
                )
        {
            return Some(Reason::Epicenter);
        }
        if self.event.alert == Severity::Green
            && self.event.alert < other.event.alert
            && self.event.sources.len() > other.event.sources.len()
        {
            return Some(Reason::AlertDowngrade(self.event.alert));
        }
        if self.event.intensity.is_some() && other.event.intensity.is_none() {
            return Some(Reason::IntensityNew);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coords, Intensity, IntensityScale, Magnitude, Report, Water};
    use chrono::Duration;

    fn official_event(mag: f64, minutes_ago: i64) -> Event {
        let mut r = Report::new(
            Coords::new(35.60, 139.70, -10.0).with_radius(15.0),
            Utc::now() - Duration::minutes(minutes_ago),
            Magnitude::new(mag, Some("Mw")),
        );
        r.status = Status::Reported;
        r.sources = vec!["JMA".to_string()];
        Event::seed(1, r, "Japan".to_string(), &TravelTimes::default())
    }

    fn crowd_event(minutes_ago: i64) -> Event {
        let time = Utc::now() - Duration::minutes(minutes_ago);
        let mut r = Report::new(
            Coords::new(37.98, 23.73, -10.0),
            time,
            Magnitude::new(5.0, Some("(guessing)")),
        );
        r.status = Status::Guessed;
        r.score = 0.3;
        r.text = Some("σεισμός!!".to_string());
        r.update = time + Duration::seconds(15);
        r.keywords = vec!["σεισμός".to_string()];
        Event::seed(2, r, "Greece".to_string(), &TravelTimes::default())
    }

    #[test]
    fn timely_ladder() {
        assert_eq!(timely_of(&official_event(5.2, 2)), Some(Timely::Warning));
        assert_eq!(timely_of(&official_event(5.2, 8)), Some(Timely::Breaking));
        // Official confidence 0.7 keeps every mid-tier alive.
        assert_eq!(
            timely_of(&official_event(5.2, 12)),
            Some(Timely::Preliminary)
        );
        assert_eq!(timely_of(&official_event(5.2, 17)), Some(Timely::Fresh));
        assert_eq!(timely_of(&official_event(5.2, 40)), Some(Timely::Official));
        assert_eq!(timely_of(&official_event(5.2, 100)), None);
    }

    #[test]
    fn tsunami_extends_the_window() {
        let mut event = official_event(7.6, 100);
        event.water = Some(Water::Yes);
        assert_eq!(timely_of(&event), Some(Timely::Tsunami));
    }

    #[test]
    fn victims_extend_for_days() {
        let mut event = official_event(6.8, 60 * 30);
        event.victims = Some(120);
        assert_eq!(timely_of(&event), Some(Timely::Victims));
    }

    #[test]
    fn low_confidence_crowd_fades_fast() {
        // Crowd event confidence ~0.03: breaking requires 0.2.
        let event = crowd_event(8);
        assert_eq!(timely_of(&event), None);
    }

    #[test]
    fn category_from_official_and_keywords() {
        assert_eq!(category_of(&official_event(5.0, 2)), Category::Earthquake);

        let mut alert = crowd_event(2);
        alert.sources.clear();
        alert.keywords = vec!["siren".to_string()];
        assert_eq!(category_of(&alert), Category::Alert);
    }

    #[test]
    fn early_depends_on_wavefront() {
        let travel = TravelTimes::default();
        let fresh = Notice::new(official_event(5.2, 1), "test".into());
        assert!(fresh.early(&travel));

        // Ten minutes in, shear waves have cleared any regional radius.
        let old = Notice::new(official_event(5.2, 10), "test".into());
        assert!(!old.early(&travel));
    }

    #[test]
    fn revised_supersedes_as_stronger() {
        let travel = TravelTimes::default();
        let first = Notice::new(official_event(5.2, 5), "a".into());

        let mut better = official_event(5.8, 5);
        better.status = Status::Revised;
        let second = Notice::new(better, "b".into());

        assert_eq!(second.supersedes(&first, &travel), Some(Reason::Stronger));
        // Anti-symmetry.
        assert_ne!(first.supersedes(&second, &travel), Some(Reason::Stronger));
    }

    #[test]
    fn alert_upgrade_beats_throttle() {
        let travel = TravelTimes::default();
        let mut yellow = official_event(5.5, 5);
        yellow.alert = Severity::Yellow;
        let first = Notice::new(yellow, "a".into());

        let mut red = official_event(5.5, 5);
        red.alert = Severity::Red;
        red.status = Status::Revised;
        let second = Notice::new(red, "b".into());

        // Created seconds apart, but alert upgrades skip the throttle.
        assert_eq!(
            second.supersedes(&first, &travel),
            Some(Reason::AlertUpgrade(Severity::Red))
        );
    }

    #[test]
    fn routine_refinement_is_throttled() {
        let travel = TravelTimes::default();
        let first = Notice::new(official_event(5.2, 18), "a".into());

        let mut refined = official_event(5.2, 18);
        refined.status = Status::Revised;
        refined.intensity =
            Some(Intensity::parse("5", Some(IntensityScale::Shindo)).expect("intensity"));
        let second = Notice::new(refined, "b".into());

        // Same-second creation: intensity-new must wait out the throttle.
        assert_eq!(second.supersedes(&first, &travel), None);

        let mut waited = second.clone();
        waited.timestamp = first.timestamp + Duration::seconds(SUPERSEDE_THROTTLE_SECS + 1);
        assert_eq!(waited.supersedes(&first, &travel), Some(Reason::IntensityNew));
    }

    #[test]
    fn unrelated_events_never_supersede() {
        let travel = TravelTimes::default();
        let japan = Notice::new(official_event(5.2, 5), "a".into());
        let mut greece = crowd_event(5);
        greece.status = Status::Revised;
        let other = Notice::new(greece, "b".into());
        assert_eq!(other.supersedes(&japan, &travel), None);
    }

    #[test]
    fn early_unofficial_never_supersedes() {
        let travel = TravelTimes::default();
        let first = Notice::new(crowd_event(8), "a".into());
        let second = Notice::new(crowd_event(1), "b".into());
        // Early crowd notices must not replace anything yet.
        assert_eq!(second.supersedes(&first, &travel), None);
    }

    #[test]
    fn significance_rules() {
        let travel_event = official_event(7.2, 5);
        let notice = Notice::new(travel_event, "a".into());
        assert_eq!(notice.significance(None), Some(Significance::Magnitude));

        let mut colored = official_event(5.5, 5);
        colored.alert = Severity::Orange;
        let notice = Notice::new(colored, "a".into());
        assert_eq!(
            notice.significance(None),
            Some(Significance::AlertColor(Severity::Orange))
        );

        let mut populated = official_event(5.5, 5);
        populated.alert = Severity::None;
        let notice = Notice::new(populated, "a".into());
        assert_eq!(notice.significance(Some(500_000)), Some(Significance::Population));
        assert_eq!(notice.significance(None), None);
    }
}
