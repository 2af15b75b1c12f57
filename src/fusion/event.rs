//! Fused events: a bounded set of reports believed to describe the same
//! physical occurrence, with attributes recomputed from the children on
//! every merge.

use chrono::{DateTime, Duration, Utc};
use statrs::statistics::Statistics;
use std::collections::VecDeque;

use crate::geo::TravelTimes;
use crate::types::{Coords, Intensity, Magnitude, Report, Severity, Status, Water};

/// Hard cap on children per event.
pub const MAX_REPORTS: usize = 128;

/// A fusion of one or more reports. Children are stored newest-first.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: u64,
    pub children: VecDeque<Report>,
    /// Fused origin time.
    pub time: DateTime<Utc>,
    /// Fused epicenter.
    pub coords: Coords,
    pub mag: Magnitude,
    pub intensity: Option<Intensity>,
    pub update: DateTime<Utc>,
    pub alert: Severity,
    pub status: Status,
    pub water: Option<Water>,
    pub victims: Option<u32>,
    pub links: Vec<String>,
    pub sources: Vec<String>,
    /// Crowdsourced keywords, most frequent first.
    pub keywords: Vec<String>,
    /// Sum of best-children scores.
    pub score: f64,
    /// Seismic region name of the fused epicenter.
    pub region: String,
}

impl Event {
    /// Seed a new event from a single report.
    pub fn seed(id: u64, report: Report, region: String, travel: &TravelTimes) -> Self {
        let mut event = Self {
            id,
            time: report.time,
            coords: report.coords,
            mag: report.mag.clone(),
            intensity: report.intensity,
            update: report.update,
            alert: report.alert,
            status: report.status,
            water: report.water.clone(),
            victims: report.victims,
            links: report.links.clone(),
            sources: report.sources.clone(),
            keywords: report.keywords.clone(),
            score: report.score,
            region,
            children: VecDeque::from([report]),
        };
        event.recompute(travel);
        event
    }

    /// Absorb a new report (prepended: newest first) and re-derive
    /// everything. Merge hygiene:
    /// - once official, only witnesses and usefully-confident children stay;
    /// - otherwise a freshly-added negative-score child is dropped again
    ///   rather than diluting the event.
    pub fn absorb(&mut self, report: Report, travel: &TravelTimes) {
        if self.children.len() >= MAX_REPORTS {
            self.children.pop_back();
        }
        self.children.push_front(report);

        if self.has_official() {
            let witness_keys: Vec<String> =
                self.witnesses().iter().map(|w| w.canonical()).collect();
            let kept: VecDeque<Report> = self
                .children
                .iter()
                .filter(|child| {
                    child.confidence() > 0.2 || witness_keys.contains(&child.canonical())
                })
                .cloned()
                .take(MAX_REPORTS)
                .collect();
            // The pruning filter cannot orphan the event: an official child
            // is always confident enough to survive it.
            debug_assert!(!kept.is_empty(), "official event pruned to nothing");
            self.children = kept;
        } else if self.children.len() > 1 {
            let newest_negative = self
                .children
                .front()
                .map(|child| child.score < 0.0)
                .unwrap_or(false);
            if newest_negative {
                tracing::debug!(event = self.id, "dropping negative-score child");
                self.children.pop_front();
            }
        }

        self.recompute(travel);
    }

    /// The minimal prefix of children, sorted by descending confidence,
    /// whose cumulative confidence reaches 1.0.
    pub fn best(&self) -> Vec<&Report> {
        Self::best_of(&self.children)
    }

    fn best_of(children: &VecDeque<Report>) -> Vec<&Report> {
        let mut sorted: Vec<&Report> = children.iter().collect();
        sorted.sort_by(|a, b| {
            b.confidence()
                .partial_cmp(&a.confidence())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut cumulative = 0.0;
        let mut best = Vec::new();
        for child in sorted {
            if cumulative >= 1.0 {
                break;
            }
            cumulative += child.confidence();
            best.push(child);
        }
        best
    }

    /// Combined confidence of the best children. Bounded by `|best|`.
    pub fn confidence(&self) -> f64 {
        self.best().iter().map(|c| c.confidence()).sum()
    }

    /// Crowdsourced children that reported within ten minutes of origin.
    pub fn witnesses(&self) -> Vec<&Report> {
        let deadline = self.time + Duration::minutes(10);
        let mut witnesses: Vec<&Report> = self
            .children
            .iter()
            .filter(|c| c.crowdsourced() && c.update < deadline)
            .collect();
        witnesses.sort_by(|a, b| {
            b.priority()
                .partial_cmp(&a.priority())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        witnesses
    }

    /// Witnesses that posted before the shear waves cleared the felt
    /// radius: evidence of a genuine early report.
    pub fn warners(&self, travel: &TravelTimes) -> Vec<&Report> {
        let arrival = travel.slowest(self.depth_km(), self.radius_km());
        let deadline = self.time + Duration::seconds(arrival as i64);
        self.witnesses()
            .into_iter()
            .filter(|w| w.update < deadline)
            .collect()
    }

    /// Official children.
    pub fn officials(&self) -> Vec<&Report> {
        self.children.iter().filter(|c| c.official()).collect()
    }

    pub fn has_official(&self) -> bool {
        self.children.iter().any(|c| c.official())
    }

    pub fn depth_km(&self) -> f64 {
        self.coords.depth_km()
    }

    /// Felt radius: the confidence-weighted mean of the children's radii,
    /// blended toward the witnesses' observed spread as witnesses pile up.
    pub fn radius_km(&self) -> f64 {
        let best = self.best();
        let confidence: f64 = best.iter().map(|c| c.confidence()).sum();
        if confidence <= 0.0 {
            return 100.0;
        }
        let mean: f64 = best
            .iter()
            .map(|c| c.radius_km() * c.confidence())
            .sum::<f64>()
            / confidence;

        let witnesses = self.witnesses();
        let distances: Vec<f64> = witnesses
            .iter()
            .map(|w| self.coords.distance_km(&w.coords))
            .collect();
        let felt = if distances.len() > 1 {
            Statistics::mean(distances.iter().copied())
                + Statistics::std_dev(distances.iter().copied())
        } else {
            mean
        };

        let weight = f64::min(0.9, witnesses.len() as f64 * 0.03);
        f64::min(800.0, felt * weight + mean * (1.0 - weight))
    }

    /// Named water under threat, if the event plausibly involves any.
    pub fn tsunami(&self) -> Option<String> {
        let bodies: Vec<&str> = self
            .children
            .iter()
            .filter_map(|c| match &c.water {
                Some(Water::Body(name)) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        if !bodies.is_empty() {
            let mut joined = bodies.join(" ");
            joined = joined.split_whitespace().collect::<Vec<_>>().join(" ");
            return Some(titlecase(&joined));
        }

        let wet = self.water.as_ref().is_some_and(Water::is_wet);
        if self.mag.value() > 7.3 && self.depth_km() < 60.0 && wet {
            return Some(self.region.clone());
        }
        None
    }

    /// Deduplicated agency identifiers: first word of each source,
    /// upper-cased when it reads like an acronym.
    pub fn agencies(&self) -> Vec<String> {
        let mut agencies: Vec<String> = Vec::new();
        for child in &self.children {
            for source in &child.sources {
                let word: String = source
                    .chars()
                    .take_while(|c| c.is_alphanumeric())
                    .collect();
                if word.is_empty() {
                    continue;
                }
                let agency = if word.len() <= 3 {
                    word.to_uppercase()
                } else {
                    word
                };
                if !agencies.contains(&agency) {
                    agencies.push(agency);
                }
            }
        }
        agencies
    }

    /// Minutes since origin.
    pub fn elapsed(&self, minutes: i64) -> bool {
        self.time < Utc::now() - Duration::minutes(minutes)
    }

    /// Re-derive every fused attribute from the children.
    pub fn recompute(&mut self, travel: &TravelTimes) {
        debug_assert!(!self.children.is_empty());

        let official = self.has_official();

        // `best` borrows only the children, leaving the fused fields free
        // to be rewritten alongside it.
        {
            let best = Self::best_of(&self.children);
            debug_assert!(!best.is_empty());

            self.score = best
                .iter()
                .map(|c| if c.status > Status::Rejected { c.score } else { -1.0 })
                .sum();

            let confidence: f64 = best.iter().map(|c| c.confidence()).sum();
            if confidence > 0.0 {
                let weighted_mag: f64 = best
                    .iter()
                    .map(|c| c.mag.value() * c.confidence())
                    .sum::<f64>()
                    / confidence;
                let mut mag = Magnitude::new(weighted_mag, None);
                mag.unit = best[0].mag.unit.clone();
                self.mag = mag;
            }

            if let Some(centroid) =
                Coords::center(best.iter().map(|c| (c.coords, c.priority().max(1e-6))))
            {
                self.coords = centroid.round(2);
            }

            self.time = if official {
                best[0].time
            } else {
                self.children.iter().map(|c| c.time).min().unwrap_or(self.time)
            };
            self.status = best[0].status;
            self.alert = best
                .iter()
                .map(|c| c.alert)
                .max()
                .unwrap_or(Severity::None);

            self.links = Vec::new();
            for child in &best {
                if child.official() {
                    for link in &child.links {
                        if !self.links.contains(link) {
                            self.links.push(link.clone());
                        }
                    }
                }
            }
            self.sources = Vec::new();
            for child in &best {
                for source in &child.sources {
                    if !self.sources.contains(source) {
                        self.sources.push(source.clone());
                    }
                }
            }
        }

        self.intensity = self
            .children
            .iter()
            .filter_map(|c| c.intensity)
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        self.update = self
            .children
            .iter()
            .map(|c| c.update)
            .max()
            .unwrap_or(self.update);
        self.victims = self.children.iter().filter_map(|c| c.victims).max();

        // Water: named bodies win over bare flags.
        let mut names: Vec<String> = Vec::new();
        let mut wet = false;
        for child in &self.children {
            match &child.water {
                Some(Water::Body(name)) => {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
                Some(Water::Yes) => wet = true,
                _ => {}
            }
        }
        self.water = if !names.is_empty() {
            Some(Water::Body(names.join(" ")))
        } else if wet {
            Some(Water::Yes)
        } else {
            self.water.take()
        };

        // Keywords: frequency-sorted unique across witnesses.
        let witness_keywords: Vec<String> = self
            .witnesses()
            .iter()
            .flat_map(|w| w.keywords.iter().cloned())
            .collect();
        let mut unique: Vec<String> = witness_keywords.clone();
        unique.sort();
        unique.dedup();
        unique.sort_by_key(|k| {
            std::cmp::Reverse(witness_keywords.iter().filter(|x| *x == k).count())
        });
        if !unique.is_empty() {
            self.keywords = unique;
        }

        let _ = travel;
    }

    /// Whether a new report belongs to this event: the fused state matches,
    /// or any of the best children does.
    pub fn matches(&self, report: &Report, travel: &TravelTimes) -> bool {
        if self.representative().matches(report, travel) {
            return true;
        }
        self.best().iter().any(|c| c.matches(report, travel))
    }

    /// The fused state viewed as a report, for the equivalence predicate.
    pub fn representative(&self) -> Report {
        let mut rep = Report::new(self.coords, self.time, self.mag.clone());
        rep.update = self.update;
        rep.status = self.status;
        rep.score = self.score;
        rep.sources = self.sources.clone();
        rep
    }
}

fn titlecase(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn official_report(mag: f64, minutes_ago: i64) -> Report {
        let mut r = Report::new(
            Coords::new(35.60, 139.70, -10.0).with_radius(20.0),
            Utc::now() - Duration::minutes(minutes_ago),
            Magnitude::new(mag, Some("Mw")),
        );
        r.status = Status::Reported;
        r.sources = vec!["JMA".to_string()];
        r
    }

    fn crowd_report(minutes_ago: i64, seconds_after: i64) -> Report {
        let time = Utc::now() - Duration::minutes(minutes_ago);
        let mut r = Report::new(
            Coords::new(35.61, 139.69, -10.0).with_confidence(0.8),
            time,
            Magnitude::new(5.0, Some("(guessing)")),
        );
        r.status = Status::Guessed;
        r.score = 0.3;
        r.text = Some("EARTHQUAKE!!".to_string());
        r.update = time + Duration::seconds(seconds_after);
        r.keywords = vec!["earthquake".to_string()];
        r
    }

    fn event(report: Report) -> Event {
        Event::seed(1, report, "Japan".to_string(), &TravelTimes::default())
    }

    #[test]
    fn seed_invariants() {
        let e = event(official_report(5.2, 2));
        assert_eq!(e.children.len(), 1);
        assert!(!e.best().is_empty());
        assert!(e.time <= Utc::now());
        assert!(e.best().len() <= e.children.len());
    }

    #[test]
    fn confidence_sums_best() {
        let travel = TravelTimes::default();
        let mut e = event(official_report(5.2, 2));
        e.absorb(official_report(5.5, 2), &travel);

        let expected: f64 = e.best().iter().map(|c| c.confidence()).sum();
        assert!((e.confidence() - expected).abs() < 1e-9);
        assert!(e.confidence() <= e.best().len() as f64);
    }

    #[test]
    fn best_is_minimal_prefix() {
        let travel = TravelTimes::default();
        let mut e = event(official_report(5.2, 2));
        for _ in 0..20 {
            e.absorb(crowd_report(2, 30), &travel);
        }
        // The official report plus enough of the crowd to clear combined
        // confidence 1.0; the rest is not "best".
        assert!(e.best().len() < e.children.len());
        assert!(e.confidence() >= 1.0);
    }

    #[test]
    fn fused_magnitude_is_confidence_weighted() {
        let travel = TravelTimes::default();
        let mut first = official_report(5.2, 3);
        first.status = Status::Reported; // 0.7
        let mut e = event(first);

        let mut second = official_report(5.5, 2);
        second.status = Status::Manual; // 0.95: both reports stay in `best`
        e.absorb(second, &travel);

        let mag = e.mag.value();
        // (5.5·0.95 + 5.2·0.7) / 1.65 ≈ 5.37, leaning toward the review.
        assert!(mag > 5.2 && mag < 5.5, "got {mag}");
        assert!((mag - 5.37).abs() < 0.05);
    }

    #[test]
    fn fully_confident_review_owns_the_event() {
        let travel = TravelTimes::default();
        let mut e = event(official_report(5.2, 3));
        let mut revised = official_report(5.5, 2);
        revised.status = Status::Revised; // 1.0 alone saturates `best`
        e.absorb(revised, &travel);

        assert_eq!(e.best().len(), 1);
        assert!((e.mag.value() - 5.5).abs() < 1e-9);
        assert_eq!(e.status, Status::Revised);
    }

    #[test]
    fn official_event_takes_best_time() {
        let travel = TravelTimes::default();
        let older = official_report(5.2, 5);
        let expected = older.time;
        let mut e = event(older);
        let mut newer = official_report(5.5, 2);
        newer.status = Status::Revised;
        e.absorb(newer, &travel);
        // best[0] is the revised report now.
        assert_ne!(e.time, expected);
    }

    #[test]
    fn witnesses_and_warners() {
        let travel = TravelTimes::default();
        let mut e = event(official_report(5.2, 2));

        // Posted 30 s after origin: inside any shear-arrival window.
        e.absorb(crowd_report(2, 30), &travel);
        // Posted 9 minutes after origin: a witness but not a warner.
        e.absorb(crowd_report(2, 540), &travel);

        assert_eq!(e.witnesses().len(), 2);
        let warners = e.warners(&travel);
        assert_eq!(warners.len(), 1);
    }

    #[test]
    fn bounded_children() {
        let travel = TravelTimes::default();
        let mut e = event(crowd_report(3, 10));
        for _ in 0..200 {
            e.absorb(crowd_report(3, 20), &travel);
        }
        assert!(e.children.len() <= MAX_REPORTS);
    }

    #[test]
    fn negative_newcomer_dropped() {
        let travel = TravelTimes::default();
        let mut e = event(crowd_report(3, 10));
        let mut bad = crowd_report(3, 20);
        bad.score = -0.2;
        e.absorb(bad, &travel);
        assert_eq!(e.children.len(), 1);
    }

    #[test]
    fn official_prunes_chaff() {
        let travel = TravelTimes::default();
        let mut e = event(crowd_report(3, 10));
        // A pile of late low-confidence chatter.
        for _ in 0..10 {
            let mut noise = crowd_report(3, 620);
            noise.score = 0.05;
            noise.text = None; // not even crowdsourced
            e.absorb(noise, &travel);
        }
        let before = e.children.len();
        e.absorb(official_report(5.3, 3), &travel);
        assert!(e.children.len() < before + 1);
        assert!(e.has_official());
    }

    #[test]
    fn keywords_frequency_sorted() {
        let travel = TravelTimes::default();
        let mut e = event(crowd_report(2, 10));
        let mut other = crowd_report(2, 20);
        other.keywords = vec!["terremoto".to_string()];
        e.absorb(other, &travel);
        e.absorb(crowd_report(2, 30), &travel);

        assert_eq!(e.keywords.first().map(String::as_str), Some("earthquake"));
    }

    #[test]
    fn tsunami_from_named_water() {
        let travel = TravelTimes::default();
        let mut r = official_report(6.0, 2);
        r.water = Some(Water::Body("sea of japan".to_string()));
        let mut e = event(r);
        e.recompute(&travel);
        assert_eq!(e.tsunami(), Some("Sea Of Japan".to_string()));
    }

    #[test]
    fn tsunami_from_big_shallow_wet_quake() {
        let travel = TravelTimes::default();
        let mut r = official_report(7.6, 2);
        r.water = Some(Water::Yes);
        let mut e = event(r);
        e.recompute(&travel);
        assert_eq!(e.tsunami(), Some("Japan".to_string()));
    }

    #[test]
    fn agencies_dedup_and_case() {
        let travel = TravelTimes::default();
        let mut a = official_report(5.0, 2);
        a.sources = vec!["us".to_string(), "GeoNet".to_string()];
        let mut e = event(a);
        let mut b = official_report(5.1, 2);
        b.sources = vec!["us".to_string()];
        e.absorb(b, &travel);

        let agencies = e.agencies();
        assert!(agencies.contains(&"US".to_string()));
        assert!(agencies.contains(&"GeoNet".to_string()));
        assert_eq!(agencies.iter().filter(|a| *a == "US").count(), 1);
    }
}
