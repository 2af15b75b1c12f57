//! Crowdsourced-text scoring parser.
//!
//! Turns a social post into a guessed report: relevance gates first, then
//! the heuristic feature catalog, then location resolution (geotag, or the
//! per-language recent-coordinates cache when a language's community is
//! visibly reacting to the same event), then a language-vs-place sanity
//! check. Posts from configured alerter accounts skip the gauntlet and go
//! through the pattern catalog like any agency feed.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::Rejection;
use crate::geo::{Gazetteer, RegionIndex};
use crate::parsers::draft::Draft;
use crate::parsers::{pattern, Payload, PayloadParser, SocialPost};
use crate::scoring::features::{self, TextProfile};
use crate::scoring::{keywords, TermCounter, UserScores};
use crate::types::{Magnitude, Report, Status};

/// Guess a magnitude from strength adjectives. A bare alert (air raid,
/// explosion) gets a small arbitrary magnitude so simultaneous alerts in
/// different cities fuse into separate events instead of one blob.
fn magnitude_guess(text: &str, languages: &[String], is_earthquake: bool) -> Magnitude {
    if !is_earthquake {
        return Magnitude::new(3.5, Some("(arbitrarily assigned)"));
    }

    const MAPPING: &[(&str, f64)] = &[
        ("weak", 4.5),
        ("strong", 6.0),
        ("very strong", 6.5),
        ("destroyed", 7.0),
    ];

    let guessed = MAPPING
        .iter()
        .filter(|(term, _)| keywords::contained(term, text, languages).is_some())
        .map(|(_, mag)| *mag)
        .fold(f64::NAN, f64::max);

    Magnitude::new(
        if guessed.is_nan() { 5.0 } else { guessed },
        Some("(guessing)"),
    )
}

/// How long a language's recalled coordinates stay usable (seconds).
const LANGUAGE_CACHE_TTL: u64 = 20;

/// Posts older than this skip location work entirely; the pipeline is
/// falling behind and geolocation is the expensive step.
const LOCATION_LAG_LIMIT: i64 = 40;

pub struct SocialParser {
    /// Handles of agency accounts whose posts are structured bulletins.
    pub alerters: Vec<String>,
    pub scores: Arc<UserScores>,
    pub terms: Arc<TermCounter>,
    gazetteer: Arc<dyn Gazetteer>,
    regions: Arc<dyn RegionIndex>,
    /// lang → recently-confirmed quake coordinates from that community.
    language_coords: DashMap<String, (crate::types::Coords, Instant)>,
}

impl SocialParser {
    pub fn new(
        alerters: Vec<String>,
        scores: Arc<UserScores>,
        terms: Arc<TermCounter>,
        gazetteer: Arc<dyn Gazetteer>,
        regions: Arc<dyn RegionIndex>,
    ) -> Self {
        Self {
            alerters,
            scores,
            terms,
            gazetteer,
            regions,
            language_coords: DashMap::new(),
        }
    }

    fn language_recall(&self, lang: &str) -> Option<crate::types::Coords> {
        let entry = self.language_coords.get(lang)?;
        let (coords, stored) = *entry;
        if stored.elapsed().as_secs() <= LANGUAGE_CACHE_TTL {
            Some(coords)
        } else {
            None
        }
    }

    /// Alerter accounts publish machine-formatted bulletins; run them
    /// through the pattern catalog with `reported` standing.
    fn convert_alerter(&self, post: &SocialPost) -> Option<Report> {
        let mut draft = Draft::new();
        draft.text = Some(post.text.replace('#', ""));
        draft.user = Some(post.user.clone());
        draft.links = post.link.clone().into_iter().collect();
        draft.update = Some(post.created_at);
        draft.time = Some(post.created_at - Duration::seconds(5));
        draft.status = Some(Status::Reported);
        draft.sources = vec![post.user.clone()];

        match pattern::complete(
            draft,
            &post.text,
            self.gazetteer.as_ref(),
            self.regions.as_ref(),
        ) {
            Ok(report) => {
                info!(user = post.user, "alerter bulletin parsed");
                self.scores.add(&post.user, 1.0);
                Some(report)
            }
            Err(rejection) => {
                debug!(user = post.user, reason = %rejection, "alerter bulletin unparsable");
                self.scores.add(&post.user, -1.0);
                None
            }
        }
    }

    fn convert(&self, post: &SocialPost) -> Result<Report, Rejection> {
        let text = post.text.replace('\n', " ");

        if post.from_alerter {
            if let Some(report) = self.convert_alerter(post) {
                return Ok(report);
            }
            // Fall through: treat the unparsable alerter post as crowd text.
        }

        if post.is_repost || post.is_quote {
            return Err(Rejection::new("repost"));
        }
        if text.contains('@') {
            return Err(Rejection::new("reply or mention"));
        }
        if text.contains("http") {
            return Err(Rejection::new("link-bearing post"));
        }

        let languages: Vec<String> = post.lang.clone().into_iter().collect();

        // Relevance gates: on-topic in a declared language, or silently
        // penalized when the words only exist in some other language.
        let keyword = keywords::contained("earthquake", &text, &languages)
            .or_else(|| keywords::contained("alert", &text, &languages))
            .or_else(|| keywords::contained("earthquake warning", &text, &languages));

        if keyword.is_none() {
            if keywords::contained_any("earthquake", &text).is_some()
                || keywords::contained_any("alert", &text).is_some()
            {
                self.scores.add(&post.user, -0.05);
                return Err(Rejection::new("keyword in mismatched language"));
            }
            return Err(Rejection::new("no relevance keyword"));
        }

        for term in ["earthquake", "alert", "earthquake warning"] {
            if let Some(matched) = keywords::contained(term, &text, &languages) {
                self.terms.record(&matched);
            }
        }

        let profile = TextProfile::build(&text, &languages, &self.alerters, post.from_alerter);
        let mut heuristics = features::evaluate(&profile);

        let is_earthquake = keywords::contained("earthquake", &text, &languages).is_some();
        let mag = magnitude_guess(&text, &languages, is_earthquake);

        let lang = post.lang.clone().unwrap_or_default();
        let provisional: f64 = heuristics.iter().map(|(w, _)| w).sum();
        if provisional < 0.0 && self.language_recall(&lang).is_some() {
            // The community is live on a real event; negative chatter about
            // it is just noise.
            return Err(Rejection::new("negative score during live event"));
        }

        // Location. Skip the expensive path when the pipeline lags.
        let lag = (Utc::now() - post.created_at).num_seconds();
        let mut coords = if lag > LOCATION_LAG_LIMIT {
            debug!(user = post.user, lag, "skipping location processing");
            None
        } else {
            post.coords
        };

        if let Some(c) = coords {
            if is_earthquake && !matches!(lang.as_str(), "en" | "es" | "") {
                // A geotagged on-topic post in a localized language seeds
                // the community cache with half its confidence.
                self.language_coords.insert(
                    lang.clone(),
                    (c.with_confidence(c.confidence * 0.5), Instant::now()),
                );
            }
        } else if is_earthquake {
            // No geotag: the report may still ride the community cache, at
            // reduced heuristic weight so recalled locations never dominate.
            for entry in heuristics.iter_mut() {
                entry.0 *= 0.6;
            }
            coords = self.language_recall(&lang);
            if coords.is_some() {
                debug!(lang, "recalled community coordinates");
            }
        }

        let Some(coords) = coords else {
            self.scores.add(&post.user, -0.1);
            return Err(Rejection::new("no resolvable coordinates"));
        };

        // Language sanity: posting about a quake in a language nobody speaks
        // there is usually world-news chatter, not an eyewitness.
        if !lang.is_empty() {
            let region = self.regions.region(&coords);
            let spoken = self.regions.languages(&region);
            if !spoken.is_empty() && !spoken.iter().any(|s| s == &lang) {
                let penalty = if lang == "en" { -0.15 } else { -0.30 };
                heuristics.push((penalty, "language mismatch".to_string()));
                self.language_coords.remove(&lang);
            }
        }

        let score: f64 = heuristics.iter().map(|(w, _)| w).sum::<f64>() * coords.confidence;
        self.scores.add(&post.user, score);

        let mut report = Report::new(coords.round(2), post.created_at, mag);
        // Posting takes a moment; assume the shaking slightly preceded it,
        // more so for longer write-ups.
        report.time = post.created_at - Duration::seconds((profile.density as f64 * 0.3) as i64);
        report.update = post.created_at;
        report.status = Status::Guessed;
        report.score = score;
        report.heuristics = heuristics;
        report.text = Some(text);
        report.user = Some(post.user.clone());
        report.keywords = keyword.into_iter().collect();
        report.links = post.link.clone().into_iter().collect();

        debug!(
            user = report.user.as_deref().unwrap_or(""),
            score = report.score,
            "crowdsourced report scored"
        );

        Ok(report)
    }
}

impl PayloadParser for SocialParser {
    fn name(&self) -> &'static str {
        "social"
    }

    /// Always first: social payloads are cheap to refuse for other parsers
    /// but structured payloads must never reach the text heuristics.
    fn priority(&self) -> i32 {
        10
    }

    fn parse(&self, payload: &Payload, _limit: usize) -> Result<Vec<Report>, Rejection> {
        let Payload::Social(post) = payload else {
            return Err(Rejection::new("not a social post"));
        };
        self.convert(post).map(|report| vec![report])
    }
}
