//! Message rendering.
//!
//! For each (subscriber, domain) pair the monitor pulls a lazy sequence of
//! formatted lines — warnings first, then detail lines — rendered in the
//! sink's style and the subscriber's languages. Stages are only computed
//! when pulled, so a subscriber that is claimed by an earlier domain never
//! pays for the rendering of a later one.

use chrono::{Duration, Utc};

use crate::domain::{Domain, DomainContext};
use crate::notice::{Category, Notice, Reason, Timely};
use crate::scoring::keywords;
use crate::sinks::Style;
use crate::types::Status;

/// Emoji markers for supersede reasons and significance.
fn icon(reason: &Reason) -> &'static str {
    match reason {
        Reason::Tsunami => "🌊",
        Reason::Official => "❕",
        Reason::AlertUpgrade(sev) | Reason::AlertDowngrade(sev) => match sev {
            crate::types::Severity::Green => "✅",
            crate::types::Severity::Yellow => "🔸",
            crate::types::Severity::Orange => "🔶",
            crate::types::Severity::Red => "🔴",
            crate::types::Severity::None => "🚥",
        },
        Reason::Stronger | Reason::Worse => "📈",
        Reason::Weaker => "📉",
        Reason::Felt => "💬",
        Reason::Detailed => "❕",
        Reason::Epicenter => "🍊",
        Reason::IntensityNew => "📈",
        Reason::Significance => "⭕",
    }
}

/// Hemisphere globe for titles.
fn globe(notice: &Notice) -> &'static str {
    if notice.event.depth_km() > 200.0 {
        return "🌐";
    }
    if notice.event.region.contains("Japan") {
        return "🗾";
    }
    let lon = notice.event.coords.lon;
    if (-30.0..55.0).contains(&lon) {
        "🌍"
    } else if lon < 0.0 {
        "🌎"
    } else {
        "🌏"
    }
}

/// Translated announcements of a term, deduplicated, most local first.
fn announcements(term: &str, languages: &[String], caps: bool) -> Vec<String> {
    let mut out = Vec::new();
    for language in languages.iter().map(String::as_str).chain(["en"]) {
        if let Some(word) = keywords::announce(term, language) {
            let word = if caps {
                word.to_uppercase()
            } else {
                capitalize(word)
            };
            if !out.contains(&word) {
                out.push(word);
            }
        }
        if out.len() >= 4 {
            break;
        }
    }
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Magnitude wording matched to how firm the solution is.
pub fn estimate(notice: &Notice) -> Option<String> {
    if notice.category() != Category::Earthquake {
        return None;
    }
    let text = if notice.event.status < Status::Incomplete {
        notice.event.mag.early()
    } else if notice.event.status < Status::Reported {
        notice.event.mag.fuzzy()
    } else {
        notice.event.mag.to_string()
    };
    Some(text)
}

/// The sink-facing title line.
pub fn title(notice: &Notice, languages: &[String]) -> String {
    let banner = if notice.category() == Category::Earthquake {
        announcements("earthquake", languages, false).join(" - ")
    } else {
        capitalize(&notice.category().to_string())
    };
    let estimate = estimate(notice).unwrap_or_else(|| notice.event.mag.to_string());

    format!(
        "{} {}: {} ({}, at {}, from {})",
        globe(notice),
        notice.event.region,
        banner,
        estimate,
        notice.event.time.format("%H:%M UTC"),
        notice.provider,
    )
}

/// Rendering stages in delivery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Minimal,
    Warning,
    Tsunami,
    Felt,
    Details,
    Arrival,
    Done,
}

/// A pull-based sequence of formatted lines for one (notice, domain) pair.
pub struct Messages<'a> {
    notice: &'a Notice,
    domain: &'a Domain,
    ctx: &'a DomainContext,
    relevance: Reason,
    significant: bool,
    style: Style,
    languages: Vec<String>,
    stage: Stage,
    buffer: Vec<String>,
}

impl<'a> Messages<'a> {
    pub fn new(
        notice: &'a Notice,
        domain: &'a Domain,
        ctx: &'a DomainContext,
        relevance: Reason,
        style: Style,
        languages: Vec<String>,
    ) -> Self {
        let significant = domain.significance(notice, ctx).is_some();
        Self {
            notice,
            domain,
            ctx,
            relevance,
            significant,
            style,
            languages,
            stage: Stage::Minimal,
            buffer: Vec::new(),
        }
    }

    fn early(&self) -> bool {
        self.notice.early(&self.ctx.travel)
    }

    /// Source attribution around a line.
    fn wrap(&self, line: String) -> String {
        let prefix = if self.early() || self.notice.event.tsunami().is_some() {
            "❗ "
        } else {
            ""
        };
        match self.style {
            Style::Human => format!("{line}. From {}.", self.notice.provider),
            Style::Short if line.contains("http") => format!("{prefix}{line}"),
            _ => format!("{prefix}{line} ({})", self.notice.provider),
        }
    }

    /// Seconds until shear waves reach the domain's target, if still ahead.
    fn countdown(&self) -> Option<i64> {
        let target = self.domain.target.as_ref()?;
        let distance = self.notice.event.coords.distance_km(target);
        let arrival = self
            .ctx
            .travel
            .fastest(self.notice.event.depth_km(), distance);
        if !arrival.is_finite() {
            return None;
        }
        let eta = self.notice.event.time + Duration::seconds(arrival as i64);
        let remaining = (eta - Utc::now()).num_seconds();
        (remaining > 0).then_some(remaining)
    }

    fn stage_minimal(&self) -> Vec<String> {
        if self.domain.target.is_none() || !self.early() || !self.significant {
            return Vec::new();
        }
        if self.countdown().is_none() {
            return Vec::new();
        }

        let shout = if self.notice.category() == Category::Earthquake {
            announcements("earthquake warning", &self.languages, true)
                .into_iter()
                .next()
                .unwrap_or_else(|| "EARTHQUAKE WARNING".to_string())
        } else {
            self.notice.category().to_string().to_uppercase()
        };
        vec![shout]
    }

    fn stage_warning(&self) -> Vec<String> {
        if self.domain.target.is_some() || !self.early() || !self.significant {
            return Vec::new();
        }

        let warnings = if self.notice.category() == Category::Earthquake {
            announcements("earthquake warning", &self.languages, false).join(" / ")
        } else {
            capitalize(&self.notice.category().to_string())
        };
        let keyword = self
            .notice
            .event
            .keywords
            .first()
            .map(|k| capitalize(k))
            .unwrap_or_else(|| "earthquake".to_string());

        vec![format!(
            "{warnings} for {region} (#{keyword} reported near {region}?)",
            region = self.notice.event.region,
        )]
    }

    fn stage_tsunami(&self) -> Vec<String> {
        let Some(localities) = self.notice.event.tsunami() else {
            return Vec::new();
        };

        let warnings = announcements("possible tsunami", &self.languages, false).join(" / ");
        let links = if self.notice.event.links.is_empty() {
            String::new()
        } else {
            format!(" Monitor {}", self.notice.event.links.join(" "))
        };
        vec![format!("{warnings} for {localities}! 🌊{links}")]
    }

    fn stage_felt(&self) -> Vec<String> {
        if self.early() || self.notice.event.has_official() {
            return Vec::new();
        }
        if !matches!(
            self.notice.timely(),
            Some(Timely::Warning | Timely::Breaking | Timely::Fresh)
        ) {
            return Vec::new();
        }
        let witnesses = self.notice.event.witnesses().len();
        let warners = self.notice.event.warners(&self.ctx.travel).len();
        if witnesses == 0 || warners == 0 {
            return Vec::new();
        }

        let line = match self.style {
            Style::Human => format!(
                "{} felt an earthquake ({witnesses} reports)",
                self.notice.event.region
            ),
            _ => format!(
                "💬 Recent {} earthquake reported by {witnesses} witnesses, {warners} early",
                self.notice.event.region
            ),
        };
        vec![line]
    }

    fn stage_details(&self) -> Vec<String> {
        let event = &self.notice.event;
        let official = event.has_official();

        if self.notice.category() == Category::Earthquake {
            if self.early() && !official {
                return Vec::new();
            }
            if self.notice.confidence() < 0.2 && !official {
                return Vec::new();
            }
            if self.domain.target.is_some() && !official {
                return Vec::new();
            }
        } else if self.early() || self.notice.confidence() < 0.1 {
            return Vec::new();
        }

        let marker = if official {
            icon(&self.relevance).to_string()
        } else {
            "❔".to_string()
        };

        let mut clauses: Vec<String> = Vec::new();

        if event.alert.is_set() {
            clauses.push(format!("{} alert:", capitalize(&event.alert.to_string())));
        }
        if let Some(estimate) = estimate(self.notice) {
            let clause = match self.style {
                Style::Long => format!("{estimate} tremor,"),
                Style::Human => format!("magnitude {estimate},"),
                _ => format!("{estimate},"),
            };
            clauses.push(clause);
        }
        if matches!(self.style, Style::Long | Style::Machine | Style::Fixed) {
            let agencies = event.agencies();
            if (1..4).contains(&agencies.len()) {
                clauses.push(format!("registered by {},", agencies.join(",")));
            } else if !agencies.is_empty() {
                clauses.push(format!("registered by {} agencies,", agencies.len()));
            }
        }
        if matches!(self.style, Style::Long | Style::Machine) {
            let witnesses = event.witnesses().len();
            if witnesses > 1 {
                clauses.push(format!("with {witnesses} reports,"));
            }
            let warners = event.warners(&self.ctx.travel).len();
            if warners > 0 {
                clauses.push(format!("{warners} early,"));
            }
        }
        if !official {
            clauses.push("possibly".to_string());
        }
        let time_clause = match self.style {
            Style::Short => event.time.format("%H:%M UTC").to_string(),
            Style::Human => format!("occurred at {},", event.time.format("%H:%M UTC")),
            Style::Machine => event.time.to_rfc3339(),
            _ => format!("occurred {},", event.time.format("%Y-%m-%d %H:%M:%S UTC")),
        };
        clauses.push(time_clause);
        if let Some(water) = &event.water {
            if water.is_wet() {
                clauses.push("on water,".to_string());
            } else {
                clauses.push("on land,".to_string());
            }
        }
        clauses.push(match self.style {
            Style::Human => format!("around {},", event.region),
            _ => format!("{} {},", event.region, event.coords),
        });

        if self.notice.category() == Category::Earthquake {
            if !matches!(self.style, Style::Machine) {
                let radius = (event.radius_km() / 10.0).round() * 10.0;
                if radius > 0.0 {
                    let clause = match self.style {
                        Style::Short => format!("felt to {radius:.0} km"),
                        Style::Human => String::new(),
                        _ => format!("likely felt {radius:.0} km away"),
                    };
                    if !clause.is_empty() {
                        clauses.push(clause);
                    }
                }
            }
            if let Some(victims) = event.victims {
                clauses.push(format!("with {victims} victims"));
            }
            if event.tsunami().is_some() {
                clauses.push(match self.style {
                    Style::Short => "(TSUNAMI?)".to_string(),
                    _ => "with possible tsunami".to_string(),
                });
            }
            if let Some(intensity) = event.intensity {
                clauses.push(match self.style {
                    Style::Short => format!("– intensity: {intensity}"),
                    _ => format!("with maximum intensity {intensity}"),
                });
            }
        }

        if !matches!(self.style, Style::Human | Style::Machine) && !event.links.is_empty() {
            let count = if self.style == Style::Short { 2 } else { 3 };
            let links: Vec<&str> = event
                .links
                .iter()
                .take(count)
                .map(String::as_str)
                .collect();
            clauses.push(format!("→ {}", links.join(" ")));
        }

        vec![format!("{marker} {}", clauses.join(" "))]
    }

    fn stage_arrival(&self) -> Vec<String> {
        if self.domain.target.is_none() || !self.early() || !self.significant {
            return Vec::new();
        }
        let Some(target) = self.domain.target.as_ref() else {
            return Vec::new();
        };
        let Some(remaining) = self.countdown() else {
            return Vec::new();
        };

        let event = &self.notice.event;
        let distance = event.coords.distance_km(target);
        let radius = event.radius_km().max(1.0);
        let strength = (1.0 - distance / radius) * (event.mag.value() / 6.0);
        let strength = if strength > 0.95 {
            "very strong"
        } else if strength > 0.8 {
            "strong"
        } else if strength > 0.5 {
            "moderate"
        } else {
            "weak"
        };

        let keyword = if self.notice.category() == Category::Earthquake {
            announcements("earthquake", &self.languages, false)
                .into_iter()
                .next()
                .unwrap_or_else(|| "Earthquake".to_string())
        } else {
            capitalize(&self.notice.category().to_string())
        };

        let mut lines = vec![if self.domain.debug {
            format!(
                "Earthquake {} {}, {}, depth {:.0} km, occurred at {}, arriving in {remaining}s",
                event.region,
                event.coords,
                event.mag,
                event.depth_km(),
                event.time.format("%H:%M:%S UTC"),
            )
        } else {
            format!(
                "{keyword}: {strength} tremors possible in about {remaining}s (reported from {}).",
                event.region,
            )
        }];

        if strength != "weak" {
            lines.push(
                "Cover your head and stay away from things that may fall. Leave doorways open."
                    .to_string(),
            );
            if remaining > 20 {
                lines.push("If there is enough time, shut off the gas valve.".to_string());
            }
        }
        lines
    }

    fn advance(&mut self) {
        self.stage = match self.stage {
            Stage::Minimal => Stage::Warning,
            Stage::Warning => Stage::Tsunami,
            Stage::Tsunami => Stage::Felt,
            Stage::Felt => Stage::Details,
            Stage::Details => Stage::Arrival,
            Stage::Arrival | Stage::Done => Stage::Done,
        };
    }
}

impl Iterator for Messages<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if !self.buffer.is_empty() {
                let line = self.buffer.remove(0);
                return Some(self.wrap(line));
            }
            if self.stage == Stage::Done {
                return None;
            }
            self.buffer = match self.stage {
                Stage::Minimal => self.stage_minimal(),
                Stage::Warning => self.stage_warning(),
                Stage::Tsunami => self.stage_tsunami(),
                Stage::Felt => self.stage_felt(),
                Stage::Details => self.stage_details(),
                Stage::Arrival => self.stage_arrival(),
                Stage::Done => Vec::new(),
            };
            self.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ThresholdBook;
    use crate::fusion::Event;
    use crate::geo::{NoDemographics, TravelTimes};
    use crate::types::{Coords, Magnitude, Report};
    use std::sync::Arc;

    fn ctx() -> DomainContext {
        DomainContext {
            travel: Arc::new(TravelTimes::default()),
            demographics: Arc::new(NoDemographics),
            thresholds: Arc::new(ThresholdBook::new(None)),
        }
    }

    fn official_notice(mag: f64, minutes_ago: i64) -> Notice {
        let mut r = Report::new(
            Coords::new(35.60, 139.70, -10.0).with_radius(15.0),
            Utc::now() - Duration::minutes(minutes_ago),
            Magnitude::new(mag, Some("Mw")),
        );
        r.status = Status::Reported;
        r.sources = vec!["JMA".to_string()];
        r.links = vec!["https://example.org/ev1".to_string()];
        Notice::new(
            Event::seed(1, r, "Japan".to_string(), &TravelTimes::default()),
            "atom:jma".to_string(),
        )
    }

    #[test]
    fn details_line_for_broadcast_domain() {
        let context = ctx();
        let domain = Domain::default();
        let notice = official_notice(5.6, 8);

        let lines: Vec<String> = Messages::new(
            &notice,
            &domain,
            &context,
            Reason::Significance,
            Style::Long,
            vec!["ja".to_string()],
        )
        .collect();

        assert_eq!(lines.len(), 1, "one details line: {lines:?}");
        let line = &lines[0];
        assert!(line.contains("Japan"), "line: {line}");
        assert!(line.contains("5.6"), "line: {line}");
        assert!(line.contains("atom:jma"), "line: {line}");
        assert!(line.contains("JMA"), "line: {line}");
    }

    #[test]
    fn early_warning_for_broadcast_domain() {
        let context = ctx();
        let domain = Domain::default();
        let notice = official_notice(6.0, 1);

        let lines: Vec<String> = Messages::new(
            &notice,
            &domain,
            &context,
            Reason::Significance,
            Style::Short,
            vec!["ja".to_string()],
        )
        .collect();

        // Early + official: the warning stage fires and the details stage
        // fires too (official overrides the early suppression).
        assert!(lines.iter().any(|l| l.contains('❗')), "lines: {lines:?}");
    }

    #[test]
    fn target_domain_gets_countdown() {
        let context = ctx();
        let domain = Domain {
            // Far enough from the epicenter for S-waves to still be traveling.
            target: Some(Coords::new(34.694, 135.502, 0.0).with_radius(800.0)),
            ..Domain::default()
        };
        let notice = official_notice(7.0, 0);

        let lines: Vec<String> = Messages::new(
            &notice,
            &domain,
            &context,
            Reason::Significance,
            Style::Human,
            vec!["ja".to_string()],
        )
        .collect();

        assert!(
            lines.iter().any(|l| l.contains("地震") || l.to_lowercase().contains("tremors")),
            "lines: {lines:?}"
        );
    }

    #[test]
    fn stale_notice_renders_nothing_for_target_only() {
        let context = ctx();
        let domain = Domain {
            target: Some(Coords::new(51.5, -0.1, 0.0)),
            ..Domain::default()
        };
        // Tokyo event is irrelevant to a London target; details suppressed
        // for target domains... and warnings are geographically gated by the
        // monitor having already matched the domain.
        let notice = official_notice(5.0, 30);
        let lines: Vec<String> = Messages::new(
            &notice,
            &domain,
            &context,
            Reason::Significance,
            Style::Human,
            vec![],
        )
        .collect();
        // Official → details stage does render even for target domains.
        assert!(lines.len() <= 1);
    }

    #[test]
    fn title_carries_region_and_provider() {
        let notice = official_notice(5.6, 8);
        let t = title(&notice, &["ja".to_string()]);
        assert!(t.contains("Japan"));
        assert!(t.contains("atom:jma"));
        assert!(t.contains("🗾"));
    }

    #[test]
    fn machine_style_skips_links() {
        let context = ctx();
        let domain = Domain::default();
        let notice = official_notice(5.6, 8);

        let lines: Vec<String> = Messages::new(
            &notice,
            &domain,
            &context,
            Reason::Significance,
            Style::Machine,
            vec![],
        )
        .collect();
        assert!(!lines[0].contains("http"), "lines: {lines:?}");
    }
}
