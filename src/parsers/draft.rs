//! Partially-parsed reports.
//!
//! Structured parsers fill what their schema provides; the pattern parser
//! completes drafts from free text. `finish()` enforces the minimum a report
//! must carry before it can enter fusion.

use chrono::{DateTime, Duration, Utc};

use crate::error::Rejection;
use crate::types::{Coords, Intensity, Magnitude, Report, Severity, Status, Water};

/// A report under construction.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub coords: Option<Coords>,
    pub time: Option<DateTime<Utc>>,
    pub update: Option<DateTime<Utc>>,
    pub mag: Option<Magnitude>,
    pub intensity: Option<Intensity>,
    pub alert: Severity,
    pub status: Option<Status>,
    pub water: Option<Water>,
    pub victims: Option<u32>,
    pub sources: Vec<String>,
    pub links: Vec<String>,
    pub text: Option<String>,
    pub keywords: Vec<String>,
    pub user: Option<String>,
    pub score: f64,
    pub heuristics: Vec<(f64, String)>,
}

impl Draft {
    pub fn new() -> Self {
        Self {
            score: 1.0,
            ..Self::default()
        }
    }

    /// Promote to a full report. Requires coordinates, origin time and a
    /// magnitude; everything else has defaults.
    pub fn finish(self) -> Result<Report, Rejection> {
        let coords = self.coords.ok_or_else(|| Rejection::new("no coordinates"))?;
        let time = self.time.ok_or_else(|| Rejection::new("no origin time"))?;
        let mag = self.mag.ok_or_else(|| Rejection::new("no magnitude"))?;

        if time > Utc::now() + Duration::seconds(5) {
            return Err(Rejection::new(format!("future origin time {time}")));
        }

        let mut report = Report::new(coords, time, mag);
        if let Some(update) = self.update {
            report.update = report.update.max(update);
        }
        report.intensity = self.intensity;
        report.alert = self.alert;
        if let Some(status) = self.status {
            report.status = status;
        }
        report.water = self.water;
        report.victims = self.victims;
        report.sources = self
            .sources
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        report.links = self
            .links
            .into_iter()
            .filter(|l| !l.trim().is_empty())
            .collect();
        report.text = self.text;
        report.keywords = self.keywords;
        report.user = self.user;
        report.score = self.score;
        report.heuristics = self.heuristics;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_draft_rejected() {
        let draft = Draft::new();
        assert!(draft.finish().is_err());
    }

    #[test]
    fn complete_draft_promotes() {
        let mut draft = Draft::new();
        draft.coords = Some(Coords::new(35.0, 139.0, -10.0));
        draft.time = Some(Utc::now() - Duration::seconds(30));
        draft.mag = Some(Magnitude::new(5.0, None));
        draft.sources = vec!["JMA".into(), "  ".into()];

        let report = draft.finish().expect("complete");
        assert_eq!(report.sources, vec!["JMA".to_string()]);
        assert_eq!(report.status, Status::Confirmed);
    }

    #[test]
    fn future_time_rejected() {
        let mut draft = Draft::new();
        draft.coords = Some(Coords::new(35.0, 139.0, -10.0));
        draft.time = Some(Utc::now() + Duration::minutes(10));
        draft.mag = Some(Magnitude::new(5.0, None));
        assert!(draft.finish().is_err());
    }
}
