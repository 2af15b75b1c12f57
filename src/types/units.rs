//! Measurement scales: magnitude, intensity, status tier, alert severity.

use serde::{Deserialize, Serialize};

// ============================================================================
// Magnitude
// ============================================================================

/// An earthquake magnitude with its unit label (Mw, Mb, Md, Ms, M, or a
/// guessing marker for crowdsourced estimates).
///
/// Values at or above 9.7 are physically implausible and are reset to 3.0 so
/// a garbled feed cannot trigger a headline alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Magnitude {
    value: f64,
    pub unit: String,
}

/// Magnitudes at or above this are treated as bogus.
const BOGUS_MAGNITUDE: f64 = 9.7;

impl Magnitude {
    pub fn new(value: f64, unit: Option<&str>) -> Self {
        let value = if !(0.0..BOGUS_MAGNITUDE).contains(&value) {
            tracing::warn!(value, "implausible magnitude, resetting to 3.0");
            3.0
        } else {
            value
        };

        let unit = match unit {
            None => "M".to_string(),
            Some(u) => {
                let trimmed = u.trim();
                if trimmed.len() < 4 && !trimmed.to_uppercase().starts_with('M') {
                    format!("M{trimmed}")
                } else {
                    trimmed.to_string()
                }
            }
        };

        Self { value, unit }
    }

    /// Parse from a feed string like `"5,3"`, `"M5.3"`, `"~6"`.
    pub fn parse(text: &str, unit: Option<&str>) -> Option<Self> {
        let cleaned = text
            .trim()
            .replace(',', ".")
            .trim_start_matches(['M', 'm', '+', '~'])
            .to_string();
        cleaned.parse::<f64>().ok().map(|v| Self::new(v, unit))
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Whether the magnitude is a crowdsourced guess rather than a
    /// measurement.
    pub fn is_guess(&self) -> bool {
        self.unit.starts_with('(')
    }

    /// `M5+ estimated` style for low-confidence events.
    pub fn fuzzy(&self) -> String {
        let rounded = self.value.round();
        let sign = if self.value > rounded {
            "+"
        } else if self.value < rounded {
            "-"
        } else {
            "~"
        };
        format!("M{}{} estimated", rounded as i64, sign)
    }

    /// `Maybe strong` style for early warnings, before numbers firm up.
    pub fn early(&self) -> String {
        let strength = if self.value > 5.80 {
            "very strong"
        } else if self.value > 5.02 {
            "strong"
        } else if self.value < 4.98 {
            "weak"
        } else {
            "moderate"
        };
        format!("Maybe {strength}")
    }
}

impl std::fmt::Display for Magnitude {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1} {}", self.value, self.unit)
    }
}

impl PartialEq for Magnitude {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl PartialOrd for Magnitude {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

// ============================================================================
// Intensity
// ============================================================================

/// Shaking-intensity scale family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntensityScale {
    Shindo,
    Mercalli,
    Liedu,
}

impl std::fmt::Display for IntensityScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntensityScale::Shindo => write!(f, "Shindo"),
            IntensityScale::Mercalli => write!(f, "Mercalli"),
            IntensityScale::Liedu => write!(f, "Liedu"),
        }
    }
}

/// An observed shaking intensity, comparable across scales by numeric value.
/// Shindo has half-step values (5-, 5+, 6-, 6+) mapped to 4.5/5.4/5.5/6.4.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Intensity {
    value: f64,
    pub scale: IntensityScale,
}

impl Intensity {
    /// Numeric table rows: (value, shindo labels, mercalli/liedu labels).
    const TABLE: &'static [(f64, &'static [&'static str], &'static [&'static str])] = &[
        (0.0, &["0", "０"], &[]),
        (1.0, &["1", "１"], &["I", "1"]),
        (2.0, &["2", "２"], &["II", "2"]),
        (3.0, &["3", "３"], &["III", "3"]),
        (4.0, &["4", "４"], &["IV", "4"]),
        (4.5, &["5-", "5弱", "５弱"], &[]),
        (5.0, &["5", "５"], &["V", "5"]),
        (5.4, &["5+", "5強", "５強"], &[]),
        (5.5, &["6-", "6弱", "６弱"], &[]),
        (6.0, &[], &["VI", "6"]),
        (6.4, &["6+", "6強", "６強"], &[]),
        (7.0, &["7", "７"], &["VII", "7"]),
        (8.0, &[], &["VIII", "8"]),
        (9.0, &[], &["IX", "9"]),
        (10.0, &[], &["X", "10"]),
        (11.0, &[], &["XI", "11"]),
        (12.0, &[], &["XII", "12"]),
    ];

    /// Look up a textual intensity in the given scale (or any scale if None).
    pub fn parse(text: &str, scale: Option<IntensityScale>) -> Option<Self> {
        let text = text.trim().trim_start_matches("震度").trim();

        for &(value, shindo, roman) in Self::TABLE {
            let shindo_hit = shindo.iter().any(|label| *label == text);
            let roman_hit = roman.iter().any(|label| *label == text);

            match scale {
                Some(IntensityScale::Shindo) if shindo_hit => {
                    return Some(Self {
                        value,
                        scale: IntensityScale::Shindo,
                    })
                }
                Some(s) if roman_hit => return Some(Self { value, scale: s }),
                None if shindo_hit => {
                    return Some(Self {
                        value,
                        scale: IntensityScale::Shindo,
                    })
                }
                None if roman_hit => {
                    return Some(Self {
                        value,
                        scale: IntensityScale::Mercalli,
                    })
                }
                _ => {}
            }
        }
        None
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// The original-scale label for this value.
    fn label(&self) -> &'static str {
        for &(value, shindo, roman) in Self::TABLE {
            if (value - self.value).abs() < 1e-9 {
                let labels = match self.scale {
                    IntensityScale::Shindo => shindo,
                    _ => roman,
                };
                if let Some(first) = labels.first() {
                    return first;
                }
            }
        }
        "?"
    }
}

impl std::fmt::Display for Intensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.scale, self.label())
    }
}

impl PartialEq for Intensity {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl PartialOrd for Intensity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

// ============================================================================
// Status
// ============================================================================

/// Review status of a report, ordered by the confidence it implies.
///
/// Free-text labels from the many agencies are folded into tiers through a
/// synonym table; anything unrecognized lands on `Unknown` at 0.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Status {
    Rejected,
    Guessed,
    Incomplete,
    Detection,
    Reported,
    Unknown,
    Confirmed,
    Manual,
    Revised,
}

impl Status {
    /// Confidence multiplier this tier implies.
    pub fn confidence(&self) -> f64 {
        match self {
            Status::Rejected => 0.0,
            Status::Guessed => 0.1,
            Status::Incomplete => 0.4,
            Status::Detection => 0.6,
            Status::Reported => 0.7,
            Status::Unknown => 0.8,
            Status::Confirmed => 0.9,
            Status::Manual => 0.95,
            Status::Revised => 1.0,
        }
    }

    /// Fold a free-text agency label into a tier.
    pub fn parse(label: &str) -> Self {
        const TABLE: &[(&[&str], Status)] = &[
            (&["rejected", "deleted", "invalid"], Status::Rejected),
            (&["guessed", "presumed", "crowdsourced"], Status::Guessed),
            (
                &["incomplete", "partial", "caution", "1"],
                Status::Incomplete,
            ),
            (
                &[
                    "a",
                    "automatic",
                    "auto",
                    "detection",
                    "detected",
                    "detectado",
                    "good",
                    "stima provvisoria",
                    "flash",
                    "2",
                ],
                Status::Detection,
            ),
            (
                &[
                    "preliminary",
                    "prelim",
                    "prelim.",
                    "preliminar",
                    "provisional",
                    "reported",
                    "best",
                    "create",
                    "3",
                    "速報",
                ],
                Status::Reported,
            ),
            (
                &["confirmed", "c", "update", "updated", "detailed", "終", "4"],
                Status::Confirmed,
            ),
            (
                &["manual", "m", "reviewed", "rev.", "dati rivisti", "5"],
                Status::Manual,
            ),
            (
                &["revised", "revisión", "revisado", "final"],
                Status::Revised,
            ),
        ];

        let label = label.trim().to_lowercase();
        for (synonyms, status) in TABLE {
            if synonyms.contains(&label.as_str()) {
                return *status;
            }
        }
        Status::Unknown
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Rejected => "rejected",
            Status::Guessed => "guessed",
            Status::Incomplete => "incomplete",
            Status::Detection => "detection",
            Status::Reported => "reported",
            Status::Unknown => "unknown",
            Status::Confirmed => "confirmed",
            Status::Manual => "manual",
            Status::Revised => "revised",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Severity
// ============================================================================

/// Color-coded alert severity (GDACS/PAGER style).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Severity {
    #[default]
    None,
    Green,
    Yellow,
    Orange,
    Red,
}

impl Severity {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "green" => Severity::Green,
            "yellow" => Severity::Yellow,
            "orange" => Severity::Orange,
            "red" => Severity::Red,
            _ => Severity::None,
        }
    }

    /// How long an alert of this severity stays newsworthy, in minutes.
    pub fn duration_minutes(&self) -> i64 {
        match self {
            Severity::None => 60,
            Severity::Green => 120,
            Severity::Yellow => 180,
            Severity::Orange => 240,
            Severity::Red => 300,
        }
    }

    /// Presentation color for sinks that accept colors (mIRC-style code).
    pub fn color_code(&self) -> &'static str {
        match self {
            Severity::None => "01",
            Severity::Green => "03",
            Severity::Yellow => "08",
            Severity::Orange => "07",
            Severity::Red => "04",
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, Severity::None)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Severity::None => "none",
            Severity::Green => "green",
            Severity::Yellow => "yellow",
            Severity::Orange => "orange",
            Severity::Red => "red",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bogus_magnitude_resets() {
        assert!((Magnitude::new(9.8, None).value() - 3.0).abs() < 1e-9);
        assert!((Magnitude::new(9.6, None).value() - 9.6).abs() < 1e-9);
        assert!((Magnitude::new(-1.0, None).value() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn magnitude_parse_handles_commas_and_prefixes() {
        let m = Magnitude::parse("M5,3", Some("w")).expect("parses");
        assert!((m.value() - 5.3).abs() < 1e-9);
        assert_eq!(m.unit, "Mw");
    }

    #[test]
    fn magnitude_unit_normalization() {
        assert_eq!(Magnitude::new(5.0, Some("b")).unit, "Mb");
        assert_eq!(Magnitude::new(5.0, Some("Mw")).unit, "Mw");
        assert_eq!(Magnitude::new(5.0, Some("(guessing)")).unit, "(guessing)");
        assert_eq!(Magnitude::new(5.0, None).unit, "M");
    }

    #[test]
    fn magnitude_fuzzy_format() {
        assert_eq!(Magnitude::new(5.3, None).fuzzy(), "M5+ estimated");
        assert_eq!(Magnitude::new(4.8, None).fuzzy(), "M5- estimated");
    }

    #[test]
    fn shindo_half_steps() {
        let i = Intensity::parse("5強", Some(IntensityScale::Shindo)).expect("parses");
        assert!((i.value() - 5.4).abs() < 1e-9);
        let weak = Intensity::parse("6弱", None).expect("parses");
        assert!(i < weak);
    }

    #[test]
    fn mercalli_roman_numerals() {
        let i = Intensity::parse("VII", Some(IntensityScale::Mercalli)).expect("parses");
        assert!((i.value() - 7.0).abs() < 1e-9);
        assert_eq!(i.to_string(), "Mercalli VII");
    }

    #[test]
    fn status_ordering() {
        assert!(Status::parse("manual") > Status::parse("preliminary"));
        assert!(Status::parse("preliminary") > Status::parse("detection"));
        assert!(Status::parse("detection") > Status::parse("guessed"));
    }

    #[test]
    fn status_synonyms() {
        assert_eq!(Status::parse("REVISADO"), Status::Revised);
        assert_eq!(Status::parse("stima provvisoria"), Status::Detection);
        assert_eq!(Status::parse("速報"), Status::Reported);
        assert_eq!(Status::parse("whatever else"), Status::Unknown);
        assert!((Status::Unknown.confidence() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn severity_ordering_and_durations() {
        assert!(Severity::Red > Severity::Orange);
        assert!(Severity::Green < Severity::Yellow);
        assert_eq!(Severity::Red.duration_minutes(), 300);
        assert_eq!(Severity::Green.duration_minutes(), 120);
        assert_eq!(Severity::parse("ORANGE"), Severity::Orange);
        assert!(!Severity::parse("purple").is_set());
    }
}
