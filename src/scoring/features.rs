//! Heuristic feature catalog for crowdsourced-text scoring.
//!
//! Each feature is data — a predicate over a precomputed [`TextProfile`],
//! a label and a weight — so the online-learning loop can re-rank features
//! without touching scorer control flow, and new features can be added as
//! table rows.

use crate::scoring::keywords;

/// Characters that read as worry or urgency in eyewitness posts.
const WORRIED_EMOJI: &[char] = &[
    '😟', '😢', '😧', '😭', '😲', '😐', '😑', '😮', '😔', '😣', '😖', '😬', '😓', '😱', '😨',
    '😰', '😫', '😳', '🥺', '🔴', '🛑', '📢', '⚡', '💥', '🚨', '⚠',
];

/// Everything the feature predicates need, computed once per text.
#[derive(Debug, Clone)]
pub struct TextProfile {
    pub text: String,
    /// Compressed length of the UTF-16 encoding; crude entropy probe that
    /// treats repetitive filler as shorter than it looks.
    pub density: usize,
    pub questions: usize,
    pub exclamations: usize,
    pub ellipsis: bool,
    pub mentions: bool,
    pub hashtags: usize,
    pub relevant_hashtag: bool,
    pub alerter_mentioned: bool,
    pub final_period: bool,
    pub letter_ratio: f64,
    pub uppercase_ratio: f64,
    pub has_spaces: bool,
    pub has_digits: bool,
    pub worried_emoji: bool,
    pub shindo: bool,
    pub low_shindo: bool,
    pub jp_early_warning: bool,
    pub keyword: Option<String>,
    pub intensifier: bool,
    pub laughter: bool,
    pub simulation: bool,
    pub spam: bool,
    pub from_alerter: bool,
}

impl TextProfile {
    /// Profile a post in the context of its declared languages and the
    /// configured alerter handles.
    pub fn build(text: &str, languages: &[String], alerters: &[String], from_alerter: bool) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len().max(1) as f64;

        let letters = chars.iter().filter(|c| c.is_alphabetic()).count() as f64;
        let uppers = chars.iter().filter(|c| c.is_uppercase()).count() as f64;

        let lower = text.to_lowercase();

        let keyword = keywords::contained("earthquake", text, languages)
            .or_else(|| keywords::contained("alert", text, languages))
            .or_else(|| keywords::contained("earthquake warning", text, languages));

        let hashtag_words: Vec<&str> = text
            .split_whitespace()
            .filter(|w| w.starts_with('#'))
            .collect();
        let relevant_hashtag = hashtag_words.iter().any(|tag| {
            let tag = tag.trim_start_matches('#');
            keywords::contained_any("earthquake", tag).is_some()
                || keywords::contained_any("alert", tag).is_some()
        });

        Self {
            density: density(text),
            questions: chars.iter().filter(|c| matches!(c, '?' | '？' | '¿')).count(),
            exclamations: chars.iter().filter(|c| matches!(c, '!' | '！' | '¡')).count(),
            ellipsis: text.contains("...") || text.contains('…'),
            mentions: text.contains('@'),
            hashtags: chars.iter().filter(|c| **c == '#').count(),
            relevant_hashtag,
            alerter_mentioned: alerters
                .iter()
                .any(|handle| !handle.is_empty() && lower.contains(&handle.to_lowercase())),
            final_period: chars.last().is_some_and(|c| matches!(c, '.' | '。')),
            letter_ratio: letters / total,
            uppercase_ratio: uppers / total,
            has_spaces: chars.iter().any(|c| c.is_whitespace()),
            has_digits: chars.iter().any(|c| c.is_ascii_digit()),
            worried_emoji: chars.iter().any(|c| WORRIED_EMOJI.contains(c)),
            shindo: text.contains("震度"),
            low_shindo: text.contains("震度0") || text.contains("震度1"),
            jp_early_warning: text.contains("地震情報") || text.contains("強震モニタ速報"),
            intensifier: keywords::contained("strong", text, languages).is_some()
                || keywords::contained("very strong", text, languages).is_some(),
            laughter: keywords::contained("haha", text, languages).is_some(),
            simulation: keywords::contained("simulation", text, languages).is_some(),
            spam: keywords::SPAM.iter().any(|s| lower.contains(s)),
            keyword,
            from_alerter,
            text: text.to_string(),
        }
    }
}

/// Compressed size of the UTF-16 encoding of the text.
///
/// Thresholds below are calibrated for sub-280-character posts; a terse
/// "EARTHQUAKE" compresses under 75 bytes while commentary threads do not.
pub fn density(text: &str) -> usize {
    let bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
    match zstd::bulk::compress(&bytes, 3) {
        Ok(compressed) => compressed.len(),
        Err(_) => bytes.len(),
    }
}

/// One scored feature.
pub struct Feature {
    pub label: &'static str,
    pub weight: f64,
    pub predicate: fn(&TextProfile) -> bool,
}

/// The feature table. Order is presentation-only; every triggered feature
/// contributes its weight.
pub fn catalog() -> &'static [Feature] {
    &[
        Feature { label: "very brief text", weight: 0.16, predicate: |p| p.density < 75 },
        Feature { label: "brief text", weight: 0.08, predicate: |p| p.density < 90 },
        Feature { label: "long text", weight: -0.08, predicate: |p| p.density > 100 },
        Feature { label: "question", weight: -0.05, predicate: |p| p.questions > 0 },
        Feature { label: "double question", weight: 0.08, predicate: |p| p.questions > 1 },
        Feature { label: "exclamation", weight: 0.05, predicate: |p| p.exclamations > 0 },
        Feature { label: "double exclamation", weight: 0.03, predicate: |p| p.exclamations > 1 },
        Feature { label: "ellipsis", weight: -0.02, predicate: |p| p.ellipsis },
        Feature { label: "usernames", weight: -0.10, predicate: |p| p.mentions },
        Feature { label: "multiple hashtags", weight: 0.03, predicate: |p| p.hashtags > 1 },
        Feature { label: "relevant hashtag", weight: 0.05, predicate: |p| p.relevant_hashtag },
        Feature {
            label: "short with hashtag",
            weight: 0.05,
            predicate: |p| p.density < 75 && p.relevant_hashtag,
        },
        Feature { label: "agency usernames", weight: -0.05, predicate: |p| p.alerter_mentioned },
        Feature { label: "final period", weight: -0.04, predicate: |p| p.final_period },
        Feature { label: "little content", weight: -0.10, predicate: |p| p.letter_ratio < 0.4 },
        Feature { label: "caps lock", weight: 0.25, predicate: |p| p.uppercase_ratio > 0.8 },
        Feature { label: "no spaces", weight: 0.10, predicate: |p| !p.has_spaces },
        Feature { label: "numbers", weight: -0.03, predicate: |p| p.has_digits },
        Feature { label: "worried emoji", weight: 0.13, predicate: |p| p.worried_emoji },
        Feature { label: "shindo", weight: 0.20, predicate: |p| p.shindo },
        Feature { label: "low shindo", weight: -0.20, predicate: |p| p.low_shindo },
        Feature { label: "Japanese early warning", weight: 0.20, predicate: |p| p.jp_early_warning },
        Feature { label: "no keyword", weight: -0.30, predicate: |p| p.keyword.is_none() },
        Feature { label: "intensifier", weight: 0.15, predicate: |p| p.intensifier },
        Feature { label: "laughter", weight: -0.08, predicate: |p| p.laughter },
        Feature { label: "simulation", weight: -0.50, predicate: |p| p.simulation },
        Feature { label: "alerter account", weight: 0.01, predicate: |p| p.from_alerter },
        // Substring-wise on purpose; see keywords::SPAM.
        Feature { label: "spam words", weight: -0.30, predicate: |p| p.spam },
    ]
}

/// Evaluate the catalog: triggered (weight, label) pairs.
pub fn evaluate(profile: &TextProfile) -> Vec<(f64, String)> {
    catalog()
        .iter()
        .filter(|f| (f.predicate)(profile))
        .map(|f| (f.weight, f.label.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(text: &str) -> TextProfile {
        TextProfile::build(text, &["en".to_string()], &[], false)
    }

    #[test]
    fn terse_shout_scores_positive() {
        let p = profile("EARTHQUAKE!!");
        let triggered = evaluate(&p);
        let score: f64 = triggered.iter().map(|(w, _)| w).sum();
        assert!(score > 0.3, "score {score}: {triggered:?}");
        assert!(triggered.iter().any(|(_, l)| l == "caps lock"));
        assert!(triggered.iter().any(|(_, l)| l == "exclamation"));
    }

    #[test]
    fn questioning_chatter_scores_low() {
        let p = profile(
            "Did anyone else maybe feel something? Not sure it was anything at all, possibly a truck passing by my house again...",
        );
        let score: f64 = evaluate(&p).iter().map(|(w, _)| w).sum();
        let shout: f64 = evaluate(&profile("EARTHQUAKE!!")).iter().map(|(w, _)| w).sum();
        assert!(score < shout);
    }

    #[test]
    fn simulation_tanks_the_score() {
        let p = profile("earthquake drill today at the office");
        let triggered = evaluate(&p);
        assert!(triggered.iter().any(|(_, l)| l == "simulation"));
        let score: f64 = triggered.iter().map(|(w, _)| w).sum();
        assert!(score < 0.0);
    }

    #[test]
    fn missing_keyword_penalized() {
        let p = profile("just had lunch, lovely day");
        assert!(evaluate(&p).iter().any(|(_, l)| l == "no keyword"));
    }

    #[test]
    fn low_shindo_cancels_shindo() {
        let p = TextProfile::build("震度1", &["ja".to_string()], &[], false);
        let triggered = evaluate(&p);
        assert!(triggered.iter().any(|(_, l)| l == "shindo"));
        assert!(triggered.iter().any(|(_, l)| l == "low shindo"));
    }

    #[test]
    fn spam_fragments_match_substrings() {
        let p = profile("MESSI earthquake at the stadium tonight");
        assert!(evaluate(&p).iter().any(|(_, l)| l == "spam words"));
    }

    #[test]
    fn density_orders_by_verbosity() {
        assert!(density("EARTHQUAKE") < density("a very long meandering description of what may or may not have been shaking, with qualifications"));
    }
}
