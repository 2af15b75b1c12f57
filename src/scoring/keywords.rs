//! Multi-language relevance keyword tables.
//!
//! Terms are semantic labels ("earthquake", "alert", ...); each maps to
//! per-language synonym lists. Matching is case-insensitive and
//! substring-wise: agency hashtags, inflected forms and compounds should all
//! hit. The first synonym per language is the canonical translation used
//! when rendering announcements.

/// (term, language, synonyms) rows. The "" language row applies to every
/// language (scripts that are unambiguous on their own).
const TABLE: &[(&str, &str, &[&str])] = &[
    ("earthquake", "en", &["earthquake", "quake", "tremor", "seismic"]),
    ("earthquake", "es", &["terremoto", "sismo", "temblor"]),
    ("earthquake", "it", &["terremoto", "scossa"]),
    ("earthquake", "pt", &["terremoto", "sismo", "tremor"]),
    ("earthquake", "fr", &["séisme", "tremblement de terre"]),
    ("earthquake", "de", &["erdbeben"]),
    ("earthquake", "ja", &["地震", "じしん"]),
    ("earthquake", "zh", &["地震"]),
    ("earthquake", "el", &["σεισμός", "σεισμος", "σεισμο"]),
    ("earthquake", "tr", &["deprem"]),
    ("earthquake", "id", &["gempa"]),
    ("earthquake", "tl", &["lindol"]),
    ("earthquake", "ro", &["cutremur"]),
    ("earthquake", "th", &["แผ่นดินไหว"]),
    ("earthquake", "hi", &["भूकंप"]),
    ("earthquake", "ne", &["भूकम्प"]),
    ("earthquake", "ko", &["지진"]),
    ("earthquake", "uk", &["землетрус"]),
    ("earthquake", "ru", &["землетрясение"]),
    ("earthquake", "fa", &["زلزله", "زمین‌لرزه"]),
    ("earthquake", "is", &["jarðskjálfti"]),
    ("alert", "en", &["alert", "air raid", "siren", "explosion", "warning"]),
    ("alert", "es", &["alerta", "explosión", "sirena"]),
    ("alert", "it", &["allarme", "esplosione", "sirene"]),
    ("alert", "ja", &["警報", "サイレン"]),
    ("alert", "tr", &["alarm", "patlama"]),
    ("alert", "uk", &["тривога", "вибух", "сирена"]),
    ("alert", "ru", &["тревога", "взрыв", "сирена"]),
    ("earthquake warning", "en", &["earthquake warning", "eew"]),
    ("earthquake warning", "es", &["alerta sísmica", "alerta sismica"]),
    ("earthquake warning", "ja", &["緊急地震速報"]),
    ("earthquake warning", "ko", &["지진속보"]),
    ("possible tsunami", "en", &["possible tsunami", "tsunami"]),
    ("possible tsunami", "es", &["posible tsunami", "tsunami"]),
    ("possible tsunami", "ja", &["津波"]),
    ("weak", "en", &["weak", "slight", "minor"]),
    ("weak", "es", &["leve", "débil"]),
    ("weak", "it", &["lieve", "debole"]),
    ("strong", "en", &["strong", "big", "huge"]),
    ("strong", "es", &["fuerte"]),
    ("strong", "it", &["forte"]),
    ("strong", "ja", &["強い"]),
    ("strong", "tr", &["şiddetli"]),
    ("strong", "el", &["δυνατός", "ισχυρός"]),
    ("very strong", "en", &["very strong", "violent", "massive"]),
    ("very strong", "es", &["muy fuerte", "fortísimo"]),
    ("very strong", "it", &["fortissimo", "molto forte"]),
    ("destroyed", "en", &["destroyed", "collapsed", "devastating"]),
    ("destroyed", "es", &["destruido", "derrumbe"]),
    ("destroyed", "it", &["crollato", "distrutto"]),
    ("haha", "en", &["haha", "lol", "lmao", "rofl"]),
    ("haha", "es", &["jaja", "jeje"]),
    ("haha", "pt", &["kkkk", "rsrs"]),
    ("haha", "id", &["wkwk"]),
    ("haha", "th", &["555"]),
    ("haha", "ja", &["ｗｗｗ", "www", "笑"]),
    ("simulation", "en", &["simulation", "drill", "simulated", "exercise", "test alert"]),
    ("simulation", "es", &["simulacro", "simulación"]),
    ("simulation", "it", &["simulazione", "esercitazione"]),
    ("simulation", "ja", &["訓練"]),
];

/// Substring fragments of perennial trending names that co-occur with
/// "earthquake" metaphors (sports and celebrity fans "shook the stadium").
/// Matched case-insensitively and substring-wise on purpose: the cost of
/// catching a fragment is lower than letting a fan flood spawn an event.
pub const SPAM: &[&str] = &[
    "messi", "ronaldo", "mbappe", "haaland", "neymar", "beckham", "maradona", "pelé", "pele",
    "concert", "goal", "touchdown", "home run", "knockout", "final score", "beyonce", "bts",
    "taylor swift",
];

/// Canonical synonyms for a term in one language (empty if uncovered).
pub fn get(term: &str, language: &str) -> &'static [&'static str] {
    for (t, lang, synonyms) in TABLE {
        if *t == term && *lang == language {
            return synonyms;
        }
    }
    &[]
}

/// The canonical translation used in announcements, falling back to English.
pub fn announce(term: &str, language: &str) -> Option<&'static str> {
    get(term, language)
        .first()
        .or_else(|| get(term, "en").first())
        .copied()
}

/// Search `text` for any synonym of `term` in the given languages.
/// Returns the matched synonym. English is always tried as a fallback.
pub fn contained(term: &str, text: &str, languages: &[String]) -> Option<String> {
    let haystack = text.to_lowercase();

    let mut candidates: Vec<&str> = languages.iter().map(String::as_str).collect();
    if !candidates.contains(&"en") {
        candidates.push("en");
    }

    for language in candidates {
        for synonym in get(term, language) {
            if haystack.contains(&synonym.to_lowercase()) {
                return Some((*synonym).to_string());
            }
        }
    }
    None
}

/// Search across every language we know (used to spot mismatched-language
/// chatter that is still on topic).
pub fn contained_any(term: &str, text: &str) -> Option<String> {
    let haystack = text.to_lowercase();
    for (t, _, synonyms) in TABLE {
        if *t == term {
            for synonym in *synonyms {
                if haystack.contains(&synonym.to_lowercase()) {
                    return Some((*synonym).to_string());
                }
            }
        }
    }
    None
}

/// Every language with a translation for the term.
pub fn languages_for(term: &str) -> Vec<&'static str> {
    TABLE
        .iter()
        .filter(|(t, _, _)| *t == term)
        .map(|(_, lang, _)| *lang)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_in_declared_language() {
        let langs = vec!["es".to_string()];
        assert_eq!(
            contained("earthquake", "Fuerte TEMBLOR en la costa", &langs),
            Some("temblor".to_string())
        );
    }

    #[test]
    fn english_is_always_fallback() {
        let langs = vec!["ja".to_string()];
        assert!(contained("earthquake", "big earthquake now", &langs).is_some());
    }

    #[test]
    fn japanese_script_matches() {
        let langs = vec!["ja".to_string()];
        assert_eq!(
            contained("earthquake", "また地震だ！", &langs),
            Some("地震".to_string())
        );
    }

    #[test]
    fn any_language_catches_mismatch() {
        // Italian text declared as English still hits the global table.
        assert!(contained_any("earthquake", "forte terremoto in centro").is_some());
        assert!(contained("earthquake", "forte terremoto in centro", &["en".to_string()]).is_none());
    }

    #[test]
    fn announce_falls_back_to_english() {
        assert_eq!(announce("earthquake", "it"), Some("terremoto"));
        assert_eq!(announce("earthquake", "xx"), Some("earthquake"));
    }
}
