//! Crowdsourced-text scoring: feature catalog, per-user track records, and
//! the online-learning feedback loop.

pub mod features;
pub mod keywords;
mod learning;

pub use learning::{HeuristicStats, RATIO_SENTINEL};

use dashmap::DashMap;

/// Per-poster running score totals, bounded LFU-style.
///
/// Purely diagnostic: the `tweeters`-style surfaces rank the best and worst
/// posters. When the table outgrows its cap the least-consulted entries are
/// dropped.
pub struct UserScores {
    scores: DashMap<String, (f64, u64)>,
    capacity: usize,
}

impl UserScores {
    pub fn new(capacity: usize) -> Self {
        Self {
            scores: DashMap::new(),
            capacity,
        }
    }

    pub fn add(&self, user: &str, score: f64) {
        if let Some(mut entry) = self.scores.get_mut(user) {
            entry.0 += score;
            entry.1 += 1;
            return;
        }

        if self.scores.len() >= self.capacity {
            self.evict_coldest();
        }
        self.scores.insert(user.to_string(), (score, 1));
    }

    fn evict_coldest(&self) {
        let coldest = self
            .scores
            .iter()
            .min_by_key(|e| e.value().1)
            .map(|e| e.key().clone());
        if let Some(key) = coldest {
            self.scores.remove(&key);
        }
    }

    /// (user, total) pairs, best first when `best`, worst first otherwise.
    pub fn ranked(&self, best: bool, limit: usize) -> Vec<(String, f64)> {
        let mut all: Vec<(String, f64)> = self
            .scores
            .iter()
            .map(|e| (e.key().clone(), e.value().0))
            .collect();
        all.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        if best {
            all.reverse();
        }
        all.truncate(limit);
        all
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

impl Default for UserScores {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Matched-keyword frequency counter for the `commonwords` surface.
#[derive(Default)]
pub struct TermCounter {
    terms: DashMap<String, u64>,
}

impl TermCounter {
    pub fn record(&self, term: &str) {
        *self.terms.entry(term.to_string()).or_insert(0) += 1;
    }

    pub fn most_common(&self, limit: usize) -> Vec<(String, u64)> {
        let mut all: Vec<(String, u64)> = self
            .terms
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        all.sort_by(|a, b| b.1.cmp(&a.1));
        all.truncate(limit);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_scores_accumulate() {
        let scores = UserScores::new(10);
        scores.add("quakefan", 0.3);
        scores.add("quakefan", 0.2);
        scores.add("spammer", -0.4);

        let best = scores.ranked(true, 1);
        assert_eq!(best[0].0, "quakefan");
        assert!((best[0].1 - 0.5).abs() < 1e-9);

        let worst = scores.ranked(false, 1);
        assert_eq!(worst[0].0, "spammer");
    }

    #[test]
    fn bounded_by_capacity() {
        let scores = UserScores::new(4);
        for i in 0..10 {
            scores.add(&format!("user{i}"), 0.1);
        }
        assert!(scores.len() <= 4);
    }

    #[test]
    fn term_counter_ranks() {
        let counter = TermCounter::default();
        counter.record("terremoto");
        counter.record("terremoto");
        counter.record("deprem");
        assert_eq!(counter.most_common(1)[0].0, "terremoto");
    }
}
