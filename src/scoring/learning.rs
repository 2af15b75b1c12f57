//! Online learning over heuristic outcomes.
//!
//! When an event matures — confirmed official, or timed out with enough
//! children — each crowdsourced child's triggered features are credited
//! (event went official) or debited (event evaporated). Global counters
//! track totals per sign; `learned()` ranks features by how predictive they
//! have turned out to be. Counters persist through [`HeuristicsDb`].

use std::collections::HashMap;
use std::sync::Mutex;

use crate::storage::HeuristicsDb;
use crate::types::{Report, Status};

/// Sentinel returned by ratio ranking when a feature never missed.
pub const RATIO_SENTINEL: f64 = 999.0;

pub struct HeuristicStats {
    counters: Mutex<HashMap<String, f64>>,
}

impl HeuristicStats {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Resume from persisted counters.
    pub fn from_db(db: &HeuristicsDb) -> Self {
        Self {
            counters: Mutex::new(db.load_all()),
        }
    }

    /// Credit or debit one child report's features.
    ///
    /// `confirmed` is whether the surrounding event went official; `credit`
    /// is the evidence weight (1.0 for warners, 0.1 for mere witnesses).
    /// Reviewed reports carry no heuristics worth learning from.
    pub fn learn(&self, report: &mut Report, confirmed: bool, credit: f64) {
        if report.heuristics.is_empty() || report.status > Status::Reported {
            return;
        }

        let sign = if confirmed { "+" } else { "-" };
        let signed = if confirmed { credit } else { -credit };

        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        *counters.entry(sign.to_string()).or_insert(0.0) += credit.abs();
        for (_, name) in &report.heuristics {
            *counters.entry(format!("{name}{sign}")).or_insert(0.0) += signed;
        }
        *counters.entry(format!("total{sign}")).or_insert(0.0) += signed;

        let positive = counters.get("+").copied().unwrap_or(0.0);
        let negative = counters.get("-").copied().unwrap_or(0.0);
        if negative > 0.0 {
            counters.insert("/".to_string(), positive / negative);
        }

        // A report is only ever learned from once.
        report.heuristics.clear();
    }

    /// Count one matured event.
    pub fn mark_matured(&self) {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *counters.entry("=".to_string()).or_insert(0.0) += 1.0;
    }

    /// Rank features for a sign.
    ///
    /// For `+`, `−` and `=` the score is the sum of the feature's
    /// positive-rate and negative-rate contributions; for `/` it is the
    /// absolute positive/negative ratio with [`RATIO_SENTINEL`] standing in
    /// for division by zero. `−` ranks ascending (worst offenders first),
    /// everything else descending.
    pub fn learned(&self, sign: char) -> Vec<(f64, String)> {
        let counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let total_pos = counters.get("+").copied().unwrap_or(0.0);
        let total_neg = counters.get("-").copied().unwrap_or(0.0);

        let mut names: Vec<String> = counters
            .keys()
            .filter(|k| k.len() > 1 && (k.ends_with('+') || k.ends_with('-')))
            .filter(|k| !k.starts_with("total"))
            .map(|k| k[..k.len() - 1].to_string())
            .collect();
        names.sort();
        names.dedup();

        let mut ranked: Vec<(f64, String)> = names
            .into_iter()
            .map(|name| {
                let positive = if sign != '-' && total_pos > 0.0 {
                    counters.get(&format!("{name}+")).copied().unwrap_or(0.0) / total_pos
                } else {
                    0.0
                };
                let negative = if sign != '+' && total_neg > 0.0 {
                    counters.get(&format!("{name}-")).copied().unwrap_or(0.0) / total_neg
                } else {
                    0.0
                };

                let score = if sign == '/' {
                    if negative != 0.0 {
                        (positive / negative).abs()
                    } else {
                        RATIO_SENTINEL
                    }
                } else {
                    positive + negative
                };
                (score, name)
            })
            .collect();

        ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        if sign != '-' {
            ranked.reverse();
        }
        ranked
    }

    /// Raw counter for diagnostics.
    pub fn counter(&self, name: &str) -> f64 {
        match self.counters.lock() {
            Ok(guard) => guard.get(name).copied().unwrap_or(0.0),
            Err(poisoned) => poisoned.into_inner().get(name).copied().unwrap_or(0.0),
        }
    }

    /// Persist every counter.
    pub fn sync(&self, db: &HeuristicsDb) -> Result<(), crate::error::StorageError> {
        let counters = match self.counters.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        db.sync(&counters)
    }
}

impl Default for HeuristicStats {
    fn default() -> Self {
        Self::new()
    }
}
