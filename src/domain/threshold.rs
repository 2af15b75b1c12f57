//! Per-domain adaptive confidence threshold with an hourly seasonal
//! baseline.
//!
//! Crowd activity has a strong diurnal cycle — a burst of confident posts
//! at 3 AM local means more than the same burst at lunchtime. Each hour of
//! the day keeps an EMA mean and variance of accepted confidence sums; the
//! gate for a new burst is the smoothed neighborhood mean plus a sigma
//! margin.

use chrono::{Timelike, Utc};
use serde::{Deserialize, Serialize};

/// EMA weight for threshold updates.
const UPDATE_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Threshold {
    averages: Vec<f64>,
    variances: Vec<f64>,
    sigmas: f64,
}

impl Threshold {
    pub fn new(initial: f64, sigmas: f64) -> Self {
        Self {
            averages: vec![initial; 24],
            variances: vec![0.0; 24],
            sigmas,
        }
    }

    pub fn sigmas(&self) -> f64 {
        self.sigmas
    }

    fn hour() -> usize {
        Utc::now().hour() as usize
    }

    /// Record an accepted confidence sum for the current hour.
    ///
    /// `hit=false` records a near-miss as a delta on top of the hour's
    /// average instead of an absolute value.
    pub fn update(&mut self, value: f64, hit: bool) {
        let hour = Self::hour();
        let value = if hit {
            value
        } else {
            self.averages[hour] + value
        };

        self.averages[hour] = self.averages[hour] * (1.0 - UPDATE_WEIGHT) + value * UPDATE_WEIGHT;
        let deviation = (value - self.averages[hour]).powi(2);
        self.variances[hour] =
            self.variances[hour] * (1.0 - UPDATE_WEIGHT) + deviation * UPDATE_WEIGHT;
    }

    pub fn average(&self) -> f64 {
        self.averages.iter().sum::<f64>() / self.averages.len() as f64
    }

    pub fn variance(&self) -> f64 {
        self.variances.iter().sum::<f64>() / self.variances.len() as f64
    }

    /// The acceptance floor right now: the day-wide mean pulled toward the
    /// current hour and its neighbors (closer hours weigh more), plus a
    /// sigma margin.
    pub fn minimum(&self) -> f64 {
        let mut average = self.average();
        let mut variance = self.variance();
        let hour = Self::hour() as i64;

        for offset in [0i64, -1, 1, -2, 2, -3, 3] {
            let index = hour + offset;
            if !(0..24).contains(&index) {
                continue;
            }
            let weight = 1.0 / (offset.abs() as f64 + 2.0);
            average = average * (1.0 - weight) + self.averages[index as usize] * weight;
            variance = variance * (1.0 - weight) + self.variances[index as usize] * weight;
        }

        average + variance.sqrt() * self.sigmas
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self::new(0.05, 0.5)
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.3} average, {:.3} minimum",
            self.average(),
            self.minimum()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_threshold_sits_at_initial() {
        let t = Threshold::new(0.05, 0.5);
        assert!((t.average() - 0.05).abs() < 1e-9);
        // No variance yet: minimum equals the smoothed average.
        assert!((t.minimum() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn updates_raise_the_floor() {
        let mut t = Threshold::new(0.05, 0.5);
        for _ in 0..50 {
            t.update(2.0, true);
        }
        assert!(t.minimum() > 0.05);
        // The current hour converged toward the observed value.
        assert!(t.average() > 0.05);
    }

    #[test]
    fn near_misses_accumulate_relative() {
        let mut t = Threshold::new(0.5, 0.5);
        let before = t.average();
        t.update(0.1, false);
        assert!(t.average() > before);
    }

    #[test]
    fn serde_round_trip() {
        let mut t = Threshold::new(0.05, 1.0);
        t.update(1.0, true);
        let json = serde_json::to_string(&t).expect("serialize");
        let back: Threshold = serde_json::from_str(&json).expect("deserialize");
        assert!((back.minimum() - t.minimum()).abs() < 1e-9);
        assert!((back.sigmas() - 1.0).abs() < 1e-9);
    }
}
