//! Shear-wave travel-time oracle.
//!
//! The fusion predicate and the early-warning deadline both need "how many
//! seconds until S-waves reach distance d from a quake at depth z". Real
//! deployments plug in a tau-p model; [`UniformShearModel`] is a layered
//! straight-ray estimate that stays within a few seconds of tabulated values
//! for the regional distances this pipeline cares about.
//!
//! [`TravelTimes`] memoizes any model after rounding depth to 10 km and
//! distance to 1 km. It is never called with negative depth.

use dashmap::DashMap;
use std::sync::Arc;

/// External travel-time model interface.
///
/// Returns candidate S-arrival times in seconds; may be empty if the model
/// has no ray for the geometry. `urgent` selects a fast (possibly coarser)
/// code path.
pub trait TravelTimeModel: Send + Sync {
    fn travel(&self, depth_km: f64, distance_km: f64, urgent: bool) -> Vec<f64>;
}

/// Straight-ray shear-wave estimate over a two-layer crust/mantle velocity.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformShearModel;

/// Crustal shear velocity (km/s), valid to roughly 40 km depth.
const VS_CRUST: f64 = 3.4;
/// Upper-mantle shear velocity (km/s).
const VS_MANTLE: f64 = 4.5;
/// Crust/mantle transition depth (km).
const MOHO_KM: f64 = 40.0;

impl TravelTimeModel for UniformShearModel {
    fn travel(&self, depth_km: f64, distance_km: f64, _urgent: bool) -> Vec<f64> {
        debug_assert!(depth_km >= 0.0, "negative depth passed to travel model");

        let slant = (depth_km.powi(2) + distance_km.powi(2)).sqrt();
        if slant <= 0.0 {
            return vec![0.0];
        }

        // Average velocity along the ray: crustal up to the Moho, then a
        // depth-weighted blend toward mantle speed.
        let deep_fraction = ((depth_km - MOHO_KM) / 600.0).clamp(0.0, 1.0);
        let velocity = VS_CRUST + (VS_MANTLE - VS_CRUST) * deep_fraction;

        vec![slant / velocity]
    }
}

/// Memoizing front for a travel-time model.
///
/// Keys round depth to 10 km and distance to 1 km, the granularity at which
/// the answers stop mattering for alerting.
pub struct TravelTimes {
    model: Arc<dyn TravelTimeModel>,
    cache: DashMap<(i64, i64), Vec<f64>>,
}

impl TravelTimes {
    pub fn new(model: Arc<dyn TravelTimeModel>) -> Self {
        Self {
            model,
            cache: DashMap::new(),
        }
    }

    /// All candidate S arrivals for the geometry, memoized.
    pub fn travel(&self, depth_km: f64, distance_km: f64, urgent: bool) -> Vec<f64> {
        let key = (
            ((depth_km / 10.0).round() as i64) * 10,
            distance_km.round() as i64,
        );

        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }

        let times = self
            .model
            .travel(key.0 as f64, key.1 as f64, urgent);
        // Unbounded growth guard: the key space is small in practice, but a
        // hostile feed could sweep distances; cap and start over.
        if self.cache.len() > 4096 {
            self.cache.clear();
        }
        self.cache.insert(key, times.clone());
        times
    }

    /// Latest (most conservative) S arrival, or 0 when the model is silent.
    pub fn slowest(&self, depth_km: f64, distance_km: f64) -> f64 {
        self.travel(depth_km, distance_km, false)
            .into_iter()
            .fold(0.0, f64::max)
    }

    /// Earliest S arrival, for per-target countdowns.
    pub fn fastest(&self, depth_km: f64, distance_km: f64) -> f64 {
        self.travel(depth_km, distance_km, true)
            .into_iter()
            .fold(f64::INFINITY, f64::min)
    }
}

impl Default for TravelTimes {
    fn default() -> Self {
        Self::new(Arc::new(UniformShearModel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shallow_regional_times_are_plausible() {
        let model = UniformShearModel;
        // 100 km away from a 10 km deep quake: ~30 s at crustal speed.
        let t = model.travel(10.0, 100.0, false)[0];
        assert!((25.0..35.0).contains(&t), "got {t}");
    }

    #[test]
    fn deep_events_travel_faster() {
        let model = UniformShearModel;
        let shallow = model.travel(10.0, 400.0, false)[0];
        let deep = model.travel(500.0, 400.0, false)[0];
        // The deep ray is longer but the per-km time must be lower.
        assert!(deep / (500.0f64.powi(2) + 400.0f64.powi(2)).sqrt() < shallow / 400.1);
    }

    #[test]
    fn memoization_rounds_keys() {
        let times = TravelTimes::default();
        let a = times.slowest(12.0, 100.4);
        let b = times.slowest(8.0, 99.8);
        // Both round to (10 km, 100 km).
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn zero_distance_is_zero_time() {
        let times = TravelTimes::default();
        assert!(times.fastest(0.0, 0.0) < 1e-9);
    }
}
