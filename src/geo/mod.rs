//! Geographic oracles: shear-wave travel times, region naming, languages.
//!
//! The pipeline treats travel times and geocoding as external services (they
//! are not recomputed from waveforms or polygon data here). This module
//! defines the traits the core depends on and ships crude built-in
//! implementations good enough to run the pipeline hermetically; deployments
//! swap in real models at construction time.

mod regions;
mod travel;

pub use regions::{BuiltinRegions, Gazetteer, RegionIndex};
pub use travel::{TravelTimeModel, TravelTimes, UniformShearModel};

use crate::types::Coords;

/// External census/hazard lookups. Population and recurrence rates gate a
/// few domain rules; when no provider is wired in, those rules use their
/// built-in fallbacks.
pub trait Demographics: Send + Sync {
    /// People living within `radius_km` of the point.
    fn population_within(&self, coords: &Coords, radius_km: f64) -> Option<u64>;

    /// Expected events per year of at least this magnitude near the point.
    fn rate(&self, _coords: &Coords, _mag: f64, _radius_km: f64) -> Option<f64> {
        None
    }
}

/// The no-provider default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDemographics;

impl Demographics for NoDemographics {
    fn population_within(&self, _coords: &Coords, _radius_km: f64) -> Option<u64> {
        None
    }
}
