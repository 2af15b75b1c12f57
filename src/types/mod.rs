//! Canonical data model: coordinates, measurement scales, and reports.

mod coords;
mod report;
mod units;

pub use coords::Coords;
pub use report::{clip, Report, Water};
pub use units::{Intensity, IntensityScale, Magnitude, Severity, Status};
