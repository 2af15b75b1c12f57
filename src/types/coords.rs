//! Geographic coordinates with uncertainty.
//!
//! A [`Coords`] is a point plus a radius of uncertainty and a confidence in
//! [0, 1]. Equality is deliberately tolerant and subtraction returns a
//! distance that is penalized by the combined radii, so that two vague
//! reports of the same quake compare "close" while two precise reports of
//! different quakes do not. Rounding collapses near-duplicates, which is what
//! keeps the fusion cache effective.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in km, for great-circle distances.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Latitude/longitude tolerance for equality (degrees).
const TOLERANCE_DEG: f64 = 0.001;
/// Altitude tolerance for equality (km).
const TOLERANCE_ALT_KM: f64 = 0.01;
/// Radius tolerance for equality (km).
const TOLERANCE_RADIUS_KM: f64 = 0.5;
/// Confidence tolerance for equality.
const TOLERANCE_CONFIDENCE: f64 = 0.05;

/// A geographic point with uncertainty radius and confidence.
///
/// `alt_km` is negative below the surface; earthquake hypocenters are always
/// at negative altitude.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coords {
    pub lat: f64,
    pub lon: f64,
    /// Altitude in km; negative means depth below surface.
    pub alt_km: f64,
    /// Radius of uncertainty in km.
    pub radius_km: f64,
    /// Confidence in the location, in [0, 1].
    pub confidence: f64,
}

impl Coords {
    pub fn new(lat: f64, lon: f64, alt_km: f64) -> Self {
        Self {
            lat,
            lon,
            alt_km,
            radius_km: 0.0,
            confidence: 1.0,
        }
    }

    /// Set the uncertainty radius, consuming-and-returning for literals.
    #[must_use]
    pub fn with_radius(mut self, radius_km: f64) -> Self {
        self.radius_km = radius_km;
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Build from a GeoJSON position array: `[lon, lat]` or `[lon, lat, alt]`.
    pub fn from_geojson(position: &[f64]) -> Option<Self> {
        let lon = *position.first()?;
        let lat = *position.get(1)?;
        let alt = position.get(2).copied().unwrap_or(0.0);
        Some(Self::new(lat, lon, alt))
    }

    /// GeoJSON position array: `[lon, lat, alt_km]`.
    pub fn as_geojson(&self) -> [f64; 3] {
        [self.lon, self.lat, self.alt_km]
    }

    /// Great-circle surface distance in km, haversine formula.
    pub fn surface_distance_km(&self, other: &Self) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }

    /// Distance between two uncertain points: great-circle distance plus a
    /// penalty of `max(distance/2, (r1+r2)/4)` so that vague locations never
    /// compare as pinpoint-close.
    pub fn distance_km(&self, other: &Self) -> f64 {
        let distance = self.surface_distance_km(other);
        distance + f64::max(distance * 0.5, (self.radius_km + other.radius_km) * 0.25)
    }

    /// Round to `digits` decimal places, growing the radius to cover the
    /// displacement introduced by rounding.
    #[must_use]
    pub fn round(&self, digits: u32) -> Self {
        let scale = 10f64.powi(digits as i32);
        let rounded = Self {
            lat: (self.lat * scale).round() / scale,
            lon: (self.lon * scale).round() / scale,
            alt_km: (self.alt_km * scale).round() / scale,
            radius_km: self.radius_km,
            confidence: self.confidence,
        };
        let shift = rounded.distance_km(self);
        Self {
            radius_km: rounded.radius_km.max(shift),
            ..rounded
        }
    }

    /// Weighted centroid of a set of points. The resulting radius is twice
    /// the weighted RMS distance of the inputs from the centroid, so a tight
    /// cluster yields a tight centroid and a scattered one stays vague.
    pub fn center<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (Coords, f64)>,
    {
        let points: Vec<(Coords, f64)> = points
            .into_iter()
            .filter(|(_, w)| w.is_finite() && *w > 0.0)
            .collect();
        let total: f64 = points.iter().map(|(_, w)| w).sum();
        if points.is_empty() || total <= 0.0 {
            return None;
        }

        let mean = |f: fn(&Coords) -> f64| -> f64 {
            points.iter().map(|(p, w)| f(p) * w).sum::<f64>() / total
        };

        let mut center = Coords::new(mean(|p| p.lat), mean(|p| p.lon), mean(|p| p.alt_km));

        let spread = points
            .iter()
            .map(|(p, w)| p.distance_km(&center).powi(2) * w)
            .sum::<f64>()
            / total;
        center.radius_km = 2.0 * spread.sqrt();
        center.confidence = points
            .iter()
            .map(|(p, w)| p.confidence * w)
            .sum::<f64>()
            / total;

        Some(center)
    }

    /// Depth in km below surface (never negative; defaults to 10 km when the
    /// report carried no altitude).
    pub fn depth_km(&self) -> f64 {
        let depth = self.alt_km.min(0.0).abs();
        if depth > 0.0 {
            depth
        } else {
            10.0
        }
    }
}

impl PartialEq for Coords {
    /// Tolerant equality: lat/lon within 0.001°, altitude within 0.01 km,
    /// radius within 0.5 km, confidence within 0.05.
    fn eq(&self, other: &Self) -> bool {
        (self.lat - other.lat).abs() <= TOLERANCE_DEG
            && (self.lon - other.lon).abs() <= TOLERANCE_DEG
            && (self.alt_km - other.alt_km).abs() <= TOLERANCE_ALT_KM
            && (self.radius_km - other.radius_km).abs() <= TOLERANCE_RADIUS_KM
            && (self.confidence - other.confidence).abs() <= TOLERANCE_CONFIDENCE
    }
}

impl std::fmt::Display for Coords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3})", self.lat, self.lon)?;
        if self.radius_km > 1.0 {
            write!(f, " ±{} km", self.radius_km as i64)?;
        }
        if self.alt_km < -1.0 {
            write!(f, ", ↓{} km", self.alt_km.abs() as i64)?;
        } else if self.alt_km > 1.0 {
            write!(f, ", ↑{} km", self.alt_km as i64)?;
        }
        if self.confidence < 0.7 {
            write!(f, " ({}%)", (self.confidence * 100.0) as i64)?;
        }
        Ok(())
    }
}
