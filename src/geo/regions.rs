//! Seismic region naming and language lookup.
//!
//! The real Flinn–Engdahl partitioning is external data; [`RegionIndex`] is
//! the interface the pipeline consumes and [`BuiltinRegions`] a coarse
//! built-in table of the most active named regions, so tests and hermetic
//! deployments resolve sensible names without network access.

use crate::types::Coords;

/// Forward-geocoding oracle: place name → coordinates.
pub trait Gazetteer: Send + Sync {
    fn locate(&self, place: &str) -> Option<Coords>;
}

/// Region-naming oracle.
pub trait RegionIndex: Send + Sync {
    /// Human-readable seismic region name for the coordinates.
    fn region(&self, coords: &Coords) -> String;

    /// ISO 639-1 language codes spoken around the region, most common first.
    /// English is always an acceptable fallback and need not be included.
    fn languages(&self, region: &str) -> Vec<String>;

    /// Whether the point is over open water; `Some(name)` names the body of
    /// water when known.
    fn sea(&self, coords: &Coords) -> Option<String>;

    /// Whether `name` is one of this index's region names (used to
    /// cross-check geocoded area fields).
    fn known_region(&self, _name: &str) -> bool {
        false
    }
}

/// One named region: bounding box (south, west, north, east) + languages.
struct RegionBox {
    name: &'static str,
    south: f64,
    west: f64,
    north: f64,
    east: f64,
    languages: &'static [&'static str],
}

const REGIONS: &[RegionBox] = &[
    RegionBox { name: "Japan", south: 30.0, west: 129.0, north: 45.6, east: 146.0, languages: &["ja"] },
    RegionBox { name: "Ryukyu Islands", south: 24.0, west: 122.9, north: 30.0, east: 131.0, languages: &["ja"] },
    RegionBox { name: "Taiwan", south: 21.7, west: 119.9, north: 25.4, east: 122.1, languages: &["zh"] },
    RegionBox { name: "South Korea", south: 33.0, west: 125.0, north: 38.7, east: 130.0, languages: &["ko"] },
    RegionBox { name: "Eastern China", south: 20.0, west: 105.0, north: 42.0, east: 122.9, languages: &["zh"] },
    RegionBox { name: "Philippines", south: 4.5, west: 116.9, north: 21.2, east: 127.0, languages: &["tl", "en"] },
    RegionBox { name: "Indonesia", south: -11.0, west: 95.0, north: 6.0, east: 141.0, languages: &["id"] },
    RegionBox { name: "New Zealand", south: -47.5, west: 166.0, north: -34.0, east: 179.0, languages: &["en"] },
    RegionBox { name: "Nepal-India Border Region", south: 26.3, west: 80.0, north: 30.5, east: 88.2, languages: &["ne", "hi"] },
    RegionBox { name: "Northern India", south: 20.0, west: 68.0, north: 35.0, east: 97.0, languages: &["hi"] },
    RegionBox { name: "Iran", south: 25.0, west: 44.0, north: 39.8, east: 63.3, languages: &["fa"] },
    RegionBox { name: "Turkey", south: 35.8, west: 25.9, north: 42.1, east: 44.8, languages: &["tr"] },
    RegionBox { name: "Greece", south: 34.7, west: 19.3, north: 41.8, east: 29.7, languages: &["el"] },
    RegionBox { name: "Central Italy", south: 41.2, west: 11.5, north: 44.5, east: 15.0, languages: &["it"] },
    RegionBox { name: "Southern Italy", south: 36.5, west: 12.0, north: 41.2, east: 18.6, languages: &["it"] },
    RegionBox { name: "Northern Italy", south: 44.5, west: 6.6, north: 47.1, east: 13.9, languages: &["it"] },
    RegionBox { name: "Iberia", south: 36.0, west: -9.9, north: 43.9, east: 3.4, languages: &["es", "pt"] },
    RegionBox { name: "Ukraine Region", south: 44.0, west: 22.0, north: 52.6, east: 40.6, languages: &["uk", "ru"] },
    RegionBox { name: "Iceland", south: 63.0, west: -24.8, north: 66.8, east: -13.1, languages: &["is"] },
    RegionBox { name: "Chile", south: -56.0, west: -76.0, north: -17.4, east: -66.0, languages: &["es"] },
    RegionBox { name: "Peru", south: -18.5, west: -81.6, north: 0.2, east: -68.5, languages: &["es"] },
    RegionBox { name: "Ecuador", south: -5.1, west: -81.2, north: 1.7, east: -75.1, languages: &["es"] },
    RegionBox { name: "Colombia", south: -4.3, west: -79.1, north: 12.6, east: -66.8, languages: &["es"] },
    RegionBox { name: "Mexico", south: 14.5, west: -118.5, north: 32.7, east: -86.6, languages: &["es"] },
    RegionBox { name: "Central America", south: 7.0, west: -92.5, north: 14.5, east: -77.0, languages: &["es"] },
    RegionBox { name: "California", south: 32.4, west: -124.6, north: 42.0, east: -114.0, languages: &["en", "es"] },
    RegionBox { name: "Alaska", south: 51.0, west: -179.9, north: 71.5, east: -129.9, languages: &["en"] },
    RegionBox { name: "Caribbean", south: 10.0, west: -85.0, north: 23.5, east: -59.0, languages: &["es", "en"] },
];

/// Coarse built-in region table.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinRegions;

impl RegionIndex for BuiltinRegions {
    fn region(&self, coords: &Coords) -> String {
        for r in REGIONS {
            if (r.south..=r.north).contains(&coords.lat)
                && (r.west..=r.east).contains(&coords.lon)
            {
                return r.name.to_string();
            }
        }

        // Unnamed areas fall back to a quadrant description so that region
        // locks and tags still work.
        let ns = if coords.lat >= 0.0 { "N" } else { "S" };
        let ew = if coords.lon >= 0.0 { "E" } else { "W" };
        format!(
            "{}{ns} {}{ew}",
            (coords.lat.abs() / 10.0).floor() as i64 * 10,
            (coords.lon.abs() / 10.0).floor() as i64 * 10,
        )
    }

    fn languages(&self, region: &str) -> Vec<String> {
        for r in REGIONS {
            if r.name.eq_ignore_ascii_case(region) {
                return r.languages.iter().map(|l| (*l).to_string()).collect();
            }
        }
        Vec::new()
    }

    fn known_region(&self, name: &str) -> bool {
        REGIONS.iter().any(|r| r.name.eq_ignore_ascii_case(name.trim()))
    }

    fn sea(&self, coords: &Coords) -> Option<String> {
        // No polygon data: anything not inside a named land box and far from
        // every box edge is called open water. This over-triggers in remote
        // continental interiors, which is acceptable for a fallback oracle.
        for r in REGIONS {
            if (r.south..=r.north).contains(&coords.lat)
                && (r.west..=r.east).contains(&coords.lon)
            {
                return None;
            }
        }
        let named = self.region(coords);
        if named.ends_with('E') || named.ends_with('W') {
            Some("open waters".to_string())
        } else {
            None
        }
    }
}

/// (name, lat, lon) rows for the built-in gazetteer: frequently-watched
/// cities plus country centroids referenced by feed area fields.
const PLACES: &[(&str, f64, f64)] = &[
    ("tokyo", 35.683, 139.767),
    ("osaka", 34.694, 135.502),
    ("delhi", 28.614, 77.216),
    ("seoul", 37.567, 126.978),
    ("athens", 37.984, 23.728),
    ("istanbul", 41.05, 28.97),
    ("ankara", 39.867, 32.833),
    ("london", 51.507, -0.128),
    ("kuala lumpur", 3.155, 101.714),
    ("mexico city", 19.433, -99.133),
    ("santiago", -33.45, -70.667),
    ("lima", -12.046, -77.043),
    ("jakarta", -6.2, 106.817),
    ("manila", 14.6, 120.983),
    ("wellington", -41.289, 174.777),
    ("rome", 41.893, 12.483),
    ("naples", 40.852, 14.268),
    ("kyiv", 50.45, 30.524),
    ("reykjavik", 64.147, -21.94),
    ("san francisco", 37.775, -122.419),
    ("los angeles", 34.052, -118.244),
    ("anchorage", 61.218, -149.9),
    ("japan", 36.2, 138.25),
    ("turkey", 39.0, 35.0),
    ("greece", 39.07, 21.82),
    ("italy", 41.87, 12.57),
    ("chile", -35.68, -71.54),
    ("mexico", 23.63, -102.55),
    ("peru", -9.19, -75.02),
    ("indonesia", -0.79, 113.92),
    ("philippines", 12.88, 121.77),
    ("new zealand", -40.9, 174.89),
    ("iran", 32.43, 53.69),
    ("romania", 45.94, 24.97),
    ("costa rica", 9.75, -83.75),
    ("colombia", 4.57, -74.3),
    ("ecuador", -1.83, -78.18),
    ("venezuela", 6.42, -66.59),
    ("el salvador", 13.79, -88.9),
    ("argentina", -38.42, -63.62),
];

impl Gazetteer for BuiltinRegions {
    fn locate(&self, place: &str) -> Option<Coords> {
        let wanted = place.trim().to_lowercase();
        // Exact name first, then "City, Country" style containment.
        for (name, lat, lon) in PLACES {
            if wanted == *name {
                return Some(Coords::new(*lat, *lon, 0.0).with_radius(30.0));
            }
        }
        for (name, lat, lon) in PLACES {
            if wanted.contains(name) {
                return Some(Coords::new(*lat, *lon, 0.0).with_radius(60.0));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gazetteer_finds_cities() {
        let idx = BuiltinRegions;
        let tokyo = idx.locate("Tokyo").expect("known city");
        assert!((tokyo.lat - 35.683).abs() < 0.01);
        assert!(idx.locate("Ankara, Turkey").is_some());
        assert!(idx.locate("Nowhereville").is_none());
    }

    #[test]
    fn tokyo_is_japan() {
        let idx = BuiltinRegions;
        let region = idx.region(&Coords::new(35.68, 139.77, 0.0));
        assert_eq!(region, "Japan");
        assert_eq!(idx.languages(&region), vec!["ja".to_string()]);
    }

    #[test]
    fn athens_is_greece() {
        let idx = BuiltinRegions;
        assert_eq!(idx.region(&Coords::new(37.98, 23.73, 0.0)), "Greece");
    }

    #[test]
    fn unknown_region_gets_quadrant_name() {
        let idx = BuiltinRegions;
        let region = idx.region(&Coords::new(-44.0, -120.0, 0.0));
        assert_eq!(region, "40S 120W");
        assert!(idx.languages(&region).is_empty());
    }

    #[test]
    fn mid_pacific_is_sea() {
        let idx = BuiltinRegions;
        assert!(idx.sea(&Coords::new(-30.0, -140.0, 0.0)).is_some());
        assert!(idx.sea(&Coords::new(35.68, 139.77, 0.0)).is_none());
    }
}
