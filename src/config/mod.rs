//! Runtime configuration.
//!
//! Loaded from TOML, in this order:
//! 1. the path in the `TREMORWIRE_CONFIG` environment variable,
//! 2. `tremorwire.toml` in the working directory,
//! 3. built-in defaults (a log subscriber watching the whole planet).
//!
//! Domain specs are plain data here; `build()` turns them into live
//! [`Domain`] values with compiled regexes and persisted thresholds.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::domain::{Domain, Threshold};
use crate::notice::Category;
use crate::sinks::Style;
use crate::storage::ThresholdDb;
use crate::types::{Coords, Severity};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TREMORWIRE_CONFIG";
/// Default config filename.
pub const CONFIG_FILE: &str = "tremorwire.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for the persistent stores.
    pub data_dir: PathBuf,
    /// Source URIs handed to the adapter dispatch.
    pub sources: Vec<String>,
    /// Alerter handles on social streams.
    pub friends: Vec<String>,
    /// Bounded-queue size for the fusion and notice channels.
    pub queue_size: usize,
    pub fusion: FusionSettings,
    pub subscribers: Vec<SubscriberSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub threshold_mag: f64,
    pub precision_km: f64,
    pub history_size: usize,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            threshold_mag: 2.5,
            precision_km: 1000.0,
            history_size: 128,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberSpec {
    pub sink: SinkSpec,
    #[serde(default)]
    pub languages: Option<Vec<String>>,
    pub domains: Vec<DomainSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkSpec {
    /// Render into the process log.
    Log {
        #[serde(default = "default_style")]
        style: Style,
    },
    /// Append to a file.
    File { path: PathBuf },
}

fn default_style() -> Style {
    Style::Long
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainSpec {
    pub name: Option<String>,
    /// Minimum magnitude.
    pub mag: Option<f64>,
    /// [south, west, north, east].
    pub bbox: Option<[f64; 4]>,
    /// [lat, lon].
    pub target: Option<[f64; 2]>,
    /// Target radius km (overrides the event's felt radius).
    pub radius: Option<f64>,
    /// Case-insensitive regex over region names.
    pub region: Option<String>,
    pub score: Option<f64>,
    pub warning: bool,
    pub alert: Option<String>,
    pub people: Option<u64>,
    pub rate: Option<f64>,
    pub updates: Option<bool>,
    pub reports: Option<usize>,
    pub categories: Option<Vec<String>>,
    /// Initial value for the adaptive threshold; absent disables the gate.
    pub threshold: Option<f64>,
    pub sigmas: Option<f64>,
    pub empty: bool,
    pub debug: bool,
}

impl DomainSpec {
    /// Compile into a live domain, resuming a persisted threshold when one
    /// exists under this domain's canonical key.
    pub fn build(&self, thresholds: Option<&ThresholdDb>) -> Domain {
        let mut domain = Domain {
            name: self.name.clone(),
            mag_floor: self.mag,
            warning_only: self.warning,
            people_floor: self.people,
            rate_ceiling: self.rate,
            reports_floor: self.reports,
            empty: self.empty,
            debug: self.debug,
            ..Domain::default()
        };

        if let Some(score) = self.score {
            domain.score_floor = score;
        }
        if let Some(updates) = self.updates {
            domain.updates = updates;
        }
        if let Some([south, west, north, east]) = self.bbox {
            domain.bbox = Some((
                Coords::new(south, west, 0.0),
                Coords::new(north, east, 0.0),
            ));
        }
        if let Some([lat, lon]) = self.target {
            let mut target = Coords::new(lat, lon, 0.0);
            if let Some(radius) = self.radius {
                target.radius_km = radius;
            }
            domain.target = Some(target);
        }
        if let Some(pattern) = &self.region {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(regex) => domain.region = Some(regex),
                Err(e) => warn!(pattern, error = %e, "bad region pattern, ignoring"),
            }
        }
        if let Some(alert) = &self.alert {
            domain.alert_floor = Severity::parse(alert);
        }
        if let Some(categories) = &self.categories {
            domain.categories = categories
                .iter()
                .filter_map(|c| match c.to_lowercase().as_str() {
                    "earthquake" => Some(Category::Earthquake),
                    "alert" => Some(Category::Alert),
                    other => {
                        warn!(category = other, "unknown category, ignoring");
                        None
                    }
                })
                .collect();
        }
        if let Some(initial) = self.threshold {
            let sigmas = self.sigmas.unwrap_or(0.5);
            let fresh = Threshold::new(initial, sigmas);
            let resumed = thresholds
                .and_then(|db| db.load::<Threshold>(&domain.describe()).ok().flatten())
                .unwrap_or(fresh);
            domain.threshold = Some(Mutex::new(resumed));
        }

        domain
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sources: Vec::new(),
            friends: Vec::new(),
            queue_size: crate::runtime::worker::DEFAULT_QUEUE_SIZE,
            fusion: FusionSettings::default(),
            subscribers: vec![SubscriberSpec {
                sink: SinkSpec::Log {
                    style: Style::Long,
                },
                languages: None,
                domains: vec![DomainSpec {
                    name: Some("world".to_string()),
                    mag: Some(4.5),
                    ..DomainSpec::default()
                }],
            }],
        }
    }
}

impl Config {
    /// Load with the documented precedence.
    pub fn load(explicit: Option<&Path>) -> Self {
        let candidate = explicit
            .map(PathBuf::from)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

        match std::fs::read_to_string(&candidate) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => {
                    info!(path = %candidate.display(), "configuration loaded");
                    config
                }
                Err(e) => {
                    warn!(path = %candidate.display(), error = %e, "bad config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!("no config file, using defaults");
                Self::default()
            }
        }
    }
}
