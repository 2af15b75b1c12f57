//! Adaptive-threshold store: canonical domain key → serialized baseline.
//!
//! Values are JSON so the baseline schema can grow; keys are the domain's
//! canonical description string.

use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

use crate::error::StorageError;

pub struct ThresholdDb {
    db: sled::Db,
}

impl ThresholdDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value)?;
        self.db.insert(key.as_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All stored domain keys, for the `thresholds` diagnostic surface.
    pub fn keys(&self) -> Vec<String> {
        self.db
            .iter()
            .keys()
            .filter_map(|k| k.ok())
            .map(|k| String::from_utf8_lossy(&k).into_owned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = ThresholdDb::open(dir.path().join("thresholds.db")).expect("open");

        let value = vec![0.05f64; 24];
        db.save("Domain(region=Japan)", &value).expect("save");

        let back: Option<Vec<f64>> = db.load("Domain(region=Japan)").expect("load");
        assert_eq!(back, Some(value));
        assert_eq!(db.keys(), vec!["Domain(region=Japan)".to_string()]);
    }

    #[test]
    fn missing_key_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = ThresholdDb::open(dir.path().join("thresholds.db")).expect("open");
        let got: Option<Vec<f64>> = db.load("nope").expect("load");
        assert!(got.is_none());
    }
}
