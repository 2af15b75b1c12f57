//! Online-learning counter store: feature-name+sign → running counter.
//!
//! The scorer's learning loop accumulates in memory and syncs the whole
//! counter map here after each maturation pass, so the learned weights
//! survive restarts.

use std::collections::HashMap;
use std::path::Path;

use crate::error::StorageError;

pub struct HeuristicsDb {
    db: sled::Db,
}

impl HeuristicsDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// Load every counter (done once at startup).
    pub fn load_all(&self) -> HashMap<String, f64> {
        let mut counters = HashMap::new();
        for entry in self.db.iter() {
            if let Ok((key, value)) = entry {
                if let Ok(bytes) = <[u8; 8]>::try_from(value.as_ref()) {
                    counters.insert(
                        String::from_utf8_lossy(&key).into_owned(),
                        f64::from_be_bytes(bytes),
                    );
                }
            }
        }
        counters
    }

    /// Write the full counter map and flush.
    pub fn sync(&self, counters: &HashMap<String, f64>) -> Result<(), StorageError> {
        for (name, value) in counters {
            self.db.insert(name.as_bytes(), value.to_be_bytes().to_vec())?;
        }
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("heuristics.db");

        let mut counters = HashMap::new();
        counters.insert("caps lock+".to_string(), 4.5);
        counters.insert("caps lock-".to_string(), -1.25);

        {
            let db = HeuristicsDb::open(&path).expect("open");
            db.sync(&counters).expect("sync");
        }

        let db = HeuristicsDb::open(&path).expect("reopen");
        let loaded = db.load_all();
        assert_eq!(loaded.get("caps lock+"), Some(&4.5));
        assert_eq!(loaded.get("caps lock-"), Some(&-1.25));
    }
}
