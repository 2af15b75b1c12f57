//! Replay-suppression store.
//!
//! Content-addressed by the md5 of a report's canonical representation.
//! Each content key is admitted exactly once per 12-hour window; entries
//! older than the window are evicted at open time. Inserts flush to disk so
//! a crash cannot replay already-announced reports.

use chrono::Utc;
use std::path::Path;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::types::Report;

/// Replay window in seconds.
const MAX_AGE_SECS: i64 = 12 * 3600;

pub struct SeenDb {
    db: sled::Db,
}

impl SeenDb {
    /// Open (or create) the store, evicting entries older than 12 h.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let cutoff = Utc::now().timestamp() - MAX_AGE_SECS;

        let mut evicted = 0usize;
        for entry in db.iter() {
            let (key, value) = entry?;
            let stamp = decode_epoch(&value);
            if stamp < cutoff {
                db.remove(key)?;
                evicted += 1;
            }
        }
        if evicted > 0 {
            db.flush()?;
            info!(evicted, "evicted stale seen entries");
        }

        Ok(Self { db })
    }

    /// Whether the report's content has already been admitted this window.
    /// A novel report is recorded (and flushed) as a side effect, so each
    /// content key passes exactly once.
    pub fn admit(&self, report: &Report) -> Result<bool, StorageError> {
        let key = md5::compute(report.canonical()).0;

        if self.db.contains_key(key)? {
            debug!(key = %report.canonical(), "replay suppressed");
            return Ok(false);
        }

        let now = Utc::now().timestamp();
        self.db.insert(key, now.to_be_bytes().to_vec())?;
        self.db.flush()?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

fn decode_epoch(bytes: &[u8]) -> i64 {
    match <[u8; 8]>::try_from(bytes) {
        Ok(arr) => i64::from_be_bytes(arr),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coords, Magnitude};
    use chrono::Duration;

    fn sample_report() -> Report {
        Report::new(
            Coords::new(35.6, 139.7, -10.0),
            Utc::now() - Duration::seconds(120),
            Magnitude::new(5.2, Some("Mw")),
        )
    }

    #[test]
    fn admits_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = SeenDb::open(dir.path().join("seen.db")).expect("open");

        let report = sample_report();
        assert!(db.admit(&report).expect("admit"));
        assert!(!db.admit(&report).expect("admit"));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("seen.db");
        let report = sample_report();

        {
            let db = SeenDb::open(&path).expect("open");
            assert!(db.admit(&report).expect("admit"));
        }

        let db = SeenDb::open(&path).expect("reopen");
        assert!(!db.admit(&report).expect("admit"));
    }

    #[test]
    fn different_content_both_admitted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = SeenDb::open(dir.path().join("seen.db")).expect("open");

        let a = sample_report();
        let mut b = sample_report();
        b.mag = Magnitude::new(6.0, Some("Mw"));

        assert!(db.admit(&a).expect("admit"));
        assert!(db.admit(&b).expect("admit"));
    }
}
