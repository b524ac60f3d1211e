//! Durable blob storage
//!
//! The core only needs "load blob by key" / "save blob by key" / "clear
//! namespace". [`BlobStore`] is that seam; [`FileBlobStore`] implements it
//! with one file per key under a state directory. On top of it sits the
//! JSON snapshot cache that lets the display survive a restart without a
//! network fetch.

use crate::error::{ElspotError, Result};
use crate::logging::get_logger;
use crate::state::{PriceState, Resolution};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Key of the rolling-average history blob
pub const HISTORY_BLOB_KEY: &str = "nordpool_history.bin";

/// Key of the cached display snapshot
pub const SNAPSHOT_BLOB_KEY: &str = "price_state.json";

/// Fixed-size-blob storage by key
pub trait BlobStore {
    /// Load a blob; Ok(None) when the key has never been written
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a blob, replacing any previous value
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Drop every blob in the namespace
    fn clear(&self) -> Result<()>;
}

/// Blob store backed by a directory, one file per key
pub struct FileBlobStore {
    dir: PathBuf,
    logger: crate::logging::StructuredLogger,
}

impl FileBlobStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            logger: get_logger("storage"),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl BlobStore for FileBlobStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read(&path)
            .map(Some)
            .map_err(|e| ElspotError::storage(format!("read {}: {}", path.display(), e)))
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| ElspotError::storage(format!("create {}: {}", self.dir.display(), e)))?;
        let path = self.path_for(key);
        // Write-then-rename so a crash never leaves a torn blob behind
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)
            .map_err(|e| ElspotError::storage(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| ElspotError::storage(format!("rename {}: {}", path.display(), e)))?;
        self.logger
            .debug(&format!("Saved blob {} ({} bytes)", key, bytes.len()));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        std::fs::remove_dir_all(&self.dir)
            .map_err(|e| ElspotError::storage(format!("clear {}: {}", self.dir.display(), e)))?;
        self.logger.info("Cleared blob namespace");
        Ok(())
    }
}

/// Persist the display snapshot as JSON
pub fn save_snapshot<S: BlobStore>(store: &S, state: &PriceState) -> Result<()> {
    let bytes = serde_json::to_vec(state)?;
    store.save(SNAPSHOT_BLOB_KEY, &bytes)
}

/// Load the cached display snapshot, if one was ever saved and still parses
pub fn load_snapshot<S: BlobStore>(store: &S) -> Result<Option<PriceState>> {
    match store.load(SNAPSHOT_BLOB_KEY)? {
        None => Ok(None),
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
    }
}

/// Whether a cached snapshot still covers "today": it must carry the
/// configured resolution and at least one slot dated on the given local
/// date. A mismatched resolution invalidates the slot grid even when the
/// dates line up.
pub fn snapshot_is_current(state: &PriceState, resolution: Resolution, today: NaiveDate) -> bool {
    if !state.ok || state.points.is_empty() {
        return false;
    }
    if state.resolution != resolution {
        return false;
    }
    let day = today.format("%Y-%m-%d").to_string();
    state.points.iter().any(|p| p.starts_at.starts_with(&day))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{PriceLevel, PricePoint, PriceSource};

    fn sample_state() -> PriceState {
        let mut state = PriceState::default();
        state.ok = true;
        state.source = PriceSource::NordPool;
        state.push_point(PricePoint {
            starts_at: "2025-03-01T00:00".to_string(),
            level: PriceLevel::Cheap,
            price: 0.42,
            raw_price: Some(0.30),
        });
        state
    }

    #[test]
    fn blob_roundtrip_and_clear() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(tmp.path().join("blobs"));

        assert!(store.load("missing").unwrap().is_none());
        store.save("k", b"payload").unwrap();
        assert_eq!(store.load("k").unwrap().unwrap(), b"payload");

        store.clear().unwrap();
        assert!(store.load("k").unwrap().is_none());
    }

    #[test]
    fn snapshot_cache_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(tmp.path());

        assert!(load_snapshot(&store).unwrap().is_none());

        let state = sample_state();
        save_snapshot(&store, &state).unwrap();
        let loaded = load_snapshot(&store).unwrap().unwrap();
        assert!(loaded.ok);
        assert_eq!(loaded.count(), 1);
        assert_eq!(loaded.points[0].starts_at, "2025-03-01T00:00");
        assert_eq!(loaded.points[0].level, PriceLevel::Cheap);
        assert_eq!(loaded.points[0].raw_price, Some(0.30));
    }

    #[test]
    fn snapshot_currency_check() {
        let state = sample_state();
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2025, 2, 28).unwrap();
        assert!(snapshot_is_current(&state, Resolution::Hour, today));
        assert!(!snapshot_is_current(&state, Resolution::Hour, yesterday));
    }

    #[test]
    fn snapshot_with_other_resolution_is_not_current() {
        let mut state = sample_state();
        state.resolution = Resolution::Quarter;
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert!(!snapshot_is_current(&state, Resolution::Hour, today));
        assert!(snapshot_is_current(&state, Resolution::Quarter, today));
    }
}
