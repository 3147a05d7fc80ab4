//! Calibration cache.
//!
//! Calibration results are keyed by model, hardware resolution and
//! calibration resolution, and persisted with bincode so a restart does not
//! have to run the whole calibration again while the entries are fresh.

use scan_common::hal::error::{ScanError, ScanResult};
use scan_common::hal::model::Frontend;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::calibration::ShadingTable;

/// One calibration result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationEntry {
    /// Model name.
    pub model: String,
    /// Hardware resolution the calibration was captured at.
    pub hw_dpi: u32,
    /// Horizontal resolution of the shading table.
    pub calib_xres: u32,
    /// Frontend codes after offset and gain calibration.
    pub frontend: Frontend,
    /// LED exposure after LED calibration.
    pub led_exposure: [u16; 3],
    /// Shading table.
    pub shading: ShadingTable,
    /// Creation time (Unix epoch seconds).
    pub created_at: u64,
}

impl CalibrationEntry {
    /// Whether this entry applies to a scan of `model` at `hw_dpi` / `calib_xres`.
    pub fn matches(&self, model: &str, hw_dpi: u32, calib_xres: u32) -> bool {
        self.model == model && self.hw_dpi == hw_dpi && self.calib_xres == calib_xres
    }

    /// Whether the entry is older than `expiration_minutes` at `now`.
    ///
    /// Zero minutes never expires.
    pub fn is_expired(&self, now: u64, expiration_minutes: u32) -> bool {
        expiration_minutes != 0
            && now.saturating_sub(self.created_at) > expiration_minutes as u64 * 60
    }
}

/// On-disk layout of the cache.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheFile {
    /// Format version.
    pub version: u32,
    /// Entries, at most one per key.
    pub entries: Vec<CalibrationEntry>,
    /// Timestamp of last save (Unix epoch seconds).
    pub saved_at: u64,
}

impl CacheFile {
    /// Current format version.
    pub const CURRENT_VERSION: u32 = 1;

    /// Empty cache.
    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            entries: Vec::new(),
            saved_at: 0,
        }
    }
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Calibration cache bound to a file.
#[derive(Debug)]
pub struct CalibrationCache {
    path: PathBuf,
    expiration_minutes: u32,
    file: CacheFile,
}

impl CalibrationCache {
    /// Empty cache persisted at `path`.
    pub fn new<P: AsRef<Path>>(path: P, expiration_minutes: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            expiration_minutes,
            file: CacheFile::new(),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached entries.
    pub fn entries(&self) -> &[CalibrationEntry] {
        &self.file.entries
    }

    /// Read the backing file.
    ///
    /// Returns `Ok(false)` and keeps the cache empty when the file is missing
    /// or written by another format version.
    ///
    /// # Errors
    /// `Persistence` if the file exists but cannot be read or decoded.
    pub fn load(&mut self) -> ScanResult<bool> {
        debug!("Loading calibration cache from {:?}", self.path);

        if !self.path.exists() {
            debug!("Calibration cache does not exist, starting empty");
            return Ok(false);
        }

        let file = File::open(&self.path).map_err(|e| {
            ScanError::Persistence(format!("Failed to open calibration cache: {}", e))
        })?;

        let reader = BufReader::new(file);
        let cache: CacheFile = bincode::deserialize_from(reader).map_err(|e| {
            ScanError::Persistence(format!("Failed to deserialize calibration cache: {}", e))
        })?;

        if cache.version != CacheFile::CURRENT_VERSION {
            warn!(
                "Calibration cache version {} differs from current {}, starting empty",
                cache.version,
                CacheFile::CURRENT_VERSION
            );
            return Ok(false);
        }

        info!(
            "Loaded {} calibration entries from {:?} (saved at {})",
            cache.entries.len(),
            self.path,
            cache.saved_at
        );
        self.file = cache;
        Ok(true)
    }

    /// Write the cache to its backing file.
    pub fn save(&mut self) -> ScanResult<()> {
        debug!("Saving calibration cache to {:?}", self.path);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ScanError::Persistence(format!("Failed to create directory: {}", e))
            })?;
        }

        self.file.saved_at = now_secs();

        let file = File::create(&self.path).map_err(|e| {
            ScanError::Persistence(format!("Failed to create calibration cache: {}", e))
        })?;

        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, &self.file).map_err(|e| {
            ScanError::Persistence(format!("Failed to serialize calibration cache: {}", e))
        })?;

        info!(
            "Saved {} calibration entries to {:?}",
            self.file.entries.len(),
            self.path
        );
        Ok(())
    }

    /// Fresh entry for the key, if any.
    pub fn find(&self, model: &str, hw_dpi: u32, calib_xres: u32, now: u64) -> Option<&CalibrationEntry> {
        self.file.entries.iter().find(|entry| {
            entry.matches(model, hw_dpi, calib_xres)
                && !entry.is_expired(now, self.expiration_minutes)
        })
    }

    /// Add `entry`, replacing any entry with the same key.
    pub fn insert(&mut self, entry: CalibrationEntry) {
        self.file
            .entries
            .retain(|e| !e.matches(&entry.model, entry.hw_dpi, entry.calib_xres));
        self.file.entries.push(entry);
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.file.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(hw_dpi: u32, created_at: u64) -> CalibrationEntry {
        CalibrationEntry {
            model: "cis-flatbed".to_string(),
            hw_dpi,
            calib_xres: hw_dpi / 2,
            frontend: Frontend {
                gain: [10, 11, 12],
                offset: [120, 121, 122],
                ..Frontend::default()
            },
            led_exposure: [9000, 9500, 10000],
            shading: ShadingTable::compute(&[100; 2], &[40000; 2], 2, 1).unwrap(),
            created_at,
        }
    }

    #[test]
    fn test_cache_file_new() {
        let file = CacheFile::new();
        assert_eq!(file.version, CacheFile::CURRENT_VERSION);
        assert!(file.entries.is_empty());
        assert_eq!(file.saved_at, 0);
    }

    #[test]
    fn test_expiration() {
        let e = entry(600, 1000);
        assert!(!e.is_expired(1000 + 60 * 60, 60));
        assert!(e.is_expired(1000 + 60 * 60 + 1, 60));
        assert!(!e.is_expired(u64::MAX, 0));
    }

    #[test]
    fn test_insert_replaces_same_key() {
        let mut cache = CalibrationCache::new("unused.bin", 0);
        cache.insert(entry(600, 1));
        cache.insert(entry(1200, 2));
        cache.insert(entry(600, 3));
        assert_eq!(cache.entries().len(), 2);
        assert_eq!(cache.find("cis-flatbed", 600, 300, 10).unwrap().created_at, 3);
        assert!(cache.find("cis-flatbed", 600, 600, 10).is_none());
        assert!(cache.find("ccd-flatbed", 600, 300, 10).is_none());
    }

    #[test]
    fn test_find_skips_expired() {
        let mut cache = CalibrationCache::new("unused.bin", 1);
        cache.insert(entry(600, 0));
        assert!(cache.find("cis-flatbed", 600, 300, 60).is_some());
        assert!(cache.find("cis-flatbed", 600, 300, 61).is_none());
    }

    #[test]
    fn test_cache_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("calibration.bin");

        let mut cache = CalibrationCache::new(&path, 60);
        cache.insert(entry(600, now_secs()));
        cache.save().unwrap();
        assert!(path.exists());

        let mut loaded = CalibrationCache::new(&path, 60);
        assert!(loaded.load().unwrap());
        assert_eq!(loaded.entries(), cache.entries());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let mut cache = CalibrationCache::new(dir.path().join("missing.bin"), 60);
        assert!(!cache.load().unwrap());
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn test_load_version_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.bin");
        let old = CacheFile {
            version: CacheFile::CURRENT_VERSION + 1,
            entries: vec![entry(600, 0)],
            saved_at: 0,
        };
        std::fs::write(&path, bincode::serialize(&old).unwrap()).unwrap();

        let mut cache = CalibrationCache::new(&path, 0);
        assert!(!cache.load().unwrap());
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.bin");
        std::fs::write(&path, [0xff, 0x01]).unwrap();

        let mut cache = CalibrationCache::new(&path, 0);
        assert!(matches!(cache.load(), Err(ScanError::Persistence(_))));
    }
}
