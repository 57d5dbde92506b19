//! On-disk record store: one JSON file per cache key.
//!
//! Records live at `<dir>/<key>.json`. Writes go to a uniquely named temp
//! file that is fsynced and then renamed over the record, so a crash leaves
//! either the old record or the new one, never a torn file.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::key::CacheKey;
use crate::error::{CacheError, Result};

const RECORD_EXT: &str = "json";
const TEMP_EXT: &str = "tmp";

/// A cached pipeline result. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Normalized query in readable form, shown by listings.
    #[serde(default)]
    pub description: Option<String>,
    /// Opaque pipeline output.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Expired entries are treated as absent.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Directory of per-key JSON records.
#[derive(Debug)]
pub struct DiskStore {
    dir: PathBuf,
    #[cfg(test)]
    fail_writes: std::sync::atomic::AtomicBool,
}

/// Result of scanning the store directory at startup.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub entries: Vec<CacheEntry>,
    /// Expired records removed during the scan.
    pub expired: usize,
    /// Unreadable or corrupt records removed during the scan.
    pub corrupt: usize,
}

impl DiskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            #[cfg(test)]
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Make every subsequent `write` fail with `StorageWrite`.
    #[cfg(test)]
    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key, RECORD_EXT))
    }

    /// Load every live record. Never fails: a missing directory is an empty
    /// store and a bad record only costs that one key.
    pub fn load_all(&self, now: DateTime<Utc>) -> LoadReport {
        let mut report = LoadReport::default();
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return report,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Cache directory unreadable, starting empty");
                return report;
            }
        };

        for dirent in read_dir.flatten() {
            let path = dirent.path();
            match path.extension().and_then(|e| e.to_str()) {
                // Leftover from a write that never reached its rename.
                Some(TEMP_EXT) => {
                    let _ = fs::remove_file(&path);
                    continue;
                }
                Some(RECORD_EXT) => {}
                _ => continue,
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| CacheKey::parse(s).ok())
            else {
                debug!(path = %path.display(), "Skipping non-cache file");
                continue;
            };

            let data = match fs::read(&path) {
                Ok(data) => data,
                Err(e) => {
                    warn!(key = %key.short(), error = %e, "Cache record unreadable, skipping");
                    continue;
                }
            };
            match parse_record(&data, &path, &key) {
                Ok(entry) if entry.is_expired_at(now) => {
                    report.expired += 1;
                    let _ = fs::remove_file(&path);
                }
                Ok(entry) => report.entries.push(entry),
                Err(e) => {
                    warn!(key = %key.short(), error = %e, "Dropping corrupt cache record");
                    report.corrupt += 1;
                    let _ = fs::remove_file(&path);
                }
            }
        }
        report
    }

    /// Read the record for `key`, if one exists.
    ///
    /// A corrupt record is removed and reported as `StorageRead`. An I/O
    /// failure is reported the same way but leaves the file alone.
    pub fn read(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.record_path(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::StorageRead(format!("{}: {}", path.display(), e)))
            }
        };
        match parse_record(&data, &path, key) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Durably write `entry`, replacing any previous record for its key.
    pub fn write(&self, entry: &CacheEntry) -> Result<()> {
        #[cfg(test)]
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CacheError::StorageWrite("writes disabled".to_string()));
        }

        fs::create_dir_all(&self.dir).map_err(|e| {
            CacheError::StorageWrite(format!(
                "cannot create cache directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let data = serde_json::to_vec_pretty(entry)
            .map_err(|e| CacheError::StorageWrite(format!("cannot serialize record: {}", e)))?;

        // Unique per write so concurrent stores for one key never share a temp file.
        let tmp = self.dir.join(format!(
            ".{}.{}.{}",
            entry.key,
            uuid::Uuid::new_v4().simple(),
            TEMP_EXT
        ));
        let target = self.record_path(&entry.key);

        let written = File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(&data)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &target));

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(CacheError::StorageWrite(format!(
                "cannot write {}: {}",
                target.display(),
                e
            )));
        }
        Ok(())
    }

    /// Remove the record for `key`. Returns whether one existed.
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::StorageWrite(format!(
                "cannot remove record {}: {}",
                key.short(),
                e
            ))),
        }
    }

    /// Remove every record in the directory, returning the keys removed.
    pub fn remove_all(&self) -> Result<Vec<CacheKey>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CacheError::StorageWrite(format!(
                    "cannot list {}: {}",
                    self.dir.display(),
                    e
                )))
            }
        };

        let mut removed = Vec::new();
        for dirent in read_dir.flatten() {
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| CacheKey::parse(s).ok())
            else {
                continue;
            };
            fs::remove_file(&path).map_err(|e| {
                CacheError::StorageWrite(format!("cannot remove {}: {}", path.display(), e))
            })?;
            removed.push(key);
        }
        Ok(removed)
    }
}

/// Decode and validate a record. Any failure here means the file is corrupt.
fn parse_record(data: &[u8], path: &Path, key: &CacheKey) -> Result<CacheEntry> {
    let entry: CacheEntry = serde_json::from_slice(data)
        .map_err(|e| CacheError::StorageRead(format!("{}: {}", path.display(), e)))?;
    if &entry.key != key {
        return Err(CacheError::StorageRead(format!(
            "{}: record belongs to key {}",
            path.display(),
            entry.key.short()
        )));
    }
    if entry.expires_at < entry.created_at {
        return Err(CacheError::StorageRead(format!(
            "{}: expiry precedes creation",
            path.display()
        )));
    }
    Ok(entry)
}
