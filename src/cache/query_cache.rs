//! Query result cache with TTL expiry, forced refresh and durable storage.
//!
//! The in-memory index is loaded from the record directory on [`QueryCache::open`]
//! and every [`QueryCache::store`] is persisted before it returns.
//!
//! Expired entries are cleaned up in three places: records found expired
//! during `open` are deleted, a lookup that hits an expired entry evicts it,
//! and [`QueryCache::sweep`] removes everything expired (run by `close`).
//! Correctness never depends on cleanup having happened; expiry is always
//! checked against `now` on lookup.
//!
//! The record directory is the source of truth. Every lookup re-reads the
//! key's record, so deletes and overwrites made by another process sharing
//! the directory are seen immediately. The only entries served without a
//! record are ones whose write failed in this process.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::key::CacheKey;
use super::store::{CacheEntry, DiskStore};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// One row of [`QueryCache::list`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CacheSummary {
    pub key: CacheKey,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub age_minutes: i64,
    /// Serialized payload size in bytes.
    pub size: usize,
}

/// Aggregate cache statistics over live entries.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// In-memory copy of an entry.
#[derive(Debug, Clone)]
struct Slot {
    entry: CacheEntry,
    /// `false` when the record write failed and only memory holds the entry.
    persisted: bool,
}

impl Slot {
    fn persisted(entry: CacheEntry) -> Self {
        Self {
            entry,
            persisted: true,
        }
    }
}

/// Persistent query cache shared by concurrent pipeline invocations.
pub struct QueryCache {
    entries: DashMap<CacheKey, Slot>,
    /// Serializes writers per key so memory and disk agree on the last store.
    write_locks: DashMap<CacheKey, Arc<Mutex<()>>>,
    disk: DiskStore,
    ttl: Duration,
}

impl QueryCache {
    /// Open the cache configured by `config`, loading surviving records.
    ///
    /// Never fails on bad on-disk state; only an invalid TTL is rejected.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        Self::open_at(config, Utc::now())
    }

    /// [`QueryCache::open`] with an explicit clock reading.
    pub fn open_at(config: &CacheConfig, now: DateTime<Utc>) -> Result<Self> {
        let ttl = ttl_from_secs(config.ttl_secs)?;
        let disk = DiskStore::new(config.resolved_dir());
        let report = disk.load_all(now);
        if report.expired > 0 || report.corrupt > 0 {
            info!(
                expired = report.expired,
                corrupt = report.corrupt,
                "Removed stale cache records on load"
            );
        }
        debug!(
            dir = %disk.dir().display(),
            entries = report.entries.len(),
            "Query cache opened"
        );

        let entries = DashMap::with_capacity(report.entries.len());
        for entry in report.entries {
            entries.insert(entry.key.clone(), Slot::persisted(entry));
        }
        Ok(Self {
            entries,
            write_locks: DashMap::new(),
            disk,
            ttl,
        })
    }

    pub fn dir(&self) -> &Path {
        self.disk.dir()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up `key` as of now. See [`QueryCache::lookup_at`].
    pub fn lookup(&self, key: &CacheKey, force_refresh: bool) -> Option<CacheEntry> {
        self.lookup_at(key, force_refresh, Utc::now())
    }

    /// Return the live entry for `key`, or `None` on a miss.
    ///
    /// `force_refresh` always misses and leaves any stored entry in place.
    /// The record is re-read on every call so changes made by another process
    /// win over the in-memory copy; read faults count as a miss.
    pub fn lookup_at(
        &self,
        key: &CacheKey,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry> {
        if force_refresh {
            debug!(key = %key.short(), "Cache bypassed by force refresh");
            return None;
        }

        match self.current(key) {
            Some(entry) if entry.is_expired_at(now) => {
                debug!(key = %key.short(), "Cache entry expired, evicting");
                self.evict_expired(key, now);
                None
            }
            Some(entry) => {
                debug!(key = %key.short(), "Cache hit");
                Some(entry)
            }
            None => {
                debug!(key = %key.short(), "Cache miss");
                None
            }
        }
    }

    /// Write `payload` under `key`, replacing any previous entry.
    ///
    /// See [`QueryCache::store_described`].
    pub fn store(
        &self,
        key: &CacheKey,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        self.store_described(key, None, payload, now)
    }

    /// Write `payload` under `key` with a readable description for listings.
    ///
    /// The record is durable when this returns `Ok`. On `StorageWrite` the
    /// entry is still served from memory for the life of this process and
    /// any older record is deleted so a restart cannot bring it back.
    pub fn store_described(
        &self,
        key: &CacheKey,
        description: Option<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry> {
        let entry = CacheEntry {
            key: key.clone(),
            description,
            payload,
            created_at: now,
            expires_at: now
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        let lock = self.write_lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let persisted = self.disk.write(&entry);
        self.entries.insert(
            key.clone(),
            Slot {
                entry: entry.clone(),
                persisted: persisted.is_ok(),
            },
        );

        match persisted {
            Ok(()) => {
                debug!(key = %key.short(), expires_at = %entry.expires_at, "Cached result");
                Ok(entry)
            }
            Err(e) => {
                warn!(key = %key.short(), error = %e, "Cache entry kept in memory only");
                if let Err(remove_err) = self.disk.remove(key) {
                    warn!(key = %key.short(), error = %remove_err, "Superseded cache record left on disk");
                }
                Err(e)
            }
        }
    }

    /// Remove `key` outright. Returns whether an entry existed.
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let lock = self.write_lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let in_memory = self.entries.remove(key).is_some();
        let on_disk = self.disk.remove(key)?;
        if in_memory || on_disk {
            debug!(key = %key.short(), "Cache entry invalidated");
        }
        Ok(in_memory || on_disk)
    }

    /// Remove every expired entry from memory and disk.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|e| e.value().entry.is_expired_at(now))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if self.evict_expired(&key, now) {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Swept expired cache entries");
        }
        removed
    }

    /// Remove every entry, live or expired, including records written by
    /// other processes.
    pub fn clear(&self) -> Result<usize> {
        let mut removed: BTreeSet<CacheKey> =
            self.entries.iter().map(|e| e.key().clone()).collect();
        self.entries.clear();
        removed.extend(self.disk.remove_all()?);
        info!(removed = removed.len(), "Cache cleared");
        Ok(removed.len())
    }

    /// Live entries, newest first.
    pub fn list(&self, now: DateTime<Utc>) -> Vec<CacheSummary> {
        let mut items: Vec<CacheSummary> = self
            .entries
            .iter()
            .filter(|e| !e.value().entry.is_expired_at(now))
            .map(|e| {
                let entry = &e.value().entry;
                CacheSummary {
                    key: entry.key.clone(),
                    description: entry.description.clone(),
                    created_at: entry.created_at,
                    expires_at: entry.expires_at,
                    age_minutes: (now - entry.created_at).num_minutes().max(0),
                    size: payload_size(&entry.payload),
                }
            })
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.key.cmp(&b.key)));
        items
    }

    pub fn stats(&self, now: DateTime<Utc>) -> CacheStats {
        let items = self.list(now);
        CacheStats {
            total_entries: items.len(),
            total_size: items.iter().map(|i| i.size).sum(),
            oldest: items.last().map(|i| i.created_at),
            newest: items.first().map(|i| i.created_at),
        }
    }

    /// Number of entries held in memory, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shut the cache down, sweeping expired records.
    pub fn close(self) {
        let removed = self.sweep(Utc::now());
        debug!(removed, remaining = self.entries.len(), "Query cache closed");
    }

    // -- private helpers ---------------------------------------------------

    fn write_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        self.write_locks.entry(key.clone()).or_default().value().clone()
    }

    /// The entry for `key` as the record directory currently has it.
    fn current(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.disk.read(key) {
            Ok(Some(on_disk)) => Some(self.adopt(on_disk)),
            Ok(None) => self.memory_only(key),
            Err(e) => {
                warn!(key = %key.short(), error = %e, "Cache read failed, treating as miss");
                self.memory_only(key)
            }
        }
    }

    /// Refresh memory from a record read off disk.
    fn adopt(&self, on_disk: CacheEntry) -> CacheEntry {
        match self.entries.entry(on_disk.key.clone()) {
            Entry::Occupied(mut slot) => {
                let slot = slot.get_mut();
                // A newer unpersisted store in this process beats an older record.
                if slot.persisted || on_disk.created_at >= slot.entry.created_at {
                    *slot = Slot::persisted(on_disk);
                }
                slot.entry.clone()
            }
            Entry::Vacant(vacant) => vacant.insert(Slot::persisted(on_disk)).entry.clone(),
        }
    }

    /// No usable record: drop a copy whose record was deleted elsewhere and
    /// keep serving one that was never persisted.
    fn memory_only(&self, key: &CacheKey) -> Option<CacheEntry> {
        if self.entries.remove_if(key, |_, slot| slot.persisted).is_some() {
            debug!(key = %key.short(), "Cache record removed externally");
        }
        self.entries.get(key).map(|slot| slot.entry.clone())
    }

    /// Evict `key` only if it is still expired, so a concurrent fresh store
    /// is never thrown away.
    fn evict_expired(&self, key: &CacheKey, now: DateTime<Utc>) -> bool {
        let removed = self
            .entries
            .remove_if(key, |_, slot| slot.entry.is_expired_at(now))
            .is_some();
        if removed {
            if let Err(e) = self.disk_remove_if_expired(key, now) {
                warn!(key = %key.short(), error = %e, "Failed to delete expired cache record");
            }
        }
        removed
    }

    fn disk_remove_if_expired(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<()> {
        match self.disk.read(key) {
            Ok(Some(entry)) if entry.is_expired_at(now) => self.disk.remove(key).map(|_| ()),
            Ok(_) => Ok(()),
            // `read` already dropped the corrupt record.
            Err(CacheError::StorageRead(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn ttl_from_secs(secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(CacheError::Config("cache ttl_secs must be > 0".to_string()));
    }
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| CacheError::Config(format!("cache ttl_secs {} is out of range", secs)))
}

fn payload_size(payload: &serde_json::Value) -> usize {
    serde_json::to_vec(payload).map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::{compute_key, QueryParams};
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    const DAY: u64 = 24 * 60 * 60;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn config(tmp: &TempDir) -> CacheConfig {
        CacheConfig {
            ttl_secs: DAY,
            dir: Some(tmp.path().join("queries")),
        }
    }

    fn open(tmp: &TempDir) -> QueryCache {
        QueryCache::open_at(&config(tmp), at(0)).unwrap()
    }

    fn key(query: &str) -> CacheKey {
        compute_key(&QueryParams::new(query).region("tw")).unwrap()
    }

    #[test]
    fn test_open_empty() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        assert!(cache.is_empty());
        assert_eq!(cache.ttl(), Duration::hours(24));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let tmp = TempDir::new().unwrap();
        let cfg = CacheConfig {
            ttl_secs: 0,
            ..config(&tmp)
        };
        assert!(matches!(
            QueryCache::open_at(&cfg, at(0)),
            Err(CacheError::Config(_))
        ));
    }

    #[test]
    fn test_store_sets_expiry_from_ttl() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        let entry = cache.store(&key("q"), json!(1), at(100)).unwrap();
        assert_eq!(entry.created_at, at(100));
        assert_eq!(entry.expires_at, at(100 + DAY as i64));
    }

    #[test]
    fn test_tw_cyber_finance_scenario() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        let k = compute_key(
            &QueryParams::new("security obligations")
                .region("tw")
                .topic("cyber")
                .industry("finance"),
        )
        .unwrap();
        let payload_a = json!({ "regulations": ["Cyber Security Management Act"] });
        cache.store(&k, payload_a.clone(), at(0)).unwrap();

        let hit = cache.lookup_at(&k, false, at(3600)).unwrap();
        assert_eq!(hit.payload, payload_a);
        assert!(cache.lookup_at(&k, true, at(3600)).is_none());
        assert!(cache.lookup_at(&k, false, at(90_000)).is_none());
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        let k = key("boundary");
        cache.store(&k, json!("v"), at(0)).unwrap();
        assert!(cache.lookup_at(&k, false, at(DAY as i64 - 1)).is_some());
        assert!(cache.lookup_at(&k, false, at(DAY as i64)).is_none());
    }

    #[test]
    fn test_force_refresh_keeps_entry() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        let k = key("forced");
        cache.store(&k, json!("old"), at(0)).unwrap();

        assert!(cache.lookup_at(&k, true, at(10)).is_none());
        let still = cache.lookup_at(&k, false, at(11)).unwrap();
        assert_eq!(still.payload, json!("old"));
    }

    #[test]
    fn test_overwrite_replaces_entry() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        let k = key("replace");
        cache.store(&k, json!("first"), at(0)).unwrap();
        cache.store(&k, json!("second"), at(50)).unwrap();

        let hit = cache.lookup_at(&k, false, at(60)).unwrap();
        assert_eq!(hit.payload, json!("second"));
        assert_eq!(hit.created_at, at(50));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_store_revives_nothing_but_creates_fresh_entry() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        let k = key("revive");
        cache.store(&k, json!("v1"), at(0)).unwrap();
        assert!(cache.lookup_at(&k, false, at(DAY as i64 + 5)).is_none());

        let fresh = cache.store(&k, json!("v2"), at(DAY as i64 + 10)).unwrap();
        assert_eq!(fresh.expires_at, at(2 * DAY as i64 + 10));
        assert_eq!(
            cache.lookup_at(&k, false, at(DAY as i64 + 20)).unwrap().payload,
            json!("v2")
        );
    }

    #[test]
    fn test_store_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        let k = key("same");
        let first = cache.store(&k, json!({"a": 1}), at(5)).unwrap();
        let second = cache.store(&k, json!({"a": 1}), at(5)).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.list(at(6)).len(), 1);

        let reopened = QueryCache::open_at(&config(&tmp), at(6)).unwrap();
        assert_eq!(reopened.lookup_at(&k, false, at(6)), Some(first));
    }

    #[test]
    fn test_survives_restart() {
        let tmp = TempDir::new().unwrap();
        let k = key("durable");
        {
            let cache = open(&tmp);
            cache.store(&k, json!({"ok": true}), at(0)).unwrap();
        }
        let cache = QueryCache::open_at(&config(&tmp), at(100)).unwrap();
        let hit = cache.lookup_at(&k, false, at(100)).unwrap();
        assert_eq!(hit.payload, json!({"ok": true}));
    }

    #[test]
    fn test_corrupt_file_opens_empty() {
        let tmp = TempDir::new().unwrap();
        let k = key("corrupt");
        let dir = tmp.path().join("queries");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{}.json", k)), b"\x00\x01not json").unwrap();

        let cache = open(&tmp);
        assert!(cache.is_empty());
        assert!(cache.lookup_at(&k, false, at(1)).is_none());
    }

    #[test]
    fn test_lookup_reads_records_written_by_other_process() {
        let tmp = TempDir::new().unwrap();
        let reader = open(&tmp);
        let writer = open(&tmp);
        let k = key("shared");
        writer.store(&k, json!("from writer"), at(0)).unwrap();

        let hit = reader.lookup_at(&k, false, at(1)).unwrap();
        assert_eq!(hit.payload, json!("from writer"));
    }

    #[test]
    fn test_deletes_and_overwrites_by_other_process_are_seen() {
        let tmp = TempDir::new().unwrap();
        let server = open(&tmp);
        let cli = open(&tmp);
        let k = key("shared record");
        server.store(&k, json!("stale"), at(0)).unwrap();
        assert_eq!(server.lookup_at(&k, false, at(10)).unwrap().payload, json!("stale"));

        assert!(cli.invalidate(&k).unwrap());
        assert!(server.lookup_at(&k, false, at(20)).is_none());
        assert!(server.is_empty());

        server.store(&k, json!("stale"), at(30)).unwrap();
        cli.store(&k, json!("fresh"), at(40)).unwrap();
        let hit = server.lookup_at(&k, false, at(50)).unwrap();
        assert_eq!(hit.payload, json!("fresh"));
        assert_eq!(server.list(at(50))[0].created_at, at(40));
    }

    #[test]
    fn test_failed_store_removes_superseded_record() {
        let tmp = TempDir::new().unwrap();
        let k = key("superseded");
        {
            let cache = open(&tmp);
            cache.store(&k, json!("old"), at(0)).unwrap();
            cache.disk.set_fail_writes(true);
            let err = cache.store(&k, json!("new"), at(10)).unwrap_err();
            assert!(matches!(err, CacheError::StorageWrite(_)));
            assert_eq!(cache.lookup_at(&k, false, at(20)).unwrap().payload, json!("new"));
        }
        let reopened = QueryCache::open_at(&config(&tmp), at(30)).unwrap();
        assert!(reopened.lookup_at(&k, false, at(30)).is_none());
    }

    #[test]
    fn test_racing_stores_on_one_key_leave_memory_and_disk_in_agreement() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(open(&tmp));
        let k = key("contended");
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                let k = k.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        cache.store(&k, json!([t, i]), at(0)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let in_memory = cache.entries.get(&k).unwrap().entry.clone();
        assert_eq!(cache.disk.read(&k).unwrap(), Some(in_memory));
    }

    #[test]
    fn test_lookup_evicts_expired_entry() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        let k = key("evict");
        cache.store(&k, json!("v"), at(0)).unwrap();
        assert!(cache.lookup_at(&k, false, at(DAY as i64 + 1)).is_none());
        assert!(cache.is_empty());
        assert!(!tmp.path().join("queries").join(format!("{}.json", k)).exists());
    }

    #[test]
    fn test_invalidate() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        let k = key("stale source");
        cache.store(&k, json!("v"), at(0)).unwrap();
        assert!(cache.invalidate(&k).unwrap());
        assert!(cache.lookup_at(&k, false, at(1)).is_none());
        assert!(!cache.invalidate(&k).unwrap());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        cache.store(&key("old"), json!(1), at(0)).unwrap();
        cache.store(&key("new"), json!(2), at(DAY as i64)).unwrap();

        assert_eq!(cache.sweep(at(DAY as i64 + 1)), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup_at(&key("new"), false, at(DAY as i64 + 1)).is_some());
        assert_eq!(cache.sweep(at(DAY as i64 + 1)), 0);
    }

    #[test]
    fn test_clear() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        cache.store(&key("a"), json!(1), at(0)).unwrap();
        cache.store(&key("b"), json!(2), at(0)).unwrap();
        cache.store(&key("c"), json!(3), at(0)).unwrap();

        assert_eq!(cache.clear().unwrap(), 3);
        assert!(cache.is_empty());
        let reopened = open(&tmp);
        assert!(reopened.is_empty());
    }

    #[test]
    fn test_list_newest_first_and_stats() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        cache
            .store_described(&key("older"), Some("tw | older".into()), json!("x".repeat(100)), at(0))
            .unwrap();
        cache
            .store_described(&key("newer"), Some("tw | newer".into()), json!("y".repeat(200)), at(600))
            .unwrap();

        let items = cache.list(at(1200));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].description.as_deref(), Some("tw | newer"));
        assert_eq!(items[0].age_minutes, 10);
        assert_eq!(items[1].age_minutes, 20);
        assert!(items[1].size > 100);

        let stats = cache.stats(at(1200));
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_size, items[0].size + items[1].size);
        assert_eq!(stats.newest, Some(at(600)));
        assert_eq!(stats.oldest, Some(at(0)));
    }

    #[test]
    fn test_stats_empty() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp);
        assert_eq!(cache.stats(at(0)), CacheStats::default());
    }

    #[test]
    fn test_write_failure_still_serves_from_memory() {
        let tmp = TempDir::new().unwrap();
        // A regular file where the cache directory should be.
        let blocker = tmp.path().join("queries");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let cache = open(&tmp);
        let k = key("unwritable");
        let err = cache.store(&k, json!("payload"), at(0)).unwrap_err();
        assert!(matches!(err, CacheError::StorageWrite(_)));
        assert_eq!(
            cache.lookup_at(&k, false, at(1)).unwrap().payload,
            json!("payload")
        );
    }

    #[test]
    fn test_concurrent_stores_on_distinct_keys() {
        let tmp = TempDir::new().unwrap();
        let cache = std::sync::Arc::new(open(&tmp));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let k = key(&format!("query {i}"));
                    cache.store(&k, json!(i), at(0)).unwrap();
                    cache.lookup_at(&k, false, at(1)).unwrap().payload
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), json!(i));
        }
        assert_eq!(cache.len(), 8);
    }
}
