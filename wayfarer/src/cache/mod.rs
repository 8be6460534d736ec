//! Bounded key/value cache with per-entry expiry.
//!
//! [`BoundedCache`] stores opaque payload bytes under string keys, each with
//! a time-to-live, inside a global byte-size ceiling. When an insert pushes
//! the resident total over the ceiling, entries are evicted in ascending
//! order of expiry - the soonest-to-expire go first, even if not yet
//! expired. This is a deliberate eviction-by-expiry policy, not LRU by
//! access: the entries closest to death are the cheapest to lose.
//!
//! # Durability
//!
//! The cache is disk-backed. Payloads live in a flat `entries/` directory
//! under names derived from the SHA-256 of the key; a JSON manifest maps
//! keys to `{created_at, expires_at, size_bytes, file}` records. Every
//! `put` writes the new payload under a fresh file name and then atomically
//! replaces the manifest, so manifest and payload commit together or the
//! logical store is unchanged. Files not referenced by the manifest are
//! swept on open.
//!
//! # Misses
//!
//! A miss is a value (`None`), never an error. A `get` on an expired entry
//! evicts it lazily and reports a miss.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::{load_json, save_json, StorageError};

/// Manifest file name within the cache directory.
const MANIFEST_FILE: &str = "manifest.json";

/// Subdirectory holding payload files.
const ENTRIES_DIR: &str = "entries";

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Local persistence failed; the operation did not take effect.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A zero TTL would create an entry already expired at birth.
    #[error("ttl must be greater than zero")]
    InvalidTtl,
}

/// Manifest record for one cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    size_bytes: u64,
    file: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    entries: HashMap<String, ManifestEntry>,
}

struct CacheState {
    manifest: Manifest,
    total_bytes: u64,
    /// Monotonic suffix so a replaced payload gets a fresh file name.
    seq: u64,
}

/// Counters for cache observability.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size_bytes: u64,
    pub entry_count: usize,
}

/// Disk-backed bounded cache.
pub struct BoundedCache {
    dir: PathBuf,
    max_size_bytes: u64,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl BoundedCache {
    /// Opens (or creates) a cache rooted at `dir` with the given byte ceiling.
    ///
    /// Rebuilds the in-memory index from the manifest, drops records whose
    /// payload file has gone missing, sweeps orphan payload files, and
    /// evicts down to the ceiling if a config change shrank it.
    pub fn open(dir: impl Into<PathBuf>, max_size_bytes: u64) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(ENTRIES_DIR)).map_err(StorageError::Io)?;

        let mut manifest: Manifest =
            load_json(&dir.join(MANIFEST_FILE))?.unwrap_or_default();

        // Drop records whose payload vanished
        manifest
            .entries
            .retain(|key, entry| {
                let present = dir.join(ENTRIES_DIR).join(&entry.file).exists();
                if !present {
                    warn!(key = %key, "dropping manifest record with missing payload");
                }
                present
            });

        let total_bytes = manifest.entries.values().map(|e| e.size_bytes).sum();
        let seq = manifest
            .entries
            .values()
            .filter_map(|e| file_seq(&e.file))
            .max()
            .map(|s| s + 1)
            .unwrap_or(0);

        let cache = Self {
            dir,
            max_size_bytes,
            state: Mutex::new(CacheState {
                manifest,
                total_bytes,
                seq,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        };

        cache.sweep_orphans();
        cache.shrink_to_budget()?;

        Ok(cache)
    }

    /// Stores `payload` under `key` with the given time-to-live.
    ///
    /// Replaces any existing entry for the key. If the resident total then
    /// exceeds the ceiling, entries are evicted soonest-expiry-first until
    /// the cache is back under budget.
    pub fn put(&self, key: &str, payload: &[u8], ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl);
        }

        let mut state = self.state.lock();

        let file = format!("{}-{}.bin", key_hash(key), state.seq);
        state.seq += 1;

        let payload_path = self.dir.join(ENTRIES_DIR).join(&file);
        crate::storage::atomic_write(&payload_path, payload)?;

        let now = Utc::now();
        let entry = ManifestEntry {
            created_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            size_bytes: payload.len() as u64,
            file,
        };

        let previous = state.manifest.entries.insert(key.to_string(), entry);
        state.total_bytes += payload.len() as u64;
        if let Some(ref old) = previous {
            state.total_bytes -= old.size_bytes;
        }

        // Evict soonest-to-expire entries until back under budget
        let mut evicted = Vec::new();
        while state.total_bytes > self.max_size_bytes {
            let victim = state
                .manifest
                .entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            match victim {
                Some(victim_key) => {
                    if let Some(old) = state.manifest.entries.remove(&victim_key) {
                        state.total_bytes -= old.size_bytes;
                        evicted.push((victim_key, old));
                    }
                }
                None => break,
            }
        }

        // Commit point: the manifest replace makes the whole put visible
        if let Err(e) = self.save_manifest(&state) {
            // Roll back to the pre-put state; the new payload file is removed
            // and the old manifest on disk still describes the old entries.
            let new_entry = state.manifest.entries.remove(key);
            if let Some(entry) = new_entry {
                state.total_bytes -= entry.size_bytes;
                let _ = fs::remove_file(self.dir.join(ENTRIES_DIR).join(&entry.file));
            }
            if let Some(old) = previous {
                state.total_bytes += old.size_bytes;
                state.manifest.entries.insert(key.to_string(), old);
            }
            for (k, entry) in evicted {
                state.total_bytes += entry.size_bytes;
                state.manifest.entries.insert(k, entry);
            }
            return Err(e.into());
        }

        // Only now is it safe to drop payloads no longer referenced
        if let Some(old) = previous {
            let _ = fs::remove_file(self.dir.join(ENTRIES_DIR).join(&old.file));
        }
        for (victim_key, entry) in &evicted {
            debug!(key = %victim_key, expires_at = %entry.expires_at, "evicted under size pressure");
            let _ = fs::remove_file(self.dir.join(ENTRIES_DIR).join(&entry.file));
        }
        self.evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);

        Ok(())
    }

    /// Retrieves the payload for `key`.
    ///
    /// Returns `None` on a miss. An expired entry is evicted lazily and
    /// reported as a miss.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut state = self.state.lock();

        let entry = match state.manifest.entries.get(key) {
            Some(entry) => entry.clone(),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        if entry.expires_at <= Utc::now() {
            debug!(key = %key, "lazy-evicting expired entry");
            self.remove_locked(&mut state, key)?;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        match fs::read(self.dir.join(ENTRIES_DIR).join(&entry.file)) {
            Ok(payload) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(payload))
            }
            Err(e) => {
                // Payload vanished out from under the manifest; treat as miss
                warn!(key = %key, error = %e, "payload unreadable, dropping entry");
                self.remove_locked(&mut state, key)?;
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Removes the entry for `key`. Returns whether an entry existed.
    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut state = self.state.lock();
        if !state.manifest.entries.contains_key(key) {
            return Ok(false);
        }
        self.remove_locked(&mut state, key)?;
        Ok(true)
    }

    /// Removes every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let expired: Vec<String> = state
            .manifest
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }

        let mut removed = Vec::new();
        for key in &expired {
            if let Some(entry) = state.manifest.entries.remove(key) {
                state.total_bytes -= entry.size_bytes;
                removed.push(entry);
            }
        }
        self.save_manifest(&state)?;
        for entry in &removed {
            let _ = fs::remove_file(self.dir.join(ENTRIES_DIR).join(&entry.file));
        }

        debug!(count = removed.len(), "purged expired entries");
        Ok(removed.len())
    }

    /// Current resident payload bytes.
    pub fn size_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    /// Current number of entries.
    pub fn entry_count(&self) -> usize {
        self.state.lock().manifest.entries.len()
    }

    /// Configured byte ceiling.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Snapshot of cache counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size_bytes: state.total_bytes,
            entry_count: state.manifest.entries.len(),
        }
    }

    fn remove_locked(&self, state: &mut CacheState, key: &str) -> Result<(), CacheError> {
        if let Some(entry) = state.manifest.entries.remove(key) {
            state.total_bytes -= entry.size_bytes;
            self.save_manifest(state)?;
            let _ = fs::remove_file(self.dir.join(ENTRIES_DIR).join(&entry.file));
        }
        Ok(())
    }

    fn save_manifest(&self, state: &CacheState) -> Result<(), StorageError> {
        save_json(&self.dir.join(MANIFEST_FILE), &state.manifest)
    }

    /// Evict down to the ceiling (used on open when the budget shrank).
    fn shrink_to_budget(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        if state.total_bytes <= self.max_size_bytes {
            return Ok(());
        }

        let mut removed = Vec::new();
        while state.total_bytes > self.max_size_bytes {
            let victim = state
                .manifest
                .entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    if let Some(entry) = state.manifest.entries.remove(&key) {
                        state.total_bytes -= entry.size_bytes;
                        removed.push(entry);
                    }
                }
                None => break,
            }
        }

        self.save_manifest(&state)?;
        for entry in &removed {
            let _ = fs::remove_file(self.dir.join(ENTRIES_DIR).join(&entry.file));
        }
        self.evictions
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Delete payload files the manifest no longer references.
    fn sweep_orphans(&self) {
        let state = self.state.lock();
        let referenced: std::collections::HashSet<&str> = state
            .manifest
            .entries
            .values()
            .map(|e| e.file.as_str())
            .collect();

        let entries_dir = self.dir.join(ENTRIES_DIR);
        let Ok(dir) = fs::read_dir(&entries_dir) else {
            return;
        };
        for item in dir.flatten() {
            let name = item.file_name();
            let Some(name) = name.to_str() else { continue };
            if !referenced.contains(name) {
                debug!(file = %name, "sweeping orphan payload file");
                let _ = fs::remove_file(entries_dir.join(name));
            }
        }
    }
}

fn key_hash(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    // 16 bytes of the digest is plenty for uniqueness and keeps names short
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

fn file_seq(file: &str) -> Option<u64> {
    file.strip_suffix(".bin")?.rsplit('-').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_cache(dir: &Path, max: u64) -> BoundedCache {
        BoundedCache::open(dir, max).unwrap()
    }

    #[test]
    fn test_put_then_get_before_expiry() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024);

        cache
            .put("routes/home", b"payload", Duration::from_secs(60))
            .unwrap();

        assert_eq!(
            cache.get("routes/home").unwrap(),
            Some(b"payload".to_vec())
        );
    }

    #[test]
    fn test_miss_is_none_not_error() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024);
        assert_eq!(cache.get("absent").unwrap(), None);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024);
        assert!(matches!(
            cache.put("k", b"v", Duration::ZERO),
            Err(CacheError::InvalidTtl)
        ));
    }

    #[test]
    fn test_replace_updates_payload_and_size() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024);

        cache.put("k", &[0u8; 100], Duration::from_secs(60)).unwrap();
        cache.put("k", &[1u8; 40], Duration::from_secs(60)).unwrap();

        assert_eq!(cache.get("k").unwrap(), Some(vec![1u8; 40]));
        assert_eq!(cache.size_bytes(), 40);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_size_stays_under_ceiling_after_each_put() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path(), 250);

        for i in 0..10 {
            cache
                .put(&format!("k{}", i), &[0u8; 100], Duration::from_secs(60 + i))
                .unwrap();
            assert!(
                cache.size_bytes() <= 250,
                "resident size {} exceeds ceiling after put {}",
                cache.size_bytes(),
                i
            );
        }
    }

    #[test]
    fn test_eviction_removes_soonest_expiring_first() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path(), 250);

        // "soon" expires first and should be the eviction victim even
        // though "late" was inserted earlier
        cache.put("late", &[0u8; 100], Duration::from_secs(600)).unwrap();
        cache.put("soon", &[0u8; 100], Duration::from_secs(30)).unwrap();
        cache.put("mid", &[0u8; 100], Duration::from_secs(300)).unwrap();

        assert_eq!(cache.get("soon").unwrap(), None, "soonest-expiry evicted");
        assert!(cache.get("late").unwrap().is_some());
        assert!(cache.get("mid").unwrap().is_some());
    }

    #[test]
    fn test_expired_entry_is_lazy_evicted_on_get() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024);

        cache.put("k", b"v", Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.get("k").unwrap(), None);
        assert_eq!(cache.entry_count(), 0, "expired entry evicted on access");
    }

    #[test]
    fn test_purge_expired_counts_removals() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024);

        cache.put("a", b"1", Duration::from_millis(10)).unwrap();
        cache.put("b", b"2", Duration::from_millis(10)).unwrap();
        cache.put("c", b"3", Duration::from_secs(600)).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.purge_expired().unwrap(), 2);
        assert_eq!(cache.entry_count(), 1);
        assert!(cache.get("c").unwrap().is_some());
    }

    #[test]
    fn test_remove_reports_existence() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024);

        cache.put("k", b"v", Duration::from_secs(60)).unwrap();
        assert!(cache.remove("k").unwrap());
        assert!(!cache.remove("k").unwrap());
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();

        {
            let cache = open_cache(dir.path(), 1024);
            cache.put("k", b"durable", Duration::from_secs(600)).unwrap();
        }

        let reopened = open_cache(dir.path(), 1024);
        assert_eq!(reopened.get("k").unwrap(), Some(b"durable".to_vec()));
        assert_eq!(reopened.size_bytes(), 7);
    }

    #[test]
    fn test_reopen_with_smaller_budget_evicts() {
        let dir = tempdir().unwrap();

        {
            let cache = open_cache(dir.path(), 1024);
            cache.put("a", &[0u8; 100], Duration::from_secs(60)).unwrap();
            cache.put("b", &[0u8; 100], Duration::from_secs(600)).unwrap();
        }

        let reopened = open_cache(dir.path(), 150);
        assert!(reopened.size_bytes() <= 150);
        assert_eq!(reopened.get("a").unwrap(), None, "soonest expiry evicted");
        assert!(reopened.get("b").unwrap().is_some());
    }

    #[test]
    fn test_missing_payload_file_treated_as_miss() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024);
        cache.put("k", b"v", Duration::from_secs(60)).unwrap();

        // Nuke the payload out from under the manifest
        for item in fs::read_dir(dir.path().join(ENTRIES_DIR)).unwrap().flatten() {
            fs::remove_file(item.path()).unwrap();
        }

        assert_eq!(cache.get("k").unwrap(), None);
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let dir = tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024);

        cache.put("k", b"v", Duration::from_secs(60)).unwrap();
        cache.get("k").unwrap();
        cache.get("k").unwrap();
        cache.get("absent").unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }
}
