//! Generation cache.
//!
//! Stored entries live in a sharded map so lookups and stats never wait on a
//! running generation. Misses go through a per-key pending table: the first
//! caller for a key spawns the computation, later callers subscribe to its
//! outcome. The computation runs in its own task, so a caller that goes away
//! does not cancel it.

mod disk;

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{CacheConfig, ClearPolicy};
use crate::error::{Error, Result};
use crate::key::CacheKey;

/// Synthesized audio for one key. Never mutated once created.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Complete WAV container
    pub audio_bytes: Vec<u8>,
    pub sample_rate: u32,
    /// PCM frames in `audio_bytes`
    pub sample_count: u64,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl CacheEntry {
    pub fn new(key: CacheKey, audio_bytes: Vec<u8>, sample_rate: u32, sample_count: u64) -> Self {
        Self {
            key,
            size_bytes: audio_bytes.len() as u64,
            audio_bytes,
            sample_rate,
            sample_count,
            created_at: Utc::now(),
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.sample_count as f64 / self.sample_rate as f64
    }
}

/// How a `get_or_compute` call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lookup {
    /// Served from a stored entry
    Hit,
    /// This call started the computation
    Computed,
    /// Joined a computation another caller started
    Joined,
}

impl Lookup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lookup::Hit => "hit",
            Lookup::Computed => "miss",
            Lookup::Joined => "joined",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entry_count: usize,
    pub total_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub coalesced_count: u64,
    pub in_flight: usize,
    pub evicted_count: u64,
    pub persist_failures: u64,
    pub max_bytes: u64,
    pub clear_policy: ClearPolicy,
    pub cache_dir: Option<String>,
}

struct Slot {
    entry: Arc<CacheEntry>,
    last_access: AtomicU64,
}

/// `None` until the computation finishes.
type Outcome = Option<Result<Arc<CacheEntry>>>;

pub struct GenerationCache {
    config: CacheConfig,
    entries: DashMap<CacheKey, Slot>,
    pending: DashMap<CacheKey, watch::Receiver<Outcome>>,
    // Clear epoch. Stores hold the read side while checking it and inserting.
    store_gate: RwLock<u64>,
    evict_lock: Mutex<()>,
    clock: AtomicU64,
    entry_count: AtomicUsize,
    total_bytes: AtomicU64,
    in_flight: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    persist_failures: AtomicU64,
}

impl GenerationCache {
    /// Create an empty cache. Does not touch `config.dir`; use
    /// [`GenerationCache::open`] to create the directory and load its files.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            pending: DashMap::new(),
            store_gate: RwLock::new(0),
            evict_lock: Mutex::new(()),
            clock: AtomicU64::new(0),
            entry_count: AtomicUsize::new(0),
            total_bytes: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
        }
    }

    /// Create the cache and, when a directory is configured, load every entry
    /// file already in it. Existing files are trusted as-is.
    pub async fn open(config: CacheConfig) -> Result<Arc<Self>> {
        let cache = Arc::new(Self::new(config));

        if let (true, Some(dir)) = (cache.config.enabled, cache.config.dir.clone()) {
            let loaded = disk::scan(&dir, cache.config.default_sample_rate).await?;
            let count = loaded.len();
            for entry in loaded {
                if entry.size_bytes > cache.config.max_bytes {
                    warn!(
                        key = %entry.key,
                        "Cached file of {} bytes exceeds capacity, removing",
                        entry.size_bytes
                    );
                    cache.remove_files(&[entry.key]).await;
                    continue;
                }
                let evicted = cache.insert(Arc::new(entry));
                cache.remove_files(&evicted).await;
            }
            info!(
                "Voice cache opened at {} ({} files, {} entries kept, {} bytes)",
                dir.display(),
                count,
                cache.entry_count.load(Ordering::Relaxed),
                cache.total_bytes.load(Ordering::Relaxed)
            );
        }

        Ok(cache)
    }

    /// Look up a stored entry. Never waits on an in-flight computation.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        match self.lookup(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the stored entry for `key`, or run `compute` to produce it.
    ///
    /// At most one `compute` runs per key at a time. Concurrent callers for
    /// the same key share its outcome, success or error. A failed computation
    /// leaves nothing behind, so the next call retries.
    pub async fn get_or_compute<F>(
        self: &Arc<Self>,
        key: CacheKey,
        compute: F,
    ) -> Result<(Arc<CacheEntry>, Lookup)>
    where
        F: Future<Output = Result<CacheEntry>> + Send + 'static,
    {
        if let Some(entry) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(%key, "Cache HIT");
            return Ok((entry, Lookup::Hit));
        }

        let (mut outcome_rx, lookup) = match self.pending.entry(key) {
            Entry::Occupied(slot) => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "Joining in-flight generation");
                (slot.get().clone(), Lookup::Joined)
            }
            Entry::Vacant(slot) => {
                // The previous computation may have stored its entry between
                // the lookup above and taking the slot.
                if let Some(entry) = self.lookup(&key) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok((entry, Lookup::Hit));
                }

                let (outcome_tx, outcome_rx) = watch::channel(None);
                slot.insert(outcome_rx.clone());
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.in_flight.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "Cache MISS - starting generation");

                let epoch = self.epoch();
                tokio::spawn(Arc::clone(self).drive(key, epoch, compute, outcome_tx));
                (outcome_rx, Lookup::Computed)
            }
        };

        let outcome = outcome_rx
            .wait_for(Option::is_some)
            .await
            .map(|done| (*done).clone());

        match outcome {
            Ok(Some(Ok(entry))) => Ok((entry, lookup)),
            Ok(Some(Err(err))) => Err(err),
            _ => Err(Error::GenerationFailed(
                "generation ended without a result".to_string(),
            )),
        }
    }

    /// Remove every stored entry and return how many were removed.
    ///
    /// In-flight computations keep running; whether their results are stored
    /// afterwards follows the configured [`ClearPolicy`].
    pub async fn clear(&self) -> usize {
        let removed: Vec<CacheKey> = {
            let mut epoch = self.store_gate.write().unwrap_or_else(PoisonError::into_inner);
            *epoch += 1;
            let keys: Vec<CacheKey> = self.entries.iter().map(|slot| *slot.key()).collect();
            keys.into_iter().filter(|key| self.remove_slot(key)).collect()
        };

        self.remove_files(&removed).await;

        // Files the memory tier never held, e.g. ones skipped at open.
        if let Some(dir) = &self.config.dir {
            let in_use = |key: &CacheKey| self.pending.contains_key(key) || self.contains(key);
            match disk::sweep(dir, in_use).await {
                Ok(0) => {}
                Ok(swept) => info!("Removed {swept} untracked files from {}", dir.display()),
                Err(err) => {
                    self.persist_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Could not sweep cache directory: {err}");
                }
            }
        }

        info!("Voice cache cleared ({} entries)", removed.len());
        removed.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.config.enabled,
            entry_count: self.entry_count.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            coalesced_count: self.coalesced.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            evicted_count: self.evictions.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            max_bytes: self.config.max_bytes,
            clear_policy: self.config.clear_policy,
            cache_dir: self.config.dir.as_ref().map(|d| d.display().to_string()),
        }
    }

    /// Runs one computation to completion, independent of its callers.
    async fn drive<F>(
        self: Arc<Self>,
        key: CacheKey,
        epoch: u64,
        compute: F,
        outcome_tx: watch::Sender<Outcome>,
    ) where
        F: Future<Output = Result<CacheEntry>> + Send + 'static,
    {
        let pending = PendingSlot { cache: &*self, key };

        // Own task so a panic surfaces as a JoinError instead of unwinding here.
        let outcome = match tokio::spawn(compute).await {
            Ok(Ok(entry)) if entry.key != key => {
                error!(%key, other = %entry.key, "Generation returned audio for another key");
                Err(Error::GenerationFailed(format!(
                    "generation for {key} produced an entry for {}",
                    entry.key
                )))
            }
            Ok(Ok(entry)) => {
                let entry = Arc::new(entry);
                self.store(Arc::clone(&entry), epoch).await;
                Ok(entry)
            }
            Ok(Err(err)) => {
                warn!(%key, "Generation failed: {err}");
                Err(err)
            }
            Err(join_err) => {
                error!(%key, "Generation task aborted: {join_err}");
                Err(Error::GenerationFailed(format!(
                    "generation task aborted: {join_err}"
                )))
            }
        };

        // Free the key before publishing, so nobody can join a finished run.
        drop(pending);
        outcome_tx.send_replace(Some(outcome));
    }

    async fn store(&self, entry: Arc<CacheEntry>, epoch: u64) {
        if !self.config.enabled {
            return;
        }
        if entry.size_bytes > self.config.max_bytes {
            warn!(
                key = %entry.key,
                "Entry of {} bytes exceeds cache capacity of {} bytes, not stored",
                entry.size_bytes,
                self.config.max_bytes
            );
            return;
        }

        let persisted = match &self.config.dir {
            Some(dir) => match disk::write_entry(dir, &entry).await {
                Ok(()) => true,
                Err(err) => {
                    self.persist_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %entry.key, "Cache persistence failed: {err}");
                    false
                }
            },
            None => false,
        };

        let evicted = {
            let current = self.store_gate.read().unwrap_or_else(PoisonError::into_inner);
            if self.config.clear_policy == ClearPolicy::Discard && *current != epoch {
                None
            } else {
                Some(self.insert(Arc::clone(&entry)))
            }
        };

        match evicted {
            Some(evicted) => self.remove_files(&evicted).await,
            None => {
                info!(key = %entry.key, "Discarding generation that finished after a clear");
                if persisted {
                    self.remove_files(&[entry.key]).await;
                }
            }
        }
    }

    /// Insert or replace, then evict down to capacity. Returns evicted keys.
    fn insert(&self, entry: Arc<CacheEntry>) -> Vec<CacheKey> {
        let key = entry.key;
        let size = entry.size_bytes;
        let slot = Slot {
            entry,
            last_access: AtomicU64::new(self.tick()),
        };

        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        match self.entries.insert(key, slot) {
            Some(old) => {
                self.total_bytes
                    .fetch_sub(old.entry.size_bytes, Ordering::Relaxed);
            }
            None => {
                self.entry_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.evict_over_capacity(&key)
    }

    /// Evict least-recently-used entries until the total fits. `keep` is the
    /// entry just inserted and is never chosen.
    fn evict_over_capacity(&self, keep: &CacheKey) -> Vec<CacheKey> {
        let _guard = self.evict_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut evicted = Vec::new();

        while self.total_bytes.load(Ordering::Relaxed) > self.config.max_bytes {
            let victim = self
                .entries
                .iter()
                .filter(|slot| slot.key() != keep)
                .min_by_key(|slot| slot.last_access.load(Ordering::Relaxed))
                .map(|slot| *slot.key());

            let Some(victim) = victim else { break };
            if self.remove_slot(&victim) {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %victim, "Evicted cache entry");
                evicted.push(victim);
            }
        }
        evicted
    }

    fn remove_slot(&self, key: &CacheKey) -> bool {
        match self.entries.remove(key) {
            Some((_, slot)) => {
                self.total_bytes
                    .fetch_sub(slot.entry.size_bytes, Ordering::Relaxed);
                self.entry_count.fetch_sub(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    async fn remove_files(&self, keys: &[CacheKey]) {
        let Some(dir) = &self.config.dir else { return };
        for key in keys {
            if let Err(err) = disk::remove_entry(dir, key).await {
                self.persist_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%key, "Could not remove cache file: {err}");
            }
        }
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.entries.get(key).map(|slot| {
            slot.last_access.store(self.tick(), Ordering::Relaxed);
            Arc::clone(&slot.entry)
        })
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn epoch(&self) -> u64 {
        *self.store_gate.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases a key's pending slot when its computation ends, however it ends.
struct PendingSlot<'a> {
    cache: &'a GenerationCache,
    key: CacheKey,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.cache.pending.remove(&self.key);
        self.cache.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
