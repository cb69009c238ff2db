//! Concurrent subject-to-encoder cache.
//!
//! The cache maps registry subjects to compiled encoders and governs their
//! lifetime with two thresholds: entries unused past the purge threshold
//! are evicted, entries older than the refresh threshold are re-fetched in
//! the background while still serving traffic. Hit-path reads take only
//! the read lock; all registry fetches, first-time and refresh alike, are
//! serialized through a single fetch lock so at most one request is in
//! flight at any instant.

use crate::schema::compiled::{CompiledSchema, JsonMode};
use crate::schema::registry::RegistryClient;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Unix-seconds time source, swappable for tests.
pub trait Clock: Send + Sync {
    fn unix_now(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

struct CachedEncoder {
    encoder: Arc<CompiledSchema>,
    id: u32,
    last_used: AtomicI64,
    last_updated: AtomicI64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    fetches: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    purges: AtomicU64,
}

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub fetches: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub purges: u64,
}

pub struct SchemaCache {
    entries: RwLock<HashMap<String, CachedEncoder>>,
    /// Serializes every registry fetch across all subjects. Deliberately
    /// coarse: at most one in-flight registry request, no duplicate work,
    /// no partially constructed entries.
    fetch_lock: Mutex<()>,
    registry: RegistryClient,
    mode: JsonMode,
    refresh_after_secs: i64,
    purge_after_secs: i64,
    clock: Arc<dyn Clock>,
    counters: CacheCounters,
}

impl SchemaCache {
    pub fn new(
        registry: RegistryClient,
        mode: JsonMode,
        refresh_after: Duration,
        purge_after: Duration,
    ) -> Self {
        Self::with_clock(registry, mode, refresh_after, purge_after, Arc::new(SystemClock))
    }

    pub fn with_clock(
        registry: RegistryClient,
        mode: JsonMode,
        refresh_after: Duration,
        purge_after: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fetch_lock: Mutex::new(()),
            registry,
            mode,
            refresh_after_secs: refresh_after.as_secs().max(1) as i64,
            purge_after_secs: purge_after.as_secs().max(1) as i64,
            clock,
            counters: CacheCounters::default(),
        }
    }

    /// Returns the encoder and schema ID for a subject, fetching and
    /// compiling the latest schema version on first use.
    ///
    /// Concurrent first-time callers for the same subject are collapsed
    /// into one registry request: whoever wins the fetch lock performs the
    /// fetch, everyone queued behind it finds the fresh entry on re-check.
    pub async fn resolve(&self, subject: &str) -> crate::Result<(Arc<CompiledSchema>, u32)> {
        if let Some(found) = self.lookup(subject) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(found);
        }

        let _fetch = self.fetch_lock.lock().await;

        // Another caller may have completed the fetch while we waited.
        if let Some(found) = self.lookup(subject) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(found);
        }

        let (encoder, id) = self.fetch_and_compile(subject).await?;
        let now = self.clock.unix_now();
        self.entries.write().insert(
            subject.to_string(),
            CachedEncoder {
                encoder: encoder.clone(),
                id,
                last_used: AtomicI64::new(now),
                last_updated: AtomicI64::new(now),
            },
        );
        debug!(subject, id, "cached new schema encoder");
        Ok((encoder, id))
    }

    fn lookup(&self, subject: &str) -> Option<(Arc<CompiledSchema>, u32)> {
        let entries = self.entries.read();
        entries.get(subject).map(|entry| {
            entry
                .last_used
                .store(self.clock.unix_now(), Ordering::Relaxed);
            (entry.encoder.clone(), entry.id)
        })
    }

    async fn fetch_and_compile(
        &self,
        subject: &str,
    ) -> crate::Result<(Arc<CompiledSchema>, u32)> {
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let fetched = self.registry.fetch_latest(subject).await?;
        let compiled = CompiledSchema::compile(&fetched.schema, self.mode)?;
        Ok((Arc::new(compiled), fetched.id))
    }

    /// One pass of the background refresher: evict entries idle past the
    /// purge threshold, re-fetch entries stale past the refresh threshold.
    /// A failed refresh keeps the previous schema in service; staleness is
    /// never fatal, only delayed.
    pub async fn refresh_tick(&self) {
        let now = self.clock.unix_now();
        let purge_cutoff = now - self.purge_after_secs;
        let refresh_cutoff = now - self.refresh_after_secs;

        let (purge_targets, refresh_targets) = {
            let entries = self.entries.read();
            let mut purge = Vec::new();
            let mut refresh = Vec::new();
            for (subject, entry) in entries.iter() {
                if entry.last_used.load(Ordering::Relaxed) < purge_cutoff {
                    purge.push(subject.clone());
                } else if entry.last_updated.load(Ordering::Relaxed) < refresh_cutoff {
                    refresh.push(subject.clone());
                }
            }
            (purge, refresh)
        };

        if !purge_targets.is_empty() {
            let mut entries = self.entries.write();
            for subject in purge_targets {
                // last_used may have advanced between scan and lock
                // acquisition; only delete if still idle.
                let still_idle = entries
                    .get(&subject)
                    .map(|e| e.last_used.load(Ordering::Relaxed) < purge_cutoff)
                    .unwrap_or(false);
                if still_idle {
                    entries.remove(&subject);
                    self.counters.purges.fetch_add(1, Ordering::Relaxed);
                    debug!(subject = %subject, "purged idle schema encoder");
                }
            }
        }

        if !refresh_targets.is_empty() {
            let _fetch = self.fetch_lock.lock().await;
            for subject in refresh_targets {
                match self.fetch_and_compile(&subject).await {
                    Ok((encoder, id)) => {
                        let updated = self.clock.unix_now();
                        let mut entries = self.entries.write();
                        if let Some(entry) = entries.get_mut(&subject) {
                            entry.encoder = encoder;
                            entry.id = id;
                            entry.last_updated.store(updated, Ordering::Relaxed);
                        }
                        self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
                        debug!(subject = %subject, id, "refreshed schema encoder");
                    }
                    Err(e) => {
                        self.counters.refresh_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(subject = %subject, error = %e, "failed to refresh schema subject, keeping previous version");
                    }
                }
            }
        }
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.entries.read().contains_key(subject)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.counters.refresh_failures.load(Ordering::Relaxed),
            purges: self.counters.purges.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache")
            .field("entries", &self.len())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
