//! Idempotence deduplication.
//!
//! A sibling of the rate limiter: callers record an idempotence id before
//! doing work and skip the work if the id was already recorded. Storage is
//! pluggable; a process-local store with expiry is provided.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::clock::{Clock, MonotonicClock};
use crate::error::Result;

/// How long an id is remembered by default.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Saves between automatic sweeps of expired ids.
pub const PURGE_EVERY_SAVES: u64 = 1024;

/// Backing store for idempotence ids.
#[async_trait]
pub trait IdempotenceStorage: Send + Sync {
    /// Record `id` unless it is already present.
    ///
    /// Returns `true` if this call recorded it.
    async fn save_if_absent(&self, id: &str) -> Result<bool>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// Generate a fresh idempotence id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Front door for idempotence checks.
pub struct Idempotence<S: IdempotenceStorage> {
    storage: S,
}

impl<S: IdempotenceStorage> Idempotence<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub async fn save_if_absent(&self, id: &str) -> Result<bool> {
        self.storage.save_if_absent(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.storage.delete(id).await
    }
}

/// Process-local storage; each id expires `expiration` after it was saved.
///
/// Expired ids are swept every [`PURGE_EVERY_SAVES`] saves, so the map stays
/// bounded by the ids saved within one expiration period plus one sweep batch.
pub struct InMemoryIdempotenceStorage {
    /// id -> expiry, in clock milliseconds
    entries: DashMap<String, u64>,
    expiration_ms: u64,
    saves: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl InMemoryIdempotenceStorage {
    pub fn new() -> Self {
        Self::with_expiration(DEFAULT_EXPIRATION, Arc::new(MonotonicClock::new()))
    }

    pub fn with_expiration(expiration: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            expiration_ms: expiration.as_millis() as u64,
            saves: AtomicU64::new(0),
            clock,
        }
    }

    /// Drop expired ids. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut removed = 0;
        self.entries.retain(|_, expires_at| {
            let keep = *expires_at > now;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    fn save_entry(&self, id: &str) -> bool {
        let now = self.clock.now_millis();
        let expires_at = now.saturating_add(self.expiration_ms);

        // The entry guard holds a shard lock and must be gone before a sweep.
        let saved = match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    false
                } else {
                    entry.insert(expires_at);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                true
            }
        };

        if self.saves.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY_SAVES == PURGE_EVERY_SAVES - 1 {
            let removed = self.purge_expired();
            debug!(removed = removed, remaining = self.entries.len(), "Purged expired idempotence ids");
        }

        saved
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryIdempotenceStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotenceStorage for InMemoryIdempotenceStorage {
    async fn save_if_absent(&self, id: &str) -> Result<bool> {
        let saved = self.save_entry(id);
        trace!(id = %id, saved = saved, "Idempotence save");
        Ok(saved)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.entries.remove(id);
        Ok(())
    }
}
