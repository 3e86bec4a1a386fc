//! In-memory TTL stats cache
//!
//! Entries expire a fixed TTL after insertion. Expiry is checked lazily on
//! `get`, and a periodic sweep task removes entries that are never read
//! again so the map stays bounded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::service::types::StatsSnapshot;

use super::StatsCache;

struct CacheEntry {
    snapshot: StatsSnapshot,
    inserted_at: Instant,
}

/// Process-local stats cache with TTL expiry
pub struct MemoryStatsCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    sweep_interval: Duration,
    shutdown: Notify,
}

impl MemoryStatsCache {
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            sweep_interval,
            shutdown: Notify::new(),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry.inserted_at.elapsed() < self.ttl
    }

    /// Remove all expired entries, returning how many were dropped
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        before - entries.len()
    }

    /// Start the background sweep task
    pub async fn start_sweep_task(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.sweep_interval) => {
                    let removed = self.sweep();
                    if removed > 0 {
                        debug!("Swept {} expired stats entries", removed);
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Stats cache sweep task shutting down");
                    break;
                }
            }
        }
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

impl StatsCache for MemoryStatsCache {
    fn get(&self, user_id: &str) -> Option<StatsSnapshot> {
        let entries = self.entries.read();
        match entries.get(user_id) {
            Some(entry) if self.is_fresh(entry) => Some(entry.snapshot.clone()),
            _ => None,
        }
    }

    fn put(&self, user_id: &str, snapshot: StatsSnapshot) {
        self.entries.write().insert(
            user_id.to_string(),
            CacheEntry {
                snapshot,
                inserted_at: Instant::now(),
            },
        );
    }

    fn evict(&self, user_id: &str) {
        self.entries.write().remove(user_id);
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

impl Drop for MemoryStatsCache {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::types::{PhotoStats, StatsSnapshot};

    fn snapshot(user_id: &str, timestamp: i64) -> StatsSnapshot {
        StatsSnapshot {
            user_id: user_id.to_string(),
            matches_added: 1,
            total_matches: 2,
            timestamp,
            photos: PhotoStats {
                recent: Vec::new(),
                count: 2,
            },
        }
    }

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let cache = MemoryStatsCache::new(Duration::from_secs(60), Duration::from_secs(60));
        cache.put("user-1", snapshot("user-1", 1000));

        let hit = cache.get("user-1").unwrap();
        assert_eq!(hit.timestamp, 1000);
        assert!(cache.get("user-2").is_none());
    }

    #[tokio::test]
    async fn test_expires_after_ttl() {
        let cache = MemoryStatsCache::new(Duration::from_millis(20), Duration::from_secs(60));
        cache.put("user-1", snapshot("user-1", 1000));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("user-1").is_none());
        // Expired entry is still held until swept
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired() {
        let cache = MemoryStatsCache::new(Duration::from_millis(20), Duration::from_secs(60));
        cache.put("user-1", snapshot("user-1", 1000));
        cache.put("user-2", snapshot("user-2", 2000));

        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.put("user-3", snapshot("user-3", 3000));

        assert_eq!(cache.sweep(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("user-3").is_some());
    }

    #[tokio::test]
    async fn test_evict() {
        let cache = MemoryStatsCache::new(Duration::from_secs(60), Duration::from_secs(60));
        cache.put("user-1", snapshot("user-1", 1000));
        cache.evict("user-1");
        assert!(cache.get("user-1").is_none());
        assert!(cache.is_empty());
    }
}
