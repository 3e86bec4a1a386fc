//! Match service - core business logic
//!
//! Orchestrates stats aggregation, match checks, and match updates over the
//! record store and the face index.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::StatsCache;
use crate::config::MatchingConfig;
use crate::error::{Error, Result};
use crate::index::{FaceIndex, IndexedFace, PHOTO_PREFIX, USER_PREFIX};
use crate::storage::{FaceData, MatchRecord, MatchStorage, PhotoRecord};

use super::types::*;

/// Photo match service
pub struct MatchService<S: MatchStorage, I: FaceIndex> {
    storage: Arc<S>,
    index: Arc<I>,
    cache: Arc<dyn StatsCache>,
    config: MatchingConfig,
}

impl<S: MatchStorage, I: FaceIndex> MatchService<S, I> {
    pub fn new(
        storage: Arc<S>,
        index: Arc<I>,
        cache: Arc<dyn StatsCache>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            storage,
            index,
            cache,
            config,
        }
    }

    /// Get a reference to the storage
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Get a reference to the stats cache
    pub fn cache(&self) -> &Arc<dyn StatsCache> {
        &self.cache
    }

    /// Get a user's photo match statistics.
    ///
    /// Snapshots are cached; a fresh cache entry is returned verbatim, so a
    /// new match recorded inside the cache window is invisible until the
    /// entry expires.
    pub async fn stats(&self, user_id: &str) -> Result<StatsSnapshot> {
        if user_id.is_empty() {
            return Err(Error::InvalidRequest(
                "Missing required parameter: userId".to_string(),
            ));
        }

        if let Some(snapshot) = self.cache.get(user_id) {
            debug!("Using cached stats for user {}", user_id);
            return Ok(snapshot);
        }

        let now = Utc::now().timestamp_millis();
        let since = now - self.config.recent_window_hours * 3_600_000;

        // Two range reads against the same partition, mirroring the store
        // access pattern of the original endpoint
        let recent = self
            .storage
            .list_matches_since(user_id, since)
            .await
            .map_err(Error::StoreUnavailable)?;
        let all = self
            .storage
            .list_matches(user_id)
            .await
            .map_err(Error::StoreUnavailable)?;

        let snapshot = StatsSnapshot {
            user_id: user_id.to_string(),
            matches_added: recent.len() as u64,
            total_matches: all.len() as u64,
            timestamp: now,
            photos: PhotoStats {
                recent: recent
                    .iter()
                    .map(|m| RecentMatch {
                        photo_id: m.photo_id.clone(),
                        match_timestamp: m.match_timestamp,
                        confidence: m.confidence,
                    })
                    .collect(),
                count: all.len() as u64,
            },
        };

        self.cache.put(user_id, snapshot.clone());

        info!(
            "User {} stats: {} new matches, {} total matches",
            user_id, snapshot.matches_added, snapshot.total_matches
        );

        Ok(snapshot)
    }

    /// Check whether a user has photo matches not yet recorded. Read-only.
    pub async fn check_matches(&self, user_id: &str) -> Result<MatchCheckReport> {
        if user_id.is_empty() {
            return Err(Error::InvalidRequest(
                "Missing required parameter: userId".to_string(),
            ));
        }

        let Some(face) = self
            .storage
            .get_face_data(user_id)
            .await
            .map_err(Error::StoreUnavailable)?
        else {
            info!("User {} has no registered face", user_id);
            return Ok(MatchCheckReport {
                success: true,
                no_face_registered: true,
                user_id: Some(user_id.to_string()),
                ..Default::default()
            });
        };

        let (new_matches, existing_count) = self
            .find_new_matches(user_id, &face.face_id, self.config.check_threshold)
            .await?;

        Ok(MatchCheckReport {
            success: true,
            matches_updated: !new_matches.is_empty(),
            current_matches: existing_count as u64,
            new_matches: new_matches.len() as u64,
            total_matches: (existing_count + new_matches.len()) as u64,
            user_id: Some(user_id.to_string()),
            ..Default::default()
        })
    }

    /// Record any photo matches not yet stored for a user.
    ///
    /// Idempotent when no new underlying matches exist. Per-photo failures
    /// are logged and skipped; they never abort the batch.
    pub async fn update_matches(&self, user_id: &str) -> Result<UpdateReport> {
        if user_id.is_empty() {
            return Err(Error::InvalidRequest(
                "Missing required parameter: userId".to_string(),
            ));
        }

        info!("Processing match update for user {}", user_id);

        let Some(face) = self
            .storage
            .get_face_data(user_id)
            .await
            .map_err(Error::StoreUnavailable)?
        else {
            info!("User {} has no registered face", user_id);
            return Ok(UpdateReport {
                success: false,
                no_face_registered: true,
                user_id: Some(user_id.to_string()),
                ..Default::default()
            });
        };

        let (new_matches, existing_count) = self
            .find_new_matches(user_id, &face.face_id, self.config.update_threshold)
            .await?;

        info!("Found {} new matches to add", new_matches.len());

        let mut matches_added: u64 = 0;
        for (photo_id, similarity) in &new_matches {
            match self.record_match(user_id, photo_id, *similarity).await {
                Ok(true) => matches_added += 1,
                Ok(false) => {}
                Err(e) => error!("Error updating photo {}: {:#}", photo_id, e),
            }
        }

        let now = Utc::now().timestamp_millis();
        if let Err(e) = self.storage.set_last_match_update(user_id, now).await {
            warn!(
                "Failed to update last match timestamp for user {}: {:#}",
                user_id, e
            );
        }

        info!(
            "Successfully added {} new matches for user {}",
            matches_added, user_id
        );

        Ok(UpdateReport {
            success: true,
            matches_added,
            new_matches: matches_added,
            total_matches: existing_count as u64 + matches_added,
            no_face_registered: false,
            user_id: Some(user_id.to_string()),
        })
    }

    /// Register a user's face, replacing any previous enrollment
    pub async fn enroll_user_face(&self, user_id: &str, embedding: &[f32]) -> Result<FaceData> {
        if user_id.is_empty() {
            return Err(Error::InvalidRequest(
                "Missing required parameter: userId".to_string(),
            ));
        }
        if embedding.is_empty() {
            return Err(Error::InvalidRequest(
                "Missing required field: embedding".to_string(),
            ));
        }

        if let Some(prev) = self
            .storage
            .get_face_data(user_id)
            .await
            .map_err(Error::StoreUnavailable)?
        {
            if let Err(e) = self.index.delete_face(&prev.face_id).await {
                warn!(
                    "Failed to remove prior face {} from index: {:#}",
                    prev.face_id, e
                );
            }
        }

        let face_id = Uuid::new_v4().to_string();
        let external_id = format!("{}{}", USER_PREFIX, user_id);
        self.index
            .index_face(&IndexedFace::from_vector(&face_id, &external_id, embedding))
            .await
            .map_err(Error::StoreUnavailable)?;

        let face = FaceData {
            user_id: user_id.to_string(),
            face_id: face_id.clone(),
            enrolled_at: Utc::now().timestamp_millis(),
        };
        self.storage
            .save_face_data(&face)
            .await
            .map_err(Error::StoreUnavailable)?;

        info!("Enrolled face {} for user {}", face_id, user_id);
        Ok(face)
    }

    /// Index a face detected in a photo, creating the photo record if needed
    pub async fn index_photo_face(&self, photo_id: &str, embedding: &[f32]) -> Result<String> {
        if photo_id.is_empty() {
            return Err(Error::InvalidRequest(
                "Missing required parameter: photoId".to_string(),
            ));
        }
        if embedding.is_empty() {
            return Err(Error::InvalidRequest(
                "Missing required field: embedding".to_string(),
            ));
        }

        if self
            .storage
            .get_photo(photo_id)
            .await
            .map_err(Error::StoreUnavailable)?
            .is_none()
        {
            self.storage
                .save_photo(&PhotoRecord {
                    photo_id: photo_id.to_string(),
                    matched_users: Vec::new(),
                    created_at: Utc::now().timestamp_millis(),
                })
                .await
                .map_err(Error::StoreUnavailable)?;
        }

        let face_id = Uuid::new_v4().to_string();
        let external_id = format!("{}{}", PHOTO_PREFIX, photo_id);
        self.index
            .index_face(&IndexedFace::from_vector(&face_id, &external_id, embedding))
            .await
            .map_err(Error::StoreUnavailable)?;

        info!("Indexed face {} for photo {}", face_id, photo_id);
        Ok(face_id)
    }

    /// Search the index for photo matches and diff against stored records.
    /// Returns the new (photo_id, similarity) pairs and the count of
    /// distinct photos already matched.
    async fn find_new_matches(
        &self,
        user_id: &str,
        face_id: &str,
        threshold: f64,
    ) -> Result<(Vec<(String, f64)>, usize)> {
        let hits = self
            .index
            .search_faces(face_id, threshold, self.config.max_faces)
            .await
            .map_err(Error::StoreUnavailable)?;
        debug!("Found {} potential matches", hits.len());

        // Only faces indexed from photos count as matches
        let matching: Vec<(String, f64)> = hits
            .iter()
            .filter_map(|m| {
                m.external_id
                    .strip_prefix(PHOTO_PREFIX)
                    .map(|p| (p.to_string(), m.similarity))
            })
            .collect();
        debug!("Filtered to {} valid photo matches", matching.len());

        let existing = self
            .storage
            .list_matches(user_id)
            .await
            .map_err(Error::StoreUnavailable)?;
        let existing_ids: HashSet<&str> = existing.iter().map(|m| m.photo_id.as_str()).collect();

        let new_matches: Vec<(String, f64)> = matching
            .into_iter()
            .filter(|(photo_id, _)| !existing_ids.contains(photo_id.as_str()))
            .collect();

        Ok((new_matches, existing_ids.len()))
    }

    /// Record a single match. Returns true if a record was written.
    async fn record_match(
        &self,
        user_id: &str,
        photo_id: &str,
        similarity: f64,
    ) -> anyhow::Result<bool> {
        let Some(photo) = self.storage.get_photo(photo_id).await? else {
            warn!("Photo {} not found in database", photo_id);
            return Ok(false);
        };

        if photo.matched_users.iter().any(|u| u == user_id) {
            return Ok(false);
        }

        self.storage.add_matched_user(photo_id, user_id).await?;
        self.storage
            .save_match(&MatchRecord {
                user_id: user_id.to_string(),
                photo_id: photo_id.to_string(),
                match_timestamp: Utc::now().timestamp_millis(),
                confidence: similarity,
            })
            .await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStatsCache;
    use crate::storage::SqliteStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    fn test_config() -> MatchingConfig {
        MatchingConfig {
            check_threshold: 80.0,
            update_threshold: 98.0,
            max_faces: 1000,
            recent_window_hours: 24,
        }
    }

    async fn test_service(
        cache_ttl: Duration,
    ) -> (
        tempfile::TempDir,
        Arc<SqliteStorage>,
        MatchService<SqliteStorage, SqliteStorage>,
    ) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = Arc::new(SqliteStorage::new(db_path.to_str().unwrap()).await.unwrap());
        let cache = Arc::new(MemoryStatsCache::new(cache_ttl, Duration::from_secs(60)));
        let service = MatchService::new(storage.clone(), storage.clone(), cache, test_config());
        (dir, storage, service)
    }

    async fn seed_match(storage: &SqliteStorage, user_id: &str, photo_id: &str, age_ms: i64) {
        let now = Utc::now().timestamp_millis();
        storage
            .save_match(&MatchRecord {
                user_id: user_id.to_string(),
                photo_id: photo_id.to_string(),
                match_timestamp: now - age_ms,
                confidence: 99.0,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stats_windowed_counts() {
        let (_dir, storage, service) = test_service(Duration::from_secs(60)).await;

        // One match 30 hours ago, two within the last hour
        seed_match(&storage, "user-1", "p-old", 30 * 3_600_000).await;
        seed_match(&storage, "user-1", "p-new-1", 30 * 60_000).await;
        seed_match(&storage, "user-1", "p-new-2", 5 * 60_000).await;

        let stats = service.stats("user-1").await.unwrap();
        assert_eq!(stats.matches_added, 2);
        assert_eq!(stats.total_matches, 3);
        assert_eq!(stats.photos.recent.len(), 2);
        assert_eq!(stats.photos.count, 3);
        assert!(stats.matches_added <= stats.total_matches);
    }

    #[tokio::test]
    async fn test_stats_empty_user() {
        let (_dir, _storage, service) = test_service(Duration::from_secs(60)).await;

        let stats = service.stats("user-none").await.unwrap();
        assert_eq!(stats.matches_added, 0);
        assert_eq!(stats.total_matches, 0);
        assert!(stats.photos.recent.is_empty());
    }

    #[tokio::test]
    async fn test_stats_rejects_missing_user_id() {
        struct CountingStore {
            calls: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl MatchStorage for CountingStore {
            async fn save_match(&self, _: &MatchRecord) -> anyhow::Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            async fn list_matches(&self, _: &str) -> anyhow::Result<Vec<MatchRecord>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            }
            async fn list_matches_since(&self, _: &str, _: i64) -> anyhow::Result<Vec<MatchRecord>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            }
            async fn count_all_matches(&self) -> anyhow::Result<i64> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            }
            async fn save_face_data(&self, _: &FaceData) -> anyhow::Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            async fn get_face_data(&self, _: &str) -> anyhow::Result<Option<FaceData>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
            async fn save_photo(&self, _: &PhotoRecord) -> anyhow::Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            async fn get_photo(&self, _: &str) -> anyhow::Result<Option<PhotoRecord>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
            async fn add_matched_user(&self, _: &str, _: &str) -> anyhow::Result<bool> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            }
            async fn get_user_profile(&self, _: &str) -> anyhow::Result<Option<crate::storage::UserProfile>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
            async fn set_last_match_update(&self, _: &str, _: i64) -> anyhow::Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        #[async_trait::async_trait]
        impl FaceIndex for CountingStore {
            async fn index_face(&self, _: &IndexedFace) -> anyhow::Result<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            async fn search_faces(
                &self,
                _: &str,
                _: f64,
                _: usize,
            ) -> anyhow::Result<Vec<crate::index::FaceMatch>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            }
            async fn delete_face(&self, _: &str) -> anyhow::Result<bool> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            }
        }

        let store = Arc::new(CountingStore {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(MemoryStatsCache::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let service = MatchService::new(store.clone(), store.clone(), cache, test_config());

        let err = service.stats("").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        // No store call was made
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);

        assert!(matches!(
            service.check_matches("").await.unwrap_err(),
            Error::InvalidRequest(_)
        ));
        assert!(matches!(
            service.update_matches("").await.unwrap_err(),
            Error::InvalidRequest(_)
        ));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stats_cached_within_ttl() {
        let (_dir, storage, service) = test_service(Duration::from_secs(60)).await;
        seed_match(&storage, "user-1", "p1", 1000).await;

        let first = service.stats("user-1").await.unwrap();
        // A write inside the cache window is invisible until expiry
        seed_match(&storage, "user-1", "p2", 0).await;
        let second = service.stats("user-1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.timestamp, second.timestamp);
    }

    #[tokio::test]
    async fn test_stats_refresh_after_ttl() {
        let (_dir, storage, service) = test_service(Duration::from_millis(20)).await;
        seed_match(&storage, "user-1", "p1", 1000).await;

        let first = service.stats("user-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        seed_match(&storage, "user-1", "p2", 0).await;
        let second = service.stats("user-1").await.unwrap();

        assert!(second.timestamp >= first.timestamp);
        assert_eq!(second.total_matches, 2);
    }

    #[tokio::test]
    async fn test_check_no_face_registered() {
        let (_dir, _storage, service) = test_service(Duration::from_secs(60)).await;

        let report = service.check_matches("user-1").await.unwrap();
        assert!(report.success);
        assert!(report.no_face_registered);
        assert!(!report.matches_updated);
    }

    #[tokio::test]
    async fn test_check_and_update_flow() {
        let (_dir, storage, service) = test_service(Duration::from_secs(60)).await;

        let embedding = [1.0f32, 0.0, 0.0];
        service.enroll_user_face("user-1", &embedding).await.unwrap();
        service.index_photo_face("p1", &embedding).await.unwrap();
        service.index_photo_face("p2", &[0.0, 1.0, 0.0]).await.unwrap();

        // Check sees the matching photo but records nothing
        let check = service.check_matches("user-1").await.unwrap();
        assert!(check.success);
        assert!(check.matches_updated);
        assert_eq!(check.new_matches, 1);
        assert_eq!(check.current_matches, 0);
        assert_eq!(check.total_matches, 1);
        assert!(storage.list_matches("user-1").await.unwrap().is_empty());

        // Update records it
        let update = service.update_matches("user-1").await.unwrap();
        assert!(update.success);
        assert_eq!(update.matches_added, 1);
        assert_eq!(update.total_matches, 1);

        let records = storage.list_matches("user-1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].photo_id, "p1");
        assert!(records[0].confidence >= 98.0);

        let photo = storage.get_photo("p1").await.unwrap().unwrap();
        assert_eq!(photo.matched_users, vec!["user-1".to_string()]);

        // Timestamp recorded for the sign-in throttle
        let profile = storage.get_user_profile("user-1").await.unwrap().unwrap();
        assert!(profile.last_match_update > 0);

        // Re-running with no new matches is a no-op
        let again = service.update_matches("user-1").await.unwrap();
        assert!(again.success);
        assert_eq!(again.matches_added, 0);
        assert_eq!(again.total_matches, 1);
        assert_eq!(storage.list_matches("user-1").await.unwrap().len(), 1);

        // And the check agrees
        let recheck = service.check_matches("user-1").await.unwrap();
        assert!(!recheck.matches_updated);
        assert_eq!(recheck.current_matches, 1);
    }

    #[tokio::test]
    async fn test_update_no_face_registered() {
        let (_dir, _storage, service) = test_service(Duration::from_secs(60)).await;

        let report = service.update_matches("user-1").await.unwrap();
        assert!(!report.success);
        assert!(report.no_face_registered);
        assert_eq!(report.matches_added, 0);
    }

    #[tokio::test]
    async fn test_update_skips_unknown_photo() {
        let (_dir, storage, service) = test_service(Duration::from_secs(60)).await;

        let embedding = [1.0f32, 0.0, 0.0];
        service.enroll_user_face("user-1", &embedding).await.unwrap();
        // Face indexed under a photo id with no photo record behind it
        storage
            .index_face(&IndexedFace::from_vector("f-orphan", "photo_ghost", &embedding))
            .await
            .unwrap();

        let update = service.update_matches("user-1").await.unwrap();
        assert!(update.success);
        assert_eq!(update.matches_added, 0);
        assert!(storage.list_matches("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reenroll_replaces_index_entry() {
        let (_dir, storage, service) = test_service(Duration::from_secs(60)).await;

        let first = service
            .enroll_user_face("user-1", &[1.0f32, 0.0, 0.0])
            .await
            .unwrap();
        let second = service
            .enroll_user_face("user-1", &[0.0f32, 1.0, 0.0])
            .await
            .unwrap();

        assert_ne!(first.face_id, second.face_id);
        // The old face is gone from the index
        assert!(storage.search_faces(&first.face_id, 0.0, 10).await.is_err());

        let current = storage.get_face_data("user-1").await.unwrap().unwrap();
        assert_eq!(current.face_id, second.face_id);
    }

    #[tokio::test]
    async fn test_user_faces_never_count_as_matches() {
        let (_dir, _storage, service) = test_service(Duration::from_secs(60)).await;

        let embedding = [1.0f32, 0.0, 0.0];
        service.enroll_user_face("user-1", &embedding).await.unwrap();
        // Another user with an identical face
        service.enroll_user_face("user-2", &embedding).await.unwrap();

        let check = service.check_matches("user-1").await.unwrap();
        assert!(!check.matches_updated);
        assert_eq!(check.new_matches, 0);
    }
}
