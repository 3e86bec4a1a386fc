//! Storage abstraction traits
//!
//! Defines the interface for match record persistence.
//! Implementations can be swapped between SQLite and a hosted key-value store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use anyhow::Result;

/// A stored user/photo match record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Subject user (partition key)
    pub user_id: String,
    /// Matched photo
    pub photo_id: String,
    /// When the match was recorded (epoch milliseconds)
    pub match_timestamp: i64,
    /// Match confidence score (0-100)
    pub confidence: f64,
}

/// A user's registered face
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceData {
    pub user_id: String,
    pub face_id: String,
    /// Enrollment timestamp (epoch milliseconds)
    pub enrolled_at: i64,
}

/// A photo known to the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub photo_id: String,
    /// Users recognized in this photo
    pub matched_users: Vec<String>,
    pub created_at: i64,
}

/// Per-user profile data consulted by the sign-in flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    /// When this user's matches were last refreshed (epoch ms, 0 = never)
    pub last_match_update: i64,
}

/// Match record storage trait
/// Implementations must be thread-safe and async-compatible
#[async_trait]
pub trait MatchStorage: Send + Sync + 'static {
    /// Insert a match record. Duplicate (user, timestamp) pairs are allowed;
    /// counts are reported raw.
    async fn save_match(&self, record: &MatchRecord) -> Result<()>;

    /// Get all match records for a user, newest first
    async fn list_matches(&self, user_id: &str) -> Result<Vec<MatchRecord>>;

    /// Get match records for a user with `match_timestamp > since` (epoch ms)
    async fn list_matches_since(&self, user_id: &str, since: i64) -> Result<Vec<MatchRecord>>;

    /// Total match records across all users
    async fn count_all_matches(&self) -> Result<i64>;

    /// Save a user's registered face, replacing any previous registration
    async fn save_face_data(&self, face: &FaceData) -> Result<()>;

    /// Get a user's registered face
    async fn get_face_data(&self, user_id: &str) -> Result<Option<FaceData>>;

    /// Save a photo record
    async fn save_photo(&self, photo: &PhotoRecord) -> Result<()>;

    /// Get a photo record by ID
    async fn get_photo(&self, photo_id: &str) -> Result<Option<PhotoRecord>>;

    /// Append a user to a photo's matched_users if not already present.
    /// Returns true if the user was appended.
    async fn add_matched_user(&self, photo_id: &str, user_id: &str) -> Result<bool>;

    /// Get a user profile
    async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>>;

    /// Set the last match update timestamp for a user (upsert)
    async fn set_last_match_update(&self, user_id: &str, timestamp: i64) -> Result<()>;
}
