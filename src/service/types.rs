//! Service layer types
//!
//! Wire field names are camelCase to match the public API shapes.

use serde::{Deserialize, Serialize};

/// Derived, cached summary of a user's match counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub user_id: String,
    /// Matches recorded within the trailing window
    pub matches_added: u64,
    /// All-time match count
    pub total_matches: u64,
    /// Snapshot creation time (epoch ms)
    pub timestamp: i64,
    pub photos: PhotoStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoStats {
    pub recent: Vec<RecentMatch>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentMatch {
    pub photo_id: String,
    pub match_timestamp: i64,
    pub confidence: f64,
}

/// Result of a match check, and the payload shape returned by the
/// match-checker collaborator. Unknown fields are ignored and missing
/// fields default, so partial payloads still parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchCheckReport {
    pub success: bool,
    pub matches_updated: bool,
    pub no_face_registered: bool,
    pub recently_updated: bool,
    pub current_matches: u64,
    pub new_matches: u64,
    pub total_matches: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timed_out: bool,
}

/// Result of a match update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateReport {
    pub success: bool,
    pub matches_added: u64,
    pub new_matches: u64,
    pub total_matches: u64,
    pub no_face_registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Sign-in response augmentation. `match_check_results` is null when the
/// checker payload could not be parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResult {
    pub user_id: String,
    pub match_check_results: Option<MatchCheckReport>,
}

/// Client-visible notification events from the match pipeline
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum MatchEvent {
    /// A sign-in match check completed
    #[serde(rename = "photo:match:update", rename_all = "camelCase")]
    CheckCompleted {
        user_id: String,
        results: MatchCheckReport,
    },
    /// A background match update completed with new matches
    #[serde(rename = "photo:match:update:complete", rename_all = "camelCase")]
    UpdateCompleted {
        user_id: String,
        matches_added: u64,
        total_matches: u64,
    },
}
