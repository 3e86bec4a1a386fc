//! REST API request/response data transfer objects
//!
//! Stats, check, update, and sign-in responses serialize the service layer
//! types directly; see `service::types`.

use serde::{Deserialize, Serialize};

/// Sign-in request, issued after credential verification
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub user_id: String,
}

/// Enroll a user face
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollFaceRequest {
    pub user_id: String,
    pub embedding: Vec<f32>,
}

/// Enroll response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollFaceResponse {
    pub success: bool,
    pub face_id: String,
    pub message: String,
}

/// Index a face detected in a photo
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexPhotoFaceRequest {
    pub embedding: Vec<f32>,
}

/// Photo face index response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexPhotoFaceResponse {
    pub success: bool,
    pub face_id: String,
    pub message: String,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
}

/// Metrics response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub total_match_records: i64,
    pub cache_entries: usize,
    pub uptime_seconds: u64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
            details: None,
        }
    }

    pub fn with_details(error: &str, details: String) -> Self {
        Self {
            error: error.to_string(),
            details: Some(details),
        }
    }
}
