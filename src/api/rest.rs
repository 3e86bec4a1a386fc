//! Axum REST API handlers

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    routing::{get, post},
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::Error;
use crate::index::FaceIndex;
use crate::service::types::{MatchCheckReport, SignInResult, StatsSnapshot, UpdateReport};
use crate::service::{MatchService, SignInFlow};
use crate::storage::MatchStorage;

use super::dto::*;

/// Application state shared across handlers
pub struct AppState<S: MatchStorage, I: FaceIndex> {
    pub service: Arc<MatchService<S, I>>,
    pub signin: Arc<SignInFlow>,
    pub debug_errors: bool,
    pub start_time: Instant,
}

/// Create the REST API router
pub fn create_rest_router<S: MatchStorage, I: FaceIndex>(state: Arc<AppState<S, I>>) -> Router {
    Router::new()
        // User photo match operations
        .route(
            "/api/v1/user-photos/:user_id/stats",
            get(stats_handler::<S, I>),
        )
        .route(
            "/api/v1/user-photos/:user_id/check-matches",
            post(check_matches_handler::<S, I>),
        )
        .route(
            "/api/v1/user-photos/:user_id/update-matches",
            post(update_matches_handler::<S, I>),
        )
        // Sign-in augmentation
        .route("/api/v1/signin", post(signin_handler::<S, I>))
        // Face registration
        .route("/api/v1/faces", post(enroll_face_handler::<S, I>))
        .route(
            "/api/v1/photos/:photo_id/faces",
            post(index_photo_face_handler::<S, I>),
        )
        // System endpoints
        .route("/health", get(health_handler::<S, I>))
        .route("/metrics", get(metrics_handler::<S, I>))
        // Middleware
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the HTTP response for a service error.
/// Internal details are exposed only when the debug flag is set.
fn error_response(
    err: &Error,
    context: &str,
    debug_errors: bool,
) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        Error::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))),
        Error::StoreUnavailable(source) => {
            let body = if debug_errors {
                ErrorResponse::with_details(context, format!("{source:#}"))
            } else {
                ErrorResponse::new(context)
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body))
        }
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(context)),
        ),
    }
}

/// Get photo match statistics for a user
async fn stats_handler<S: MatchStorage, I: FaceIndex>(
    State(state): State<Arc<AppState<S, I>>>,
    Path(user_id): Path<String>,
) -> Result<Json<StatsSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    let stats = state.service.stats(&user_id).await.map_err(|e| {
        error!("Error getting photo match stats for user {}: {}", user_id, e);
        error_response(
            &e,
            "Failed to retrieve photo match statistics",
            state.debug_errors,
        )
    })?;

    Ok(Json(stats))
}

/// Check for new photo matches without recording them
async fn check_matches_handler<S: MatchStorage, I: FaceIndex>(
    State(state): State<Arc<AppState<S, I>>>,
    Path(user_id): Path<String>,
) -> Result<Json<MatchCheckReport>, (StatusCode, Json<ErrorResponse>)> {
    let report = state.service.check_matches(&user_id).await.map_err(|e| {
        error!("Error checking matches for user {}: {}", user_id, e);
        error_response(&e, "Failed to check photo matches", state.debug_errors)
    })?;

    Ok(Json(report))
}

/// Record new photo matches for a user
async fn update_matches_handler<S: MatchStorage, I: FaceIndex>(
    State(state): State<Arc<AppState<S, I>>>,
    Path(user_id): Path<String>,
) -> Result<Json<UpdateReport>, (StatusCode, Json<ErrorResponse>)> {
    let report = state.service.update_matches(&user_id).await.map_err(|e| {
        error!("Error updating matches for user {}: {}", user_id, e);
        error_response(&e, "Failed to update photo matches", state.debug_errors)
    })?;

    Ok(Json(report))
}

/// Run the post-authentication match check
async fn signin_handler<S: MatchStorage, I: FaceIndex>(
    State(state): State<Arc<AppState<S, I>>>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<SignInResult>, (StatusCode, Json<ErrorResponse>)> {
    if req.user_id.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Missing required parameter: userId")),
        ));
    }

    Ok(Json(state.signin.handle_sign_in(&req.user_id).await))
}

/// Enroll a user's face
async fn enroll_face_handler<S: MatchStorage, I: FaceIndex>(
    State(state): State<Arc<AppState<S, I>>>,
    Json(req): Json<EnrollFaceRequest>,
) -> Result<Json<EnrollFaceResponse>, (StatusCode, Json<ErrorResponse>)> {
    let face = state
        .service
        .enroll_user_face(&req.user_id, &req.embedding)
        .await
        .map_err(|e| {
            error!("Enrollment failed for user {}: {}", req.user_id, e);
            error_response(&e, "Failed to enroll face", state.debug_errors)
        })?;

    Ok(Json(EnrollFaceResponse {
        success: true,
        face_id: face.face_id,
        message: "Face enrolled successfully".to_string(),
    }))
}

/// Index a face detected in a photo
async fn index_photo_face_handler<S: MatchStorage, I: FaceIndex>(
    State(state): State<Arc<AppState<S, I>>>,
    Path(photo_id): Path<String>,
    Json(req): Json<IndexPhotoFaceRequest>,
) -> Result<Json<IndexPhotoFaceResponse>, (StatusCode, Json<ErrorResponse>)> {
    let face_id = state
        .service
        .index_photo_face(&photo_id, &req.embedding)
        .await
        .map_err(|e| {
            error!("Indexing failed for photo {}: {}", photo_id, e);
            error_response(&e, "Failed to index photo face", state.debug_errors)
        })?;

    Ok(Json(IndexPhotoFaceResponse {
        success: true,
        face_id,
        message: "Photo face indexed successfully".to_string(),
    }))
}

/// Health check
async fn health_handler<S: MatchStorage, I: FaceIndex>(
    State(_state): State<Arc<AppState<S, I>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Metrics
async fn metrics_handler<S: MatchStorage, I: FaceIndex>(
    State(state): State<Arc<AppState<S, I>>>,
) -> Json<MetricsResponse> {
    let total = state
        .service
        .storage()
        .count_all_matches()
        .await
        .unwrap_or(0);

    Json(MetricsResponse {
        total_match_records: total,
        cache_entries: state.service.cache().len(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
