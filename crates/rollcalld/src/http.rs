//! Axum routes for the face service.

use crate::error::HttpError;
use crate::service::{FaceService, ServiceError};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub type AppState = Arc<FaceService>;

/// HTTP-level settings taken from the daemon config.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub max_body_bytes: usize,
    /// Allowed origins; empty allows any.
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EnrollRequest {
    pub usn: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RecognizeRequest {
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// One recognized face.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Recognition {
    pub usn: String,
    /// Cosine distance to the matched sample. Lower is more similar.
    pub confidence: f32,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub message: String,
    pub total_files: usize,
    pub active: usize,
    pub pruned: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

/// Build the service router.
pub fn router(service: AppState, settings: &HttpSettings) -> Router {
    Router::new()
        .route("/enroll", post(enroll_handler))
        .route("/recognize", post(recognize_handler))
        .route("/sync", post(sync_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(settings.max_body_bytes))
        .layer(build_cors_layer(&settings.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn enroll_handler(
    State(service): State<AppState>,
    payload: Result<Json<EnrollRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, HttpError> {
    // An unreadable body is treated like one with the fields missing.
    let req = payload.map(|Json(r)| r).unwrap_or_default();
    let usn = req.usn.unwrap_or_default();
    let image = req.image.unwrap_or_default();

    let stored = service.enroll(&usn, &image).await.map_err(HttpError::Enroll)?;
    tracing::debug!(usn = %usn, stored, "enroll request done");
    Ok(Json(MessageResponse {
        message: "Enrollment complete".to_string(),
    }))
}

async fn recognize_handler(
    State(service): State<AppState>,
    payload: Result<Json<RecognizeRequest>, JsonRejection>,
) -> Result<Json<Vec<Recognition>>, HttpError> {
    let image = match payload {
        Ok(Json(req)) => req.image.unwrap_or_default(),
        Err(rejection) => {
            return Err(HttpError::Recognize(ServiceError::Validation(rejection.body_text())));
        }
    };

    let matches = service.recognize(&image).await.map_err(HttpError::Recognize)?;
    Ok(Json(
        matches
            .into_iter()
            .map(|m| Recognition {
                usn: m.person_id,
                confidence: m.distance,
            })
            .collect(),
    ))
}

async fn sync_handler(State(service): State<AppState>) -> Result<Json<SyncResponse>, HttpError> {
    let report = service.sync().await.map_err(HttpError::Sync)?;
    Ok(Json(SyncResponse {
        message: format!("Sync Complete. Active: {}, Pruned: {}", report.active, report.pruned),
        total_files: report.total_files,
        active: report.active,
        pruned: report.pruned,
    }))
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
