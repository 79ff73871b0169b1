//! Mapping of service errors to HTTP responses.
//!
//! Each endpoint keeps the error body shape its clients already parse:
//! enroll answers `{message}`, recognize `{error}`, sync `{message, error}`.

use crate::service::ServiceError;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// A failed request, tagged with the endpoint that produced it.
#[derive(Debug)]
pub enum HttpError {
    Enroll(ServiceError),
    Recognize(ServiceError),
    Sync(ServiceError),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            HttpError::Enroll(e) => {
                let message = match e {
                    ServiceError::Validation(msg) => msg.clone(),
                    ServiceError::Decode(d) => format!("Invalid image format: {d}"),
                    ServiceError::NoFaceDetected => "No face detected".to_string(),
                    other => other.to_string(),
                };
                (e.status(), json!({ "message": message }))
            }
            HttpError::Recognize(e) => (e.status(), json!({ "error": e.to_string() })),
            HttpError::Sync(e) => (
                e.status(),
                json!({ "message": "Sync failed", "error": e.to_string() }),
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        } else {
            tracing::debug!(error = ?self, "request rejected");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use rollcall_core::DecodeError;

    #[test]
    fn test_status_follows_error_kind() {
        let resp = HttpError::Enroll(ServiceError::NoFaceDetected).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = HttpError::Recognize(ServiceError::Decode(DecodeError::Empty)).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = HttpError::Sync(ServiceError::Sync("remote storage not configured".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
