//! Request orchestration between the HTTP surface and the engine thread.

use crate::engine::{EngineError, EngineHandle};
use axum::http::StatusCode;
use image::DynamicImage;
use rollcall_core::{decode_data_url, ColorSpace, DecodeError, MatchResult};
use rollcall_gallery::{synchronize, validate_person_id, RemoteBucket, RemoteError, SyncReport};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid image: {0}")]
    Decode(#[from] DecodeError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("{0}")]
    Engine(String),
    #[error("{0}")]
    Sync(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) | ServiceError::Decode(_) | ServiceError::NoFaceDetected => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Engine(_) | ServiceError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NoFaceDetected => ServiceError::NoFaceDetected,
            other => ServiceError::Engine(other.to_string()),
        }
    }
}

/// Face enrollment, recognition and gallery sync.
///
/// Enroll and recognize share the read side of `gate`; sync takes the write
/// side so no request sees a half-synchronized gallery.
pub struct FaceService {
    engine: EngineHandle,
    bucket: Option<Arc<dyn RemoteBucket>>,
    gate: RwLock<()>,
}

impl FaceService {
    pub fn new(engine: EngineHandle, bucket: Option<Arc<dyn RemoteBucket>>) -> Self {
        Self {
            engine,
            bucket,
            gate: RwLock::new(()),
        }
    }

    /// Store every face found in `image` under `person_id`. Returns the
    /// number of samples stored.
    pub async fn enroll(&self, person_id: &str, image: &str) -> Result<usize, ServiceError> {
        if person_id.trim().is_empty() || image.is_empty() {
            return Err(ServiceError::Validation("Name or image data is missing".into()));
        }
        validate_person_id(person_id).map_err(|e| ServiceError::Validation(e.to_string()))?;

        let decoded = decode(image, ColorSpace::Grayscale).await?;
        let _read = self.gate.read().await;
        Ok(self.engine.enroll(person_id.to_string(), decoded).await?)
    }

    /// Best gallery match for each face in `image`. An empty gallery or an
    /// image without faces yields an empty list.
    pub async fn recognize(&self, image: &str) -> Result<Vec<MatchResult>, ServiceError> {
        if image.is_empty() {
            return Err(ServiceError::Validation("No image provided".into()));
        }

        let decoded = decode(image, ColorSpace::Color).await?;
        let _read = self.gate.read().await;
        Ok(self.engine.recognize(decoded).await?)
    }

    /// Reconcile the gallery against the remote bucket.
    pub async fn sync(&self) -> Result<SyncReport, ServiceError> {
        let bucket = self
            .bucket
            .as_deref()
            .ok_or_else(|| ServiceError::Sync(RemoteError::NotConfigured.to_string()))?;

        let _write = self.gate.write().await;
        synchronize(bucket, &self.engine).await.map_err(|e| {
            tracing::error!(error = %e, "sync failed");
            ServiceError::Sync(e.to_string())
        })
    }

    /// Rebuild the embedding cache before serving traffic.
    pub async fn warmup(&self) {
        if let Err(e) = self.engine.warmup().await {
            tracing::warn!(error = %e, "warmup skipped");
        }
    }
}

/// Decode off the async runtime; images can be large.
async fn decode(image: &str, color: ColorSpace) -> Result<DynamicImage, ServiceError> {
    let payload = image.to_string();
    tokio::task::spawn_blocking(move || decode_data_url(&payload, color))
        .await
        .map_err(|e| ServiceError::Engine(format!("decode task failed: {e}")))?
        .map_err(ServiceError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ServiceError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ServiceError::Decode(DecodeError::MissingComma).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ServiceError::NoFaceDetected.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ServiceError::Engine("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ServiceError::Sync("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_engine_no_face_keeps_its_kind() {
        assert!(matches!(
            ServiceError::from(EngineError::NoFaceDetected),
            ServiceError::NoFaceDetected
        ));
        assert!(matches!(
            ServiceError::from(EngineError::ChannelClosed),
            ServiceError::Engine(msg) if msg == "engine thread exited"
        ));
    }
}
