//! ArcFace face embedder via ONNX Runtime.
//!
//! Produces 512-dimensional L2-normalized embeddings from 112×112 face crops
//! using the w600k_r50 model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// ArcFace uses symmetric normalization, unlike SCRFD.
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
pub const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face embedder.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Embed a face.
    ///
    /// With landmarks the face is aligned to the canonical crop; with a bare
    /// box the box region is resized; with no face at all the whole image is
    /// treated as the face.
    pub fn extract(
        &mut self,
        image: &GrayImage,
        face: Option<&BoundingBox>,
    ) -> Result<Embedding, RecognizerError> {
        let crop = face_crop(image, face);
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

/// Produce the 112×112 crop fed to the embedder.
fn face_crop(image: &GrayImage, face: Option<&BoundingBox>) -> GrayImage {
    if let Some(landmarks) = face.and_then(|f| f.landmarks.as_ref()) {
        return alignment::align_face(image, landmarks);
    }

    let region = face
        .and_then(|f| f.crop_rect(0.0, image.width(), image.height()))
        .map(|(x, y, w, h)| imageops::crop_imm(image, x, y, w, h).to_image());

    let source = region.as_ref().unwrap_or(image);
    imageops::resize(source, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle)
}

/// Normalize a 112×112 grayscale crop into a NCHW tensor (luma in all channels).
fn preprocess(crop: &GrayImage) -> Array4<f32> {
    let side = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in crop.enumerate_pixels() {
        let normalized = (pixel[0] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = normalized;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}
