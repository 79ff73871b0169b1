//! The detection + embedding capability consumed by the pipeline.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0}")]
    Other(String),
}

/// Face detection and embedding over grayscale rasters.
///
/// Implementations are owned by a single engine thread, hence `&mut self`.
pub trait FaceAnalyzer: Send + 'static {
    /// Short model name, used to key the embedding cache file.
    fn model_name(&self) -> &str;

    /// Detected faces, best first.
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, AnalyzerError>;

    /// Embed one face, or the whole image when `face` is `None`.
    fn embed(&mut self, image: &GrayImage, face: Option<&BoundingBox>) -> Result<Embedding, AnalyzerError>;
}

/// SCRFD + ArcFace running on ONNX Runtime.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let scrfd = model_dir.join(SCRFD_MODEL_FILE);
        let arcface = model_dir.join(ARCFACE_MODEL_FILE);

        let detector = FaceDetector::load(&scrfd.to_string_lossy())?;
        let recognizer = FaceRecognizer::load(&arcface.to_string_lossy())?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn model_name(&self) -> &str {
        "arcface"
    }

    fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        Ok(self.detector.detect(image)?)
    }

    fn embed(&mut self, image: &GrayImage, face: Option<&BoundingBox>) -> Result<Embedding, AnalyzerError> {
        Ok(self.recognizer.extract(image, face)?)
    }
}
