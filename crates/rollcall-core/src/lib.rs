//! rollcall-core — image decoding and the face detection/embedding engine.
//!
//! Uses SCRFD for face detection and ArcFace for embeddings, both running via
//! ONNX Runtime on the CPU, plus the data-URL codec used by the HTTP surface.

pub mod alignment;
pub mod analyzer;
pub mod codec;
pub mod detector;
pub mod recognizer;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use codec::{decode_bytes, decode_data_url, ColorSpace, DecodeError};
pub use types::{
    person_id_from_sample_path, BoundingBox, Candidate, CosineMatcher, Embedding, GalleryEntry,
    MatchResult, Matcher,
};

/// Default directory for the ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/rollcall/models")
}
