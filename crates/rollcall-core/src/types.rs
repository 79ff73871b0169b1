use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Integer crop rectangle `(x, y, w, h)` grown by `margin` (fraction of the
    /// box size on every side) and clamped to a `width`×`height` image.
    ///
    /// Returns `None` when the clamped rectangle is empty.
    pub fn crop_rect(&self, margin: f32, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let pad_x = self.width * margin;
        let pad_y = self.height * margin;

        let x0 = (self.x - pad_x).floor().max(0.0) as u32;
        let y0 = (self.y - pad_y).floor().max(0.0) as u32;
        let x1 = ((self.x + self.width + pad_x).ceil().max(0.0) as u32).min(width);
        let y1 = ((self.y + self.height + pad_y).ceil().max(0.0) as u32).min(height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance in [0, 2]. Lower = more similar.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        (1.0 - self.similarity(other)).clamp(0.0, 2.0)
    }
}

/// One embedded face sample of the gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    /// Sample file path, relative to the gallery root (`<personId>/<file>.jpg`).
    pub sample: String,
    pub embedding: Embedding,
}

/// A gallery sample that fell within the distance threshold of a probe face.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub sample: String,
    pub distance: f32,
}

impl Candidate {
    /// Identity owning this sample: the name of the sample's parent directory.
    pub fn person_id(&self) -> Option<String> {
        person_id_from_sample_path(&self.sample)
    }
}

/// Recover a personId from a sample path.
///
/// Path separators are normalized first so Windows-style paths resolve the
/// same way; a bare file name with no parent directory yields `None`.
pub fn person_id_from_sample_path(sample: &str) -> Option<String> {
    let normalized = sample.replace('\\', "/");
    let parent = Path::new(&normalized).parent()?;
    let name = parent.file_name()?.to_str()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Best match for one detected face of a probe image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub person_id: String,
    /// Cosine distance of the best candidate. Lower = more similar.
    pub distance: f32,
}

/// Strategy for ranking a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    /// Candidates with `distance <= threshold`, nearest first.
    fn rank(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> Vec<Candidate>;
}

/// Cosine distance matcher.
///
/// Always scores every gallery entry; there is no early exit on a close hit.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn rank(&self, probe: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = gallery
            .iter()
            .map(|entry| Candidate {
                sample: entry.sample.clone(),
                distance: probe.cosine_distance(&entry.embedding),
            })
            .filter(|c| c.distance <= threshold)
            .collect();

        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding { values: values.to_vec(), model_version: None }
    }

    fn entry(sample: &str, values: &[f32]) -> GalleryEntry {
        GalleryEntry { sample: sample.into(), embedding: emb(values) }
    }

    #[test]
    fn test_cosine_distance_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        assert!(a.cosine_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_orthogonal_and_opposite() {
        let a = emb(&[1.0, 0.0]);
        assert!((a.cosine_distance(&emb(&[0.0, 1.0])) - 1.0).abs() < 1e-6);
        assert!((a.cosine_distance(&emb(&[-1.0, 0.0])) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_is_maximally_uncertain() {
        let a = emb(&[0.0, 0.0]);
        assert_eq!(a.similarity(&emb(&[1.0, 0.0])), 0.0);
        assert!((a.cosine_distance(&emb(&[1.0, 0.0])) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_ranks_nearest_first_and_applies_threshold() {
        let probe = emb(&[1.0, 0.0, 0.0]);
        let gallery = vec![
            entry("A/A_1.jpg", &[0.0, 1.0, 0.0]),
            entry("B/B_1.jpg", &[0.8, 0.6, 0.0]),
            entry("C/C.jpg", &[1.0, 0.0, 0.0]),
        ];

        let ranked = CosineMatcher.rank(&probe, &gallery, 0.6);
        assert_eq!(ranked.len(), 2, "orthogonal sample is beyond the threshold");
        assert_eq!(ranked[0].sample, "C/C.jpg");
        assert_eq!(ranked[1].sample, "B/B_1.jpg");
        assert!(ranked[0].distance <= ranked[1].distance);
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let probe = emb(&[1.0, 0.0]);
        assert!(CosineMatcher.rank(&probe, &[], 0.6).is_empty());
    }

    #[test]
    fn test_person_id_from_sample_path() {
        assert_eq!(person_id_from_sample_path("S1/S1_1.jpg").as_deref(), Some("S1"));
        assert_eq!(person_id_from_sample_path("faces/S1/S1.jpg").as_deref(), Some("S1"));
        assert_eq!(person_id_from_sample_path("faces\\ABC-12\\x.jpg").as_deref(), Some("ABC-12"));
        assert_eq!(person_id_from_sample_path("lonely.jpg"), None);
    }

    #[test]
    fn test_crop_rect_margin_and_clamp() {
        let face = BoundingBox {
            x: 10.0, y: 10.0, width: 20.0, height: 20.0, confidence: 0.9, landmarks: None,
        };
        assert_eq!(face.crop_rect(0.0, 100, 100), Some((10, 10, 20, 20)));
        // 20% margin = 4px each side
        assert_eq!(face.crop_rect(0.2, 100, 100), Some((6, 6, 28, 28)));
        // clamped to a small image
        assert_eq!(face.crop_rect(0.2, 25, 25), Some((6, 6, 19, 19)));
    }

    #[test]
    fn test_crop_rect_outside_image() {
        let face = BoundingBox {
            x: 200.0, y: 200.0, width: 20.0, height: 20.0, confidence: 0.9, landmarks: None,
        };
        assert_eq!(face.crop_rect(0.0, 100, 100), None);
    }
}
