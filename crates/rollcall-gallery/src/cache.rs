//! Embedding cache: one embedding per gallery sample, persisted as JSON.
//!
//! The cache is derived data. It is thrown away whenever the sample set
//! changes and rebuilt lazily on the next recognition. A fingerprint of the
//! sample set is stored alongside the embeddings so a cache left behind by a
//! mutation that skipped invalidation is still detected as stale.

use crate::store::{GalleryError, GalleryStore};
use chrono::{DateTime, Utc};
use rollcall_core::{AnalyzerError, FaceAnalyzer, GalleryEntry};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cache serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Embeddings for every sample of the gallery, for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingCache {
    pub model: String,
    pub built_at: DateTime<Utc>,
    pub fingerprint: String,
    pub entries: Vec<GalleryEntry>,
}

impl EmbeddingCache {
    /// Read the persisted cache for `model`, if present and still current.
    pub fn load(store: &GalleryStore, model: &str) -> Result<Option<Self>, CacheError> {
        let path = store.cache_path(model);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        let cache: Self = match serde_json::from_slice(&raw) {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding unreadable embedding cache");
                return Ok(None);
            }
        };

        let current = fingerprint(store)?;
        if cache.model != model || cache.fingerprint != current {
            tracing::info!(path = %path.display(), "embedding cache is stale");
            return Ok(None);
        }
        Ok(Some(cache))
    }

    /// Embed every sample in the gallery.
    ///
    /// Samples with no detectable face are embedded as a whole image; samples
    /// that cannot be decoded are skipped with a warning.
    pub fn build<A: FaceAnalyzer + ?Sized>(
        store: &GalleryStore,
        analyzer: &mut A,
    ) -> Result<Self, CacheError> {
        let fingerprint = fingerprint(store)?;
        let samples = store.samples()?;
        let started = std::time::Instant::now();

        let mut entries = Vec::with_capacity(samples.len());
        for sample in samples {
            let gray = match store.load_sample(&sample) {
                Ok(img) => img.to_luma8(),
                Err(e) => {
                    tracing::warn!(sample = %sample, error = %e, "skipping undecodable sample");
                    continue;
                }
            };

            let faces = analyzer.detect(&gray)?;
            let embedding = analyzer.embed(&gray, faces.first())?;
            entries.push(GalleryEntry { sample, embedding });
        }

        tracing::info!(
            model = analyzer.model_name(),
            entries = entries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built embedding cache"
        );

        Ok(Self {
            model: analyzer.model_name().to_string(),
            built_at: Utc::now(),
            fingerprint,
            entries,
        })
    }

    /// Persist atomically: stage in the reserved directory, then rename.
    pub fn save(&self, store: &GalleryStore) -> Result<PathBuf, CacheError> {
        let target = store.cache_path(&self.model);
        let staged = store
            .staging_dir()?
            .join(format!("{}.{}.tmp", self.model, uuid::Uuid::new_v4()));

        let body = serde_json::to_vec(self)?;
        fs::write(&staged, body).map_err(|source| CacheError::Io { path: staged.clone(), source })?;
        fs::rename(&staged, &target).map_err(|source| {
            let _ = fs::remove_file(&staged);
            CacheError::Io { path: target.clone(), source }
        })?;
        Ok(target)
    }

    /// Load the persisted cache, or build and persist a fresh one.
    pub fn load_or_build<A: FaceAnalyzer + ?Sized>(
        store: &GalleryStore,
        analyzer: &mut A,
    ) -> Result<Self, CacheError> {
        if let Some(cache) = Self::load(store, analyzer.model_name())? {
            return Ok(cache);
        }
        let cache = Self::build(store, analyzer)?;
        cache.save(store)?;
        Ok(cache)
    }
}

/// SHA-256 over the sorted sample list with each file's size and mtime.
pub fn fingerprint(store: &GalleryStore) -> Result<String, CacheError> {
    let mut hasher = Sha256::new();
    for sample in store.samples()? {
        let path = store.sample_path(&sample);
        let meta = fs::metadata(&path).map_err(|source| CacheError::Io { path, source })?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        hasher.update(sample.as_bytes());
        hasher.update([0u8]);
        hasher.update(meta.len().to_le_bytes());
        hasher.update(mtime.to_le_bytes());
    }
    Ok(hasher.finalize().iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma};
    use rollcall_core::{BoundingBox, Embedding};

    /// Embeds an image as its mean brightness; reports one face per image.
    struct MeanAnalyzer {
        embeds: usize,
    }

    impl FaceAnalyzer for MeanAnalyzer {
        fn model_name(&self) -> &str {
            "mean"
        }

        fn detect(&mut self, image: &GrayImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
            Ok(vec![BoundingBox {
                x: 0.0,
                y: 0.0,
                width: image.width() as f32,
                height: image.height() as f32,
                confidence: 0.99,
                landmarks: None,
            }])
        }

        fn embed(&mut self, image: &GrayImage, _face: Option<&BoundingBox>) -> Result<Embedding, AnalyzerError> {
            self.embeds += 1;
            let mean = image.pixels().map(|p| p[0] as f32).sum::<f32>() / image.len() as f32;
            Ok(Embedding { values: vec![mean, 255.0 - mean], model_version: None })
        }
    }

    fn sample(value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(12, 12, Luma([value])))
    }

    #[test]
    fn test_build_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        store.add_sample("A", &sample(10)).unwrap();
        store.add_sample("B", &sample(200)).unwrap();

        let mut analyzer = MeanAnalyzer { embeds: 0 };
        let built = EmbeddingCache::load_or_build(&store, &mut analyzer).unwrap();
        assert_eq!(built.entries.len(), 2);
        assert_eq!(analyzer.embeds, 2);
        assert!(store.cache_path("mean").exists());

        // second call is served from disk
        let reloaded = EmbeddingCache::load_or_build(&store, &mut analyzer).unwrap();
        assert_eq!(analyzer.embeds, 2);
        assert_eq!(reloaded.fingerprint, built.fingerprint);
        assert_eq!(reloaded.entries[0].sample, "A/A_1.jpg");
    }

    #[test]
    fn test_mutation_makes_cache_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        store.add_sample("A", &sample(10)).unwrap();

        let mut analyzer = MeanAnalyzer { embeds: 0 };
        EmbeddingCache::load_or_build(&store, &mut analyzer).unwrap();

        store.add_sample("B", &sample(200)).unwrap();
        assert!(EmbeddingCache::load(&store, "mean").unwrap().is_none());

        let rebuilt = EmbeddingCache::load_or_build(&store, &mut analyzer).unwrap();
        assert_eq!(rebuilt.entries.len(), 2);
    }

    #[test]
    fn test_garbage_cache_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        fs::write(store.cache_path("mean"), b"not json").unwrap();
        assert!(EmbeddingCache::load(&store, "mean").unwrap().is_none());
    }

    #[test]
    fn test_undecodable_sample_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        store.write_canonical("Broken", b"not an image").unwrap();
        store.add_sample("A", &sample(10)).unwrap();

        let mut analyzer = MeanAnalyzer { embeds: 0 };
        let cache = EmbeddingCache::build(&store, &mut analyzer).unwrap();
        let samples: Vec<&str> = cache.entries.iter().map(|e| e.sample.as_str()).collect();
        assert_eq!(samples, vec!["A/A_1.jpg"]);
    }

    #[test]
    fn test_fingerprint_of_empty_gallery_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        assert_eq!(fingerprint(&store).unwrap(), fingerprint(&store).unwrap());
        assert_eq!(fingerprint(&store).unwrap().len(), 64);
    }
}
