use async_trait::async_trait;
use image::{imageops, DynamicImage, GrayImage};
use rollcall_core::{AnalyzerError, CosineMatcher, Embedding, FaceAnalyzer, GalleryEntry, MatchResult, Matcher};
use rollcall_gallery::{CacheError, EmbeddingCache, GalleryError, GallerySink, GalleryStore, SyncError};
use std::collections::BTreeSet;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Margin added around each detected face before it is stored, as a
/// fraction of the box size on every side.
const ENROLL_CROP_MARGIN: f32 = 0.2;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("embedding cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("failed to start engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Enroll {
        person_id: String,
        image: DynamicImage,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Recognize {
        image: DynamicImage,
        reply: oneshot::Sender<Result<Vec<MatchResult>, EngineError>>,
    },
    StoreCanonical {
        person_id: String,
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Prune {
        keep: BTreeSet<String>,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    InvalidateCache {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Warmup {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Detect faces in `image` and store each one as a new sample of `person_id`.
    /// Returns the number of samples stored.
    pub async fn enroll(&self, person_id: String, image: DynamicImage) -> Result<usize, EngineError> {
        self.call(|reply| EngineRequest::Enroll { person_id, image, reply }).await?
    }

    /// Best gallery match for every detected face of `image`.
    pub async fn recognize(&self, image: DynamicImage) -> Result<Vec<MatchResult>, EngineError> {
        self.call(|reply| EngineRequest::Recognize { image, reply }).await?
    }

    /// Overwrite the canonical sample of `person_id`.
    pub async fn store_canonical(&self, person_id: String, bytes: Vec<u8>) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::StoreCanonical { person_id, bytes, reply }).await?
    }

    /// Delete every identity not in `keep`.
    pub async fn prune(&self, keep: BTreeSet<String>) -> Result<usize, EngineError> {
        self.call(|reply| EngineRequest::Prune { keep, reply }).await?
    }

    /// Drop the in-memory and on-disk embedding cache.
    pub async fn invalidate_cache(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::InvalidateCache { reply }).await?
    }

    /// Clear any residual cache and rebuild it from one sample.
    /// Failures inside the engine are logged, not returned.
    pub async fn warmup(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::Warmup { reply }).await
    }
}

#[async_trait]
impl GallerySink for EngineHandle {
    async fn store_canonical(&self, person_id: &str, bytes: Vec<u8>) -> Result<(), SyncError> {
        EngineHandle::store_canonical(self, person_id.to_string(), bytes)
            .await
            .map_err(|e| SyncError::Gallery(e.to_string()))
    }

    async fn prune_except(&self, keep: BTreeSet<String>) -> Result<usize, SyncError> {
        self.prune(keep).await.map_err(|e| SyncError::Gallery(e.to_string()))
    }

    async fn invalidate_cache(&self) -> Result<(), SyncError> {
        EngineHandle::invalidate_cache(self)
            .await
            .map_err(|e| SyncError::Gallery(e.to_string()))
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the analyzer, the gallery store and the in-memory
/// embedding cache, so every gallery read or write is serialized.
pub fn spawn_engine<A: FaceAnalyzer>(
    analyzer: A,
    store: GalleryStore,
    distance_threshold: f32,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);
    let mut engine = Engine {
        analyzer,
        store,
        cache: None,
        distance_threshold,
    };

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!(
                model = engine.analyzer.model_name(),
                gallery = %engine.store.root().display(),
                "engine thread started"
            );
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { person_id, image, reply } => {
                        let _ = reply.send(engine.enroll(&person_id, &image));
                    }
                    EngineRequest::Recognize { image, reply } => {
                        let _ = reply.send(engine.recognize(&image.to_luma8()));
                    }
                    EngineRequest::StoreCanonical { person_id, bytes, reply } => {
                        let _ = reply.send(engine.store_canonical(&person_id, &bytes));
                    }
                    EngineRequest::Prune { keep, reply } => {
                        let _ = reply.send(engine.prune(&keep));
                    }
                    EngineRequest::InvalidateCache { reply } => {
                        let _ = reply.send(engine.invalidate_cache());
                    }
                    EngineRequest::Warmup { reply } => {
                        engine.warmup();
                        let _ = reply.send(());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

struct Engine<A> {
    analyzer: A,
    store: GalleryStore,
    cache: Option<EmbeddingCache>,
    distance_threshold: f32,
}

impl<A: FaceAnalyzer> Engine<A> {
    /// Crop every detected face and store it as a sample.
    fn enroll(&mut self, person_id: &str, image: &DynamicImage) -> Result<usize, EngineError> {
        let gray = image.to_luma8();
        let faces = self.analyzer.detect(&gray)?;
        if faces.is_empty() {
            return Err(EngineError::NoFaceDetected);
        }

        // Earlier samples stay on disk if a later write fails.
        self.invalidate_cache()?;

        let mut stored = 0;
        for face in &faces {
            let Some((x, y, w, h)) = face.crop_rect(ENROLL_CROP_MARGIN, gray.width(), gray.height()) else {
                continue;
            };
            let crop = imageops::crop_imm(&gray, x, y, w, h).to_image();
            self.store.add_sample(person_id, &DynamicImage::ImageLuma8(crop))?;
            stored += 1;
        }
        if stored == 0 {
            return Err(EngineError::NoFaceDetected);
        }

        tracing::info!(person_id, faces = stored, "enrolled");
        Ok(stored)
    }

    /// Probe faces are embedded first; the gallery side comes from the cache.
    fn recognize(&mut self, gray: &GrayImage) -> Result<Vec<MatchResult>, EngineError> {
        if self.store.is_empty()? {
            tracing::debug!("gallery empty; nothing to match");
            return Ok(Vec::new());
        }

        let faces = self.analyzer.detect(gray)?;
        if faces.is_empty() {
            tracing::debug!("no face in probe image");
            return Ok(Vec::new());
        }
        let probes = faces
            .iter()
            .map(|face| self.analyzer.embed(gray, Some(face)))
            .collect::<Result<Vec<Embedding>, _>>()?;

        let threshold = self.distance_threshold;
        let gallery = self.gallery_entries()?;
        let mut results = Vec::new();
        for probe in &probes {
            let Some(best) = CosineMatcher.rank(probe, gallery, threshold).into_iter().next() else {
                continue;
            };
            let Some(person_id) = best.person_id() else {
                tracing::warn!(sample = %best.sample, "matched sample has no identity directory");
                continue;
            };
            tracing::info!(person_id = %person_id, distance = best.distance, "face recognized");
            results.push(MatchResult { person_id, distance: best.distance });
        }
        Ok(results)
    }

    fn gallery_entries(&mut self) -> Result<&[GalleryEntry], EngineError> {
        if self.cache.is_none() {
            self.cache = Some(EmbeddingCache::load_or_build(&self.store, &mut self.analyzer)?);
        }
        Ok(self.cache.as_ref().map(|c| c.entries.as_slice()).unwrap_or_default())
    }

    fn store_canonical(&mut self, person_id: &str, bytes: &[u8]) -> Result<(), EngineError> {
        self.cache = None;
        self.store.write_canonical(person_id, bytes)?;
        Ok(())
    }

    fn prune(&mut self, keep: &BTreeSet<String>) -> Result<usize, EngineError> {
        self.cache = None;
        Ok(self.store.prune_identities_not_in(keep)?)
    }

    fn invalidate_cache(&mut self) -> Result<(), EngineError> {
        self.cache = None;
        self.store.invalidate_embedding_cache()?;
        Ok(())
    }

    /// Rebuild the cache from scratch, then match one stored sample against it.
    fn warmup(&mut self) {
        let started = std::time::Instant::now();
        if let Err(e) = self.try_warmup() {
            tracing::warn!(error = %e, "warmup failed; cache will be built on first request");
            return;
        }
        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "warmup complete");
    }

    fn try_warmup(&mut self) -> Result<(), EngineError> {
        self.invalidate_cache()?;
        let Some(sample) = self.store.samples()?.into_iter().next() else {
            tracing::info!("gallery empty; skipping warmup");
            return Ok(());
        };
        let entries = self.gallery_entries()?.len();
        tracing::debug!(entries, "warmup built embedding cache");

        let image = self.store.load_sample(&sample)?;
        let matches = self.recognize(&image.to_luma8())?;
        tracing::debug!(sample = %sample, matches = matches.len(), "warmup probe done");
        Ok(())
    }
}
