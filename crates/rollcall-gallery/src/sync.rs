//! Reconcile the local gallery against the remote bucket.
//!
//! The remote listing is the source of truth. Every object is re-downloaded
//! on every run, identities absent remotely are pruned, and the embedding
//! cache is dropped both before and after the run. A failure part way through
//! leaves already-written samples in place.

use crate::naming::{is_placeholder, person_id_from_object_name, validate_person_id};
use crate::remote::{RemoteBucket, RemoteError};
use crate::store::{GalleryError, GalleryStore};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("gallery update failed: {0}")]
    Gallery(String),
}

impl From<GalleryError> for SyncError {
    fn from(e: GalleryError) -> Self {
        SyncError::Gallery(e.to_string())
    }
}

/// Outcome of a completed sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Distinct identities present remotely.
    pub active: usize,
    /// Local identities deleted because they are gone remotely.
    pub pruned: usize,
    /// Raw length of the remote listing, placeholders included.
    pub total_files: usize,
}

/// Where synchronized samples are written.
///
/// Implemented directly by [`GalleryStore`], and by the daemon's engine
/// handle so that writes are serialized with recognition.
#[async_trait]
pub trait GallerySink: Send + Sync {
    async fn store_canonical(&self, person_id: &str, bytes: Vec<u8>) -> Result<(), SyncError>;
    async fn prune_except(&self, keep: BTreeSet<String>) -> Result<usize, SyncError>;
    async fn invalidate_cache(&self) -> Result<(), SyncError>;
}

#[async_trait]
impl GallerySink for GalleryStore {
    async fn store_canonical(&self, person_id: &str, bytes: Vec<u8>) -> Result<(), SyncError> {
        self.write_canonical(person_id, &bytes)?;
        Ok(())
    }

    async fn prune_except(&self, keep: BTreeSet<String>) -> Result<usize, SyncError> {
        Ok(self.prune_identities_not_in(&keep)?)
    }

    async fn invalidate_cache(&self) -> Result<(), SyncError> {
        self.invalidate_embedding_cache()?;
        Ok(())
    }
}

/// Map each derivable personId to the remote object that supplies it.
///
/// When several objects derive the same personId the last one listed wins.
fn identity_sources(names: &[String]) -> BTreeMap<String, String> {
    let mut sources = BTreeMap::new();
    for name in names {
        if is_placeholder(name) {
            continue;
        }
        let person_id = person_id_from_object_name(name);
        if let Err(e) = validate_person_id(&person_id) {
            tracing::warn!(object = %name, error = %e, "skipping remote object with unusable name");
            continue;
        }
        sources.insert(person_id, name.clone());
    }
    sources
}

/// Run one reconciliation pass of `sink` against `bucket`.
pub async fn synchronize<B, S>(bucket: &B, sink: &S) -> Result<SyncReport, SyncError>
where
    B: RemoteBucket + ?Sized,
    S: GallerySink + ?Sized,
{
    sink.invalidate_cache().await?;

    let names: Vec<String> = bucket.list().await?.into_iter().map(|o| o.name).collect();
    let total_files = names.len();
    let sources = identity_sources(&names);
    tracing::info!(total_files, identities = sources.len(), "fetched remote listing");

    for (person_id, object) in &sources {
        let bytes = bucket.download(object).await?;
        tracing::debug!(person_id, object = %object, bytes = bytes.len(), "downloaded face image");
        sink.store_canonical(person_id, bytes).await?;
    }

    let active = sources.len();
    let keep: BTreeSet<String> = sources.into_keys().collect();
    let pruned = sink.prune_except(keep).await?;
    sink.invalidate_cache().await?;

    tracing::info!(active, pruned, total_files, "sync complete");
    Ok(SyncReport { active, pruned, total_files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteObject;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Mutex;

    /// In-memory bucket; downloads of names in `broken` fail.
    #[derive(Default)]
    struct FakeBucket {
        objects: Vec<(String, Vec<u8>)>,
        broken: Vec<String>,
        downloads: Mutex<HashMap<String, usize>>,
    }

    impl FakeBucket {
        fn with(names: &[&str]) -> Self {
            Self {
                objects: names.iter().map(|n| (n.to_string(), n.as_bytes().to_vec())).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RemoteBucket for FakeBucket {
        async fn list(&self) -> Result<Vec<RemoteObject>, RemoteError> {
            Ok(self.objects.iter().map(|(n, _)| RemoteObject::new(n.clone())).collect())
        }

        async fn download(&self, name: &str) -> Result<Vec<u8>, RemoteError> {
            *self.downloads.lock().unwrap().entry(name.to_string()).or_default() += 1;
            if self.broken.iter().any(|b| b == name) {
                return Err(RemoteError::Status {
                    url: name.to_string(),
                    status: 500,
                    body: "boom".into(),
                });
            }
            self.objects
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, b)| b.clone())
                .ok_or(RemoteError::Status { url: name.to_string(), status: 404, body: String::new() })
        }
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_sync_mirrors_remote_identities() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        store.write_canonical("Gone", b"old").unwrap();

        let bucket = FakeBucket::with(&[
            "ABC123-202501011200.jpg",
            "ABC-12.jpg",
            ".emptyFolderPlaceholder",
        ]);
        let report = synchronize(&bucket, &store).await.unwrap();

        assert_eq!(report, SyncReport { active: 2, pruned: 1, total_files: 3 });
        assert_eq!(store.list_identities().unwrap(), set(&["ABC-12", "ABC123"]));
        assert_eq!(
            fs::read(dir.path().join("ABC123/ABC123.jpg")).unwrap(),
            b"ABC123-202501011200.jpg"
        );
    }

    #[tokio::test]
    async fn test_second_sync_is_idempotent_and_redownloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        let bucket = FakeBucket::with(&["S1-1731400000000.png", "S2.jpg"]);

        let first = synchronize(&bucket, &store).await.unwrap();
        let second = synchronize(&bucket, &store).await.unwrap();

        assert_eq!(first.active, 2);
        assert_eq!(second.active, first.active);
        assert_eq!(second.pruned, 0);
        assert_eq!(bucket.downloads.lock().unwrap()["S2.jpg"], 2);
    }

    #[tokio::test]
    async fn test_empty_listing_prunes_everything_but_reserved_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        store.write_canonical("A", b"a").unwrap();
        store.write_canonical("B", b"b").unwrap();
        store.staging_dir().unwrap();

        let report = synchronize(&FakeBucket::default(), &store).await.unwrap();

        assert_eq!(report, SyncReport { active: 0, pruned: 2, total_files: 0 });
        assert!(store.list_identities().unwrap().is_empty());
        assert!(dir.path().join(crate::store::RESERVED_DIR).is_dir());
    }

    #[tokio::test]
    async fn test_sync_removes_cache_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        fs::write(store.cache_path("arcface"), b"{}").unwrap();

        synchronize(&FakeBucket::with(&["S1.jpg"]), &store).await.unwrap();
        assert!(!store.cache_path("arcface").exists());
    }

    #[tokio::test]
    async fn test_duplicate_identity_last_object_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        let bucket = FakeBucket::with(&["S1-202501011200.jpg", "S1-202601011200.jpg"]);

        let report = synchronize(&bucket, &store).await.unwrap();
        assert_eq!(report.active, 1);
        assert_eq!(fs::read(dir.path().join("S1/S1.jpg")).unwrap(), b"S1-202601011200.jpg");
    }

    #[tokio::test]
    async fn test_unusable_remote_names_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        let bucket = FakeBucket::with(&[".hidden.jpg", "S1.jpg"]);

        let report = synchronize(&bucket, &store).await.unwrap();
        assert_eq!(report.active, 1);
        assert_eq!(report.total_files, 2);
        assert_eq!(store.list_identities().unwrap(), set(&["S1"]));
    }

    #[tokio::test]
    async fn test_download_failure_keeps_partial_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        store.write_canonical("Old", b"x").unwrap();
        fs::write(store.cache_path("arcface"), b"{}").unwrap();

        // identities are processed in sorted order: A succeeds, B fails
        let mut bucket = FakeBucket::with(&["A.jpg", "B.jpg"]);
        bucket.broken.push("B.jpg".into());

        let err = synchronize(&bucket, &store).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::Status { status: 500, .. })));
        assert!(err.to_string().contains("boom"));

        assert!(dir.path().join("A/A.jpg").exists());
        assert!(dir.path().join("Old").is_dir(), "pruning never ran");
        assert!(!store.cache_path("arcface").exists());
    }
}
