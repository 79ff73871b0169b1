//! Directory-per-identity face gallery.
//!
//! Layout under the gallery root:
//!
//! ```text
//! faces/
//!   <personId>/<personId>_<n>.jpg   enrolled samples
//!   <personId>/<personId>.jpg       canonical copy from remote sync
//!   representations_<model>.json    embedding cache
//!   .cache/                         reserved staging dir, never an identity
//! ```

use crate::naming::{validate_person_id, InvalidPersonId};
use image::{DynamicImage, ImageFormat};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reserved subdirectory of the gallery root; never treated as an identity.
pub const RESERVED_DIR: &str = ".cache";

const CACHE_PREFIX: &str = "representations_";
const CACHE_SUFFIX: &str = ".json";
const SAMPLE_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("invalid personId: {0}")]
    InvalidPersonId(#[from] InvalidPersonId),
    #[error("gallery I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode sample {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to decode sample {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> GalleryError + '_ {
    move |source| GalleryError::Io { path: path.to_path_buf(), source }
}

/// Filesystem-backed face gallery.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    root: PathBuf,
}

impl GalleryStore {
    /// Open (creating if needed) the gallery rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(io_err(&root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for staging files before an atomic rename into the gallery.
    pub fn staging_dir(&self) -> Result<PathBuf, GalleryError> {
        let dir = self.root.join(RESERVED_DIR);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        Ok(dir)
    }

    fn identity_dir(&self, person_id: &str) -> Result<PathBuf, GalleryError> {
        validate_person_id(person_id)?;
        let dir = self.root.join(person_id);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        Ok(dir)
    }

    /// Store an enrolled face as a new JPEG sample under `person_id`.
    ///
    /// The file is named `<personId>_<n>.jpg`, with `n` starting one past the
    /// current file count and advancing past any existing name.
    pub fn add_sample(&self, person_id: &str, face: &DynamicImage) -> Result<PathBuf, GalleryError> {
        let dir = self.identity_dir(person_id)?;
        let existing = fs::read_dir(&dir).map_err(io_err(&dir))?.count();

        let mut n = existing + 1;
        let mut path = dir.join(format!("{person_id}_{n}.{SAMPLE_EXTENSION}"));
        while path.exists() {
            n += 1;
            path = dir.join(format!("{person_id}_{n}.{SAMPLE_EXTENSION}"));
        }

        // JPEG has no alpha channel.
        let encodable = match face {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => face.clone(),
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };
        encodable
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|source| GalleryError::Encode { path: path.clone(), source })?;

        tracing::info!(person_id, path = %path.display(), "saved face sample");
        Ok(path)
    }

    /// Overwrite the canonical sample `<personId>/<personId>.jpg` with raw bytes.
    pub fn write_canonical(&self, person_id: &str, bytes: &[u8]) -> Result<PathBuf, GalleryError> {
        let dir = self.identity_dir(person_id)?;
        let path = dir.join(format!("{person_id}.{SAMPLE_EXTENSION}"));
        fs::write(&path, bytes).map_err(io_err(&path))?;
        tracing::debug!(person_id, path = %path.display(), "wrote canonical sample");
        Ok(path)
    }

    /// Identity directory names, excluding the reserved cache directory.
    ///
    /// Directories whose names are not valid UTF-8 cannot be identities;
    /// they are logged here and removed by the next prune.
    pub fn list_identities(&self) -> Result<BTreeSet<String>, GalleryError> {
        let mut identities = BTreeSet::new();
        for (path, name) in self.identity_dirs()? {
            match name {
                Some(name) => {
                    identities.insert(name);
                }
                None => tracing::warn!(path = %path.display(), "ignoring directory with non-UTF-8 name"),
            }
        }
        Ok(identities)
    }

    /// Subdirectories of the root other than the reserved one, with their
    /// UTF-8 name when they have one.
    fn identity_dirs(&self) -> Result<Vec<(PathBuf, Option<String>)>, GalleryError> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let entry = entry.map_err(io_err(&self.root))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_str().map(String::from);
            if name.as_deref() == Some(RESERVED_DIR) {
                continue;
            }
            dirs.push((entry.path(), name));
        }
        Ok(dirs)
    }

    /// Number of sample files stored for `person_id` (0 if unknown).
    pub fn sample_count(&self, person_id: &str) -> Result<usize, GalleryError> {
        let dir = self.root.join(person_id);
        if !dir.is_dir() {
            return Ok(0);
        }
        Ok(sample_files(&dir)?.len())
    }

    /// All sample paths relative to the root (`<personId>/<file>`), sorted.
    pub fn samples(&self) -> Result<Vec<String>, GalleryError> {
        let mut samples = Vec::new();
        for person_id in self.list_identities()? {
            for file in sample_files(&self.root.join(&person_id))? {
                samples.push(format!("{person_id}/{file}"));
            }
        }
        samples.sort();
        Ok(samples)
    }

    /// True when no identity holds any sample.
    pub fn is_empty(&self) -> Result<bool, GalleryError> {
        for person_id in self.list_identities()? {
            if !sample_files(&self.root.join(&person_id))?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Absolute path of a sample returned by [`samples`](Self::samples).
    pub fn sample_path(&self, sample: &str) -> PathBuf {
        self.root.join(sample)
    }

    /// Decode a stored sample. The format is sniffed from the content, since
    /// synced files keep a `.jpg` name whatever the remote encoding was.
    pub fn load_sample(&self, sample: &str) -> Result<DynamicImage, GalleryError> {
        let path = self.sample_path(sample);
        let bytes = fs::read(&path).map_err(io_err(&path))?;
        image::load_from_memory(&bytes).map_err(|source| GalleryError::Decode { path, source })
    }

    /// Recursively delete every identity not in `keep`, along with any
    /// directory whose name is not valid UTF-8. Returns the number deleted.
    pub fn prune_identities_not_in(&self, keep: &BTreeSet<String>) -> Result<usize, GalleryError> {
        let mut deleted = 0;
        for (dir, name) in self.identity_dirs()? {
            match &name {
                Some(person_id) if keep.contains(person_id) => continue,
                Some(person_id) => tracing::info!(person_id, "removing identity no longer present remotely"),
                None => tracing::warn!(path = %dir.display(), "removing directory with non-UTF-8 name"),
            }
            fs::remove_dir_all(&dir).map_err(io_err(&dir))?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Path of the embedding cache file for `model`.
    pub fn cache_path(&self, model: &str) -> PathBuf {
        self.root.join(format!("{CACHE_PREFIX}{model}{CACHE_SUFFIX}"))
    }

    /// Remove every embedding cache file in the root. Returns how many were removed.
    ///
    /// A gallery without cache files is not an error.
    pub fn invalidate_embedding_cache(&self) -> Result<usize, GalleryError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let entry = entry.map_err(io_err(&self.root))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !(name.starts_with(CACHE_PREFIX) && name.ends_with(CACHE_SUFFIX)) {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&path)(e)),
            }
        }
        if removed > 0 {
            tracing::info!(removed, "cleared embedding cache");
        }
        Ok(removed)
    }
}

/// Regular, non-hidden files of an identity directory, sorted by name.
fn sample_files(dir: &Path) -> Result<Vec<String>, GalleryError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                files.push(name.to_string());
            }
        }
    }
    files.sort();
    Ok(files)
}
