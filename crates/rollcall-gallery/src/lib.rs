//! rollcall-gallery — on-disk face gallery, embedding cache and remote sync.
//!
//! The gallery is a directory per identity under one root. Everything the
//! service knows about enrolled people is derived from that tree; the
//! embedding cache is a disposable index over it.

pub mod cache;
pub mod naming;
pub mod remote;
pub mod store;
pub mod sync;

pub use cache::{CacheError, EmbeddingCache};
pub use naming::{person_id_from_object_name, validate_person_id, InvalidPersonId};
pub use remote::{RemoteBucket, RemoteError, RemoteObject, SupabaseBucket};
pub use store::{GalleryError, GalleryStore, RESERVED_DIR};
pub use sync::{synchronize, GallerySink, SyncError, SyncReport};
