//! rollcalld — face enrollment, recognition and gallery sync over HTTP.
//!
//! A single engine thread owns the face analyzer and the on-disk gallery;
//! axum handlers reach it through [`engine::EngineHandle`].

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod service;

pub use config::Config;
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use http::{router, HttpSettings};
pub use service::{FaceService, ServiceError};
