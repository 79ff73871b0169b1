use anyhow::{Context, Result};
use rollcall_core::OnnxAnalyzer;
use rollcall_gallery::{GalleryStore, RemoteBucket, SupabaseBucket};
use rollcalld::{router, spawn_engine, Config, FaceService, HttpSettings};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::load().context("failed to load configuration")?;

    let store = GalleryStore::open(&config.gallery_dir)
        .with_context(|| format!("cannot open gallery at {}", config.gallery_dir.display()))?;

    // Fail fast when the models are missing.
    let analyzer = OnnxAnalyzer::load(&config.model_dir)
        .with_context(|| format!("cannot load models from {}", config.model_dir.display()))?;
    tracing::info!(dir = %config.model_dir.display(), "face models loaded");

    let engine = spawn_engine(analyzer, store, config.distance_threshold)?;

    let bucket: Option<Arc<dyn RemoteBucket>> = match (&config.remote.url, &config.remote.key) {
        (Some(url), Some(key)) => {
            tracing::info!(url = %url, bucket = %config.remote.bucket, "remote bucket configured");
            Some(Arc::new(SupabaseBucket::new(url, key, &config.remote.bucket)))
        }
        _ => None,
    };

    let service = Arc::new(FaceService::new(engine, bucket));
    service.warmup().await;

    let settings = HttpSettings {
        max_body_bytes: config.max_body_bytes,
        cors_origins: config.cors_origins.clone(),
    };
    let app = router(service, &settings);

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("cannot bind {}", config.listen))?;
    tracing::info!(addr = %config.listen, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}
