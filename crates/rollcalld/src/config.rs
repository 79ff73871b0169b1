use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by `ROLLCALL_CONFIG`,
/// then `ROLLCALL_*` / `SUPABASE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Socket address the HTTP server binds to.
    pub listen: String,
    /// Root of the on-disk face gallery.
    pub gallery_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum cosine distance for a gallery sample to count as a candidate.
    pub distance_threshold: f32,
    /// Request body limit; data-URL images are large.
    pub max_body_bytes: usize,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
    pub remote: RemoteConfig,
}

/// Remote bucket holding the source-of-truth face images.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub key: Option<String>,
    pub bucket: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5006".to_string(),
            gallery_dir: PathBuf::from("faces"),
            model_dir: rollcall_core::default_model_dir(),
            distance_threshold: 0.6,
            max_body_bytes: 16 * 1024 * 1024,
            cors_origins: Vec::new(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            key: None,
            bucket: "face-images".to_string(),
        }
    }
}

impl Config {
    /// Load `.env`, the optional config file, then environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }

        let mut config = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());

        if config.remote.url.is_none() || config.remote.key.is_none() {
            tracing::warn!("SUPABASE_URL or SUPABASE_ANON_KEY not set; /sync is disabled");
        }
        Ok(config)
    }

    /// Parse a TOML config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Override fields from variables returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_LISTEN") {
            self.listen = v;
        }
        if let Some(v) = lookup("ROLLCALL_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        self.distance_threshold = parsed(&lookup, "ROLLCALL_DISTANCE_THRESHOLD", self.distance_threshold);
        self.max_body_bytes = parsed(&lookup, "ROLLCALL_MAX_BODY_BYTES", self.max_body_bytes);
        if let Some(v) = lookup("ROLLCALL_CORS_ORIGINS") {
            self.cors_origins = v
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("ROLLCALL_BUCKET") {
            self.remote.bucket = v;
        }
        if let Some(v) = lookup("SUPABASE_URL").filter(|v| !v.is_empty()) {
            self.remote.url = Some(v);
        }
        if let Some(v) = lookup("SUPABASE_ANON_KEY").filter(|v| !v.is_empty()) {
            self.remote.key = Some(v);
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparseable setting");
            default
        }),
        None => default,
    }
}
