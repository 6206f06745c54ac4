use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::embedding::ModelName;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SmartScanConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub models: ModelsConfig,
    pub indexing: IndexingConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ModelsConfig {
    pub image_encoder_model: ModelName,
    pub text_encoder_model: ModelName,
    pub cache_dir: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IndexingConfig {
    /// Items buffered before a store write.
    pub batch_size: usize,
    /// Maximum embedding calls in flight per run.
    pub workers: usize,
    /// Page size used when enumerating already-indexed ids.
    pub page_size: usize,
    pub image_extensions: Vec<String>,
    pub text_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
    /// Directories indexed by `smartscan index` when none are given.
    pub target_dirs: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum distance for a hit when the request does not carry a threshold.
    pub similarity_threshold: f32,
    pub n_results: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_smartscan_dir()
            .join("smartscan.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let cache_dir = default_smartscan_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            image_encoder_model: ModelName::Dinov2Small,
            text_encoder_model: ModelName::AllMiniLmL6V2,
            cache_dir,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            workers: 4,
            page_size: 100,
            image_extensions: strings(&["png", "jpg", "jpeg", "bmp", "webp"]),
            text_extensions: strings(&["txt", "md", "rst", "csv", "json", "html"]),
            video_extensions: strings(&["mp4", "mkv", "webm", "mov", "avi"]),
            target_dirs: Vec::new(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            n_results: 10,
        }
    }
}

impl IndexingConfig {
    /// Union of the three extension sets.
    pub fn all_extensions(&self) -> Vec<String> {
        self.image_extensions
            .iter()
            .chain(&self.text_extensions)
            .chain(&self.video_extensions)
            .cloned()
            .collect()
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Returns `~/.smartscan/`
pub fn default_smartscan_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".smartscan")
}

/// Returns the default config file path: `~/.smartscan/config.toml`
pub fn default_config_path() -> PathBuf {
    default_smartscan_dir().join("config.toml")
}

impl SmartScanConfig {
    /// Load config from the default TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            SmartScanConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Write the config as TOML. Uses atomic write (tmp + rename).
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let contents = toml::to_string(self).context("failed to serialize config")?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, contents)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path).context("failed to rename temp config file")?;

        info!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Apply environment variable overrides (SMARTSCAN_DB, SMARTSCAN_LOG_LEVEL, SMARTSCAN_PORT).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SMARTSCAN_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("SMARTSCAN_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("SMARTSCAN_PORT") {
            match val.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %val, "ignoring invalid SMARTSCAN_PORT"),
            }
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    /// Resolve the model cache directory, expanding `~` if needed.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        expand_tilde(&self.models.cache_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
