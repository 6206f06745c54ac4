//! Embedding providers for images and text.
//!
//! Providers follow an explicit lifecycle: [`Encoder::init`] loads the ONNX
//! session, `embed` turns one item into an L2-normalized vector, and
//! [`Encoder::close`] releases the session. Instances are created uninitialized
//! by a [`ProviderFactory`] and shared process-wide behind `Arc`.
//!
//! All methods are synchronous. Async callers go through
//! `tokio::task::spawn_blocking`.

pub mod clip;
pub mod dino;
pub mod frames;
pub mod minilm;
pub mod preprocess;

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What kind of input a model embeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Image,
    Text,
}

/// Registry of supported embedding models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelName {
    #[serde(rename = "clip-vit-b-32-image")]
    ClipVitB32Image,
    #[serde(rename = "dinov2-small")]
    Dinov2Small,
    #[serde(rename = "clip-vit-b-32-text")]
    ClipVitB32Text,
    #[serde(rename = "all-minilm-l6-v2")]
    AllMiniLmL6V2,
}

/// Public download location for a model's files.
pub struct ModelSource {
    pub model_url: &'static str,
    pub tokenizer_url: Option<&'static str>,
}

impl ModelName {
    pub const ALL: [ModelName; 4] = [
        Self::ClipVitB32Image,
        Self::Dinov2Small,
        Self::ClipVitB32Text,
        Self::AllMiniLmL6V2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClipVitB32Image => "clip-vit-b-32-image",
            Self::Dinov2Small => "dinov2-small",
            Self::ClipVitB32Text => "clip-vit-b-32-text",
            Self::AllMiniLmL6V2 => "all-minilm-l6-v2",
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Self::ClipVitB32Image | Self::Dinov2Small => ModelKind::Image,
            Self::ClipVitB32Text | Self::AllMiniLmL6V2 => ModelKind::Text,
        }
    }

    /// Output vector length.
    pub fn dimensions(&self) -> usize {
        match self {
            Self::ClipVitB32Image | Self::ClipVitB32Text => 512,
            Self::Dinov2Small | Self::AllMiniLmL6V2 => 384,
        }
    }

    /// ONNX file name inside the model cache directory.
    pub fn onnx_file(&self) -> &'static str {
        match self {
            Self::ClipVitB32Image => "clip_image_encoder_quant.onnx",
            Self::Dinov2Small => "dinov2_small_quant.onnx",
            Self::ClipVitB32Text => "clip_text_encoder_quant.onnx",
            Self::AllMiniLmL6V2 => "minilm_sentence_transformer_quant.onnx",
        }
    }

    /// Tokenizer file name for text models.
    pub fn tokenizer_file(&self) -> Option<&'static str> {
        match self {
            Self::ClipVitB32Text => Some("clip_tokenizer.json"),
            Self::AllMiniLmL6V2 => Some("minilm_tokenizer.json"),
            Self::ClipVitB32Image | Self::Dinov2Small => None,
        }
    }

    /// Where `smartscan model download` fetches this model from, if anywhere.
    pub fn source(&self) -> Option<ModelSource> {
        match self {
            Self::AllMiniLmL6V2 => Some(ModelSource {
                model_url: "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx",
                tokenizer_url: Some(
                    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json",
                ),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown model: {s}"))
    }
}

/// Lifecycle shared by every provider.
pub trait Encoder: Send + Sync {
    /// Load the model session. Calling `init` on an initialized provider is a no-op.
    fn init(&self) -> Result<()>;

    /// Release the model session. `embed` fails until `init` is called again.
    fn close(&self);

    fn model(&self) -> ModelName;

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        self.model().dimensions()
    }
}

/// Embeds decoded images. Video frames go through the same provider.
pub trait ImageEmbeddingProvider: Encoder {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>>;
}

/// Embeds text.
pub trait TextEmbeddingProvider: Encoder {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Builds uninitialized providers for a model name.
pub trait ProviderFactory: Send + Sync {
    fn image_provider(&self, model: ModelName) -> Result<Arc<dyn ImageEmbeddingProvider>>;
    fn text_provider(&self, model: ModelName) -> Result<Arc<dyn TextEmbeddingProvider>>;
}

/// Creates ONNX Runtime providers reading model files from `cache_dir`.
pub struct OnnxProviderFactory {
    cache_dir: PathBuf,
}

impl OnnxProviderFactory {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }
}

impl ProviderFactory for OnnxProviderFactory {
    fn image_provider(&self, model: ModelName) -> Result<Arc<dyn ImageEmbeddingProvider>> {
        match model {
            ModelName::ClipVitB32Image => {
                Ok(Arc::new(clip::ClipImageEmbedder::new(&self.cache_dir)))
            }
            ModelName::Dinov2Small => Ok(Arc::new(dino::DinoSmallV2ImageEmbedder::new(
                &self.cache_dir,
            ))),
            other => anyhow::bail!("{other} is not an image model"),
        }
    }

    fn text_provider(&self, model: ModelName) -> Result<Arc<dyn TextEmbeddingProvider>> {
        match model {
            ModelName::AllMiniLmL6V2 => Ok(Arc::new(minilm::MiniLmTextEmbedder::new(
                &self.cache_dir,
            ))),
            ModelName::ClipVitB32Text => {
                Ok(Arc::new(clip::ClipTextEmbedder::new(&self.cache_dir)))
            }
            other => anyhow::bail!("{other} is not a text model"),
        }
    }
}

/// Build an ONNX session from a model file.
pub(crate) fn load_session(model_path: &Path) -> Result<Session> {
    anyhow::ensure!(
        model_path.exists(),
        "ONNX model not found at {}. Run `smartscan model download` or place the file there.",
        model_path.display()
    );

    let session = Session::builder()?
        .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(model_path)
        .context("failed to load ONNX model")?;

    tracing::info!(model = %model_path.display(), "ONNX model loaded");
    Ok(session)
}

/// L2-normalize a vector. Returns a zero vector if the input norm is zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
