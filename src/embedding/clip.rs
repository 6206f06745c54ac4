//! CLIP ViT-B/32 image and text providers (512 dimensions, shared space).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::preprocess::{to_tensor, CLIP_NORM};
use super::{
    l2_normalize, load_session, Encoder, ImageEmbeddingProvider, ModelName,
    TextEmbeddingProvider,
};

/// CLIP's fixed text context length.
const CONTEXT_LEN: usize = 77;

/// Validate the single `[1, 512]` CLIP output and normalize it.
fn pooled_embedding(dims: &[i64], data: &[f32], model: ModelName) -> Result<Vec<f32>> {
    let expected = model.dimensions();
    anyhow::ensure!(
        dims.len() == 2 && dims[1] == expected as i64,
        "unexpected CLIP output shape: {dims:?}, expected [1, {expected}]"
    );
    Ok(l2_normalize(&data[..expected]))
}

pub struct ClipImageEmbedder {
    model_path: PathBuf,
    session: Mutex<Option<Session>>,
}

// Safety: Session is behind a Mutex.
unsafe impl Send for ClipImageEmbedder {}
unsafe impl Sync for ClipImageEmbedder {}

impl ClipImageEmbedder {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            model_path: cache_dir.join(ModelName::ClipVitB32Image.onnx_file()),
            session: Mutex::new(None),
        }
    }
}

impl Encoder for ClipImageEmbedder {
    fn init(&self) -> Result<()> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        if session.is_none() {
            *session = Some(load_session(&self.model_path)?);
        }
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut session) = self.session.lock() {
            session.take();
        }
    }

    fn model(&self) -> ModelName {
        ModelName::ClipVitB32Image
    }
}

impl ImageEmbeddingProvider for ClipImageEmbedder {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let input = to_tensor(image, &CLIP_NORM)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        let session = session
            .as_mut()
            .context("image provider is not initialized")?;

        let outputs = session.run(ort::inputs![input])?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("failed to extract CLIP output tensor")?;
        pooled_embedding(&shape, data, ModelName::ClipVitB32Image)
    }
}

struct LoadedText {
    session: Session,
    tokenizer: Tokenizer,
}

pub struct ClipTextEmbedder {
    model_path: PathBuf,
    tokenizer_path: PathBuf,
    state: Mutex<Option<LoadedText>>,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex.
unsafe impl Send for ClipTextEmbedder {}
unsafe impl Sync for ClipTextEmbedder {}

impl ClipTextEmbedder {
    pub fn new(cache_dir: &Path) -> Self {
        let model = ModelName::ClipVitB32Text;
        Self {
            model_path: cache_dir.join(model.onnx_file()),
            tokenizer_path: cache_dir.join(model.tokenizer_file().unwrap_or("tokenizer.json")),
            state: Mutex::new(None),
        }
    }

    fn load_tokenizer(&self) -> Result<Tokenizer> {
        anyhow::ensure!(
            self.tokenizer_path.exists(),
            "Tokenizer not found at {}",
            self.tokenizer_path.display()
        );
        let mut tokenizer = Tokenizer::from_file(&self.tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: CONTEXT_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::Fixed(CONTEXT_LEN),
            ..Default::default()
        }));
        Ok(tokenizer)
    }
}

impl Encoder for ClipTextEmbedder {
    fn init(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        if state.is_none() {
            let tokenizer = self.load_tokenizer()?;
            let session = load_session(&self.model_path)?;
            *state = Some(LoadedText { session, tokenizer });
        }
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.take();
        }
    }

    fn model(&self) -> ModelName {
        ModelName::ClipVitB32Text
    }
}

impl TextEmbeddingProvider for ClipTextEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        let loaded = state
            .as_mut()
            .context("text provider is not initialized")?;

        let encoding = loaded
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;
        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let shape = vec![1i64, ids.len() as i64];
        let input_ids = Tensor::from_array((shape, ids.into_boxed_slice()))?;

        let outputs = loaded.session.run(ort::inputs![input_ids])?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("failed to extract CLIP output tensor")?;
        pooled_embedding(&shape, data, ModelName::ClipVitB32Text)
    }
}
