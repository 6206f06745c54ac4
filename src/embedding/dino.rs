//! DINOv2-small image provider (384 dimensions, CLS token).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use super::preprocess::{to_tensor, IMAGENET_NORM};
use super::{l2_normalize, load_session, Encoder, ImageEmbeddingProvider, ModelName};

const MODEL: ModelName = ModelName::Dinov2Small;

pub struct DinoSmallV2ImageEmbedder {
    model_path: PathBuf,
    session: Mutex<Option<Session>>,
}

// Safety: Session is behind a Mutex.
unsafe impl Send for DinoSmallV2ImageEmbedder {}
unsafe impl Sync for DinoSmallV2ImageEmbedder {}

impl DinoSmallV2ImageEmbedder {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            model_path: cache_dir.join(MODEL.onnx_file()),
            session: Mutex::new(None),
        }
    }
}

impl Encoder for DinoSmallV2ImageEmbedder {
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
            if session.take().is_some() {
                tracing::info!(model = %MODEL, "session closed");
            }
        }
    }

    fn model(&self) -> ModelName {
        MODEL
    }
}

impl ImageEmbeddingProvider for DinoSmallV2ImageEmbedder {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let input = to_tensor(image, &IMAGENET_NORM)?;

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
            .context("failed to extract DINOv2 output tensor")?;

        let dims: &[i64] = &shape;
        let hidden = MODEL.dimensions();
        // Either pooled [1, 384] or last_hidden_state [1, tokens, 384]; the CLS
        // token is first in both layouts.
        anyhow::ensure!(
            matches!(dims.len(), 2 | 3) && dims[dims.len() - 1] == hidden as i64,
            "unexpected DINOv2 output shape: {dims:?}"
        );
        Ok(l2_normalize(&data[..hidden]))
    }
}
