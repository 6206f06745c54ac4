//! all-MiniLM-L6-v2 text provider.
//!
//! Handles tokenization, inference, mean pooling, and L2 normalization.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, load_session, Encoder, ModelName, TextEmbeddingProvider};

/// Maximum sequence length for all-MiniLM-L6-v2 (trained at 256).
const MAX_SEQ_LEN: usize = 256;

const MODEL: ModelName = ModelName::AllMiniLmL6V2;

struct Loaded {
    session: Session,
    tokenizer: Tokenizer,
}

/// Sentence-transformer text embedder (384 dimensions).
pub struct MiniLmTextEmbedder {
    model_path: PathBuf,
    tokenizer_path: PathBuf,
    state: Mutex<Option<Loaded>>,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex.
// The Mutex guarantees exclusive access during run().
unsafe impl Send for MiniLmTextEmbedder {}
unsafe impl Sync for MiniLmTextEmbedder {}

impl MiniLmTextEmbedder {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            model_path: cache_dir.join(MODEL.onnx_file()),
            tokenizer_path: cache_dir.join(MODEL.tokenizer_file().unwrap_or("tokenizer.json")),
            state: Mutex::new(None),
        }
    }

    fn load_tokenizer(&self) -> Result<Tokenizer> {
        anyhow::ensure!(
            self.tokenizer_path.exists(),
            "Tokenizer not found at {}. Run `smartscan model download` first.",
            self.tokenizer_path.display()
        );

        let mut tokenizer = Tokenizer::from_file(&self.tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        tracing::info!(tokenizer = %self.tokenizer_path.display(), "tokenizer loaded");
        Ok(tokenizer)
    }
}

impl Encoder for MiniLmTextEmbedder {
    fn init(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        if state.is_some() {
            return Ok(());
        }
        let tokenizer = self.load_tokenizer()?;
        let session = load_session(&self.model_path)?;
        *state = Some(Loaded { session, tokenizer });
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            if state.take().is_some() {
                tracing::info!(model = %MODEL, "session closed");
            }
        }
    }

    fn model(&self) -> ModelName {
        MODEL
    }
}

impl TextEmbeddingProvider for MiniLmTextEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text])?;
        results
            .into_iter()
            .next()
            .context("embedding batch returned no vectors")
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        let loaded = state
            .as_mut()
            .context("text provider is not initialized")?;

        let encodings = loaded
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        // Padding is BatchLongest, so every encoding has the same length.
        let rows = encodings.len();
        let cols = encodings[0].get_ids().len();
        let mut input_ids = Array2::<i64>::zeros((rows, cols));
        let mut attention_mask = Array2::<i64>::zeros((rows, cols));
        for (row, encoding) in encodings.iter().enumerate() {
            let pairs = encoding.get_ids().iter().zip(encoding.get_attention_mask());
            for (col, (&id, &mask)) in pairs.enumerate() {
                input_ids[[row, col]] = i64::from(id);
                attention_mask[[row, col]] = i64::from(mask);
            }
        }
        let mask = attention_mask.mapv(|m| m as f32);

        let outputs = loaded.session.run(ort::inputs! {
            "input_ids" => int_tensor(input_ids)?,
            "attention_mask" => int_tensor(attention_mask)?,
            "token_type_ids" => int_tensor(Array2::zeros((rows, cols)))?,
        })?;

        // Export names differ between converters.
        let hidden = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);
        let (shape, data) = hidden
            .try_extract_tensor::<f32>()
            .context("failed to extract token embeddings")?;

        let dims: &[i64] = &shape;
        let expected = MODEL.dimensions();
        anyhow::ensure!(
            dims == [rows as i64, cols as i64, expected as i64],
            "unexpected token embedding shape {dims:?}, expected [{rows}, {cols}, {expected}]"
        );
        let hidden = ArrayView3::from_shape((rows, cols, expected), data)?;

        Ok(hidden
            .outer_iter()
            .zip(mask.outer_iter())
            .map(|(tokens, mask)| mean_pool(tokens, mask))
            .collect())
    }
}

fn int_tensor(array: Array2<i64>) -> Result<Tensor<i64>> {
    let shape: Vec<i64> = array.shape().iter().map(|&d| d as i64).collect();
    let (data, _) = array.into_raw_vec_and_offset();
    Ok(Tensor::from_array((shape, data.into_boxed_slice()))?)
}

/// Masked mean over the token axis, then L2-normalized.
fn mean_pool(tokens: ArrayView2<f32>, mask: ArrayView1<f32>) -> Vec<f32> {
    let count = mask.sum();
    let mut pooled = tokens.t().dot(&mask);
    if count > 0.0 {
        pooled /= count;
    }
    l2_normalize(&pooled.to_vec())
}
