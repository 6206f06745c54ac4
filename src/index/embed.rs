//! Candidate → embedding, dispatched by modality.

use std::sync::Arc;

use super::{Candidate, EmbeddedItem, ItemError, Modality};
use crate::embedding::frames::FrameSampler;
use crate::embedding::{ImageEmbeddingProvider, TextEmbeddingProvider};

/// Loads a candidate's content and runs the provider for its modality.
///
/// Synchronous and CPU bound; the orchestrator calls it from blocking workers.
pub struct EmbeddingStage {
    image: Arc<dyn ImageEmbeddingProvider>,
    text: Arc<dyn TextEmbeddingProvider>,
    frames: Arc<dyn FrameSampler>,
}

impl EmbeddingStage {
    pub fn new(
        image: Arc<dyn ImageEmbeddingProvider>,
        text: Arc<dyn TextEmbeddingProvider>,
        frames: Arc<dyn FrameSampler>,
    ) -> Self {
        Self {
            image,
            text,
            frames,
        }
    }

    /// Width of the vectors produced for `modality`.
    pub fn dimensions(&self, modality: Modality) -> usize {
        match modality {
            Modality::Image | Modality::Video => self.image.dimensions(),
            Modality::Text => self.text.dimensions(),
        }
    }

    pub fn embed(&self, candidate: &Candidate) -> Result<EmbeddedItem, ItemError> {
        let embedding = match candidate.modality {
            Modality::Image => {
                let image = image::open(&candidate.path)?;
                self.image.embed(&image).map_err(ItemError::Provider)?
            }
            Modality::Video => {
                let frame = self
                    .frames
                    .sample(&candidate.path)
                    .map_err(ItemError::Frame)?;
                self.image.embed(&frame).map_err(ItemError::Provider)?
            }
            Modality::Text => {
                let text = std::fs::read_to_string(&candidate.path)?;
                if text.trim().is_empty() {
                    return Err(ItemError::Empty);
                }
                self.text.embed(&text).map_err(ItemError::Provider)?
            }
        };

        let expected = self.dimensions(candidate.modality);
        if embedding.len() != expected {
            return Err(ItemError::Dimensions {
                expected,
                actual: embedding.len(),
            });
        }

        Ok(EmbeddedItem {
            item_id: candidate.id.clone(),
            embedding,
            modality: candidate.modality,
        })
    }
}
