//! Grouping embedded items into bounded batches and persisting them.

use std::sync::Arc;

use super::{EmbeddedItem, Modality};
use crate::store::VectorStore;

/// Destination collection per modality for one run.
#[derive(Clone)]
pub struct Collections {
    pub image: Arc<dyn VectorStore>,
    pub text: Arc<dyn VectorStore>,
    pub video: Arc<dyn VectorStore>,
}

impl Collections {
    pub fn get(&self, modality: Modality) -> &Arc<dyn VectorStore> {
        match modality {
            Modality::Image => &self.image,
            Modality::Text => &self.text,
            Modality::Video => &self.video,
        }
    }
}

/// Collects items until `batch_size` is reached. Each item lands in exactly
/// one batch.
#[derive(Debug)]
pub struct BatchAccumulator {
    batch_size: usize,
    open: Vec<EmbeddedItem>,
}

impl BatchAccumulator {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            open: Vec::with_capacity(batch_size),
        }
    }

    /// Add an item; returns the full batch once `batch_size` is reached.
    pub fn offer(&mut self, item: EmbeddedItem) -> Option<Vec<EmbeddedItem>> {
        self.open.push(item);
        if self.open.len() >= self.batch_size {
            Some(std::mem::replace(
                &mut self.open,
                Vec::with_capacity(self.batch_size),
            ))
        } else {
            None
        }
    }

    /// The residual partial batch, if any.
    pub fn finish(&mut self) -> Option<Vec<EmbeddedItem>> {
        if self.open.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.open))
        }
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

/// An item whose partition could not be written.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedWrite {
    pub item_id: String,
    pub collection: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FlushReport {
    /// Items in partitions that were persisted.
    pub written: Vec<EmbeddedItem>,
    /// Rows the store actually inserted. Lower than `written.len()` when
    /// another run stored some of the ids first.
    pub inserted: usize,
    pub failed: Vec<FailedWrite>,
}

impl FlushReport {
    /// Every partition of a non-empty batch failed.
    pub fn is_total_failure(&self) -> bool {
        self.written.is_empty() && !self.failed.is_empty()
    }
}

/// Write one batch: a single `add` per modality partition. A failed partition
/// is reported per item and does not stop the other partitions.
pub fn flush(collections: &Collections, batch: Vec<EmbeddedItem>) -> FlushReport {
    let mut report = FlushReport::default();
    let mut remaining = batch;

    for modality in Modality::ALL {
        let (partition, rest): (Vec<_>, Vec<_>) =
            remaining.into_iter().partition(|item| item.modality == modality);
        remaining = rest;
        if partition.is_empty() {
            continue;
        }

        let store = collections.get(modality);
        let ids: Vec<String> = partition.iter().map(|item| item.item_id.clone()).collect();
        let embeddings: Vec<Vec<f32>> =
            partition.iter().map(|item| item.embedding.clone()).collect();

        match store.add(&ids, &embeddings) {
            Ok(inserted) => {
                tracing::debug!(
                    collection = store.name(),
                    items = partition.len(),
                    inserted,
                    "partition flushed"
                );
                report.inserted += inserted;
                report.written.extend(partition);
            }
            Err(e) => {
                let reason = format!("{e:#}");
                tracing::warn!(
                    collection = store.name(),
                    items = ids.len(),
                    error = %reason,
                    "partition write failed"
                );
                report.failed.extend(ids.into_iter().map(|item_id| FailedWrite {
                    item_id,
                    collection: store.name().to_string(),
                    reason: reason.clone(),
                }));
            }
        }
    }

    report
}
