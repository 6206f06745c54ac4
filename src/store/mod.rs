//! Vector collection boundary.
//!
//! [`VectorStore`] is the opaque id → vector collection the indexing pipeline
//! writes to and the search endpoints read from. [`SqliteCollection`] is the
//! sqlite-vec implementation. All methods are synchronous and safe to call from
//! a blocking worker.

pub mod sqlite;

pub use sqlite::{collection_name, list_collections, CollectionInfo, SqliteCollection};

use anyhow::Result;
use serde::Serialize;

/// Nearest neighbours for one query embedding, closest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub distances: Vec<f32>,
}

impl QueryResult {
    /// Ids whose distance does not exceed `threshold`.
    pub fn within(&self, threshold: f32) -> Vec<String> {
        self.ids
            .iter()
            .zip(&self.distances)
            .filter(|(_, d)| **d <= threshold)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;

    /// Persist `ids[i] → embeddings[i]`. Either every row is written or none is.
    /// Ids already present are left untouched. Returns the number of new rows.
    fn add(&self, ids: &[String], embeddings: &[Vec<f32>]) -> Result<usize>;

    /// One page of stored ids in insertion order.
    fn get(&self, limit: usize, offset: usize) -> Result<Vec<String>>;

    fn count(&self) -> Result<usize>;

    /// K-nearest-neighbour lookup, one [`QueryResult`] per query embedding.
    fn query(&self, embeddings: &[Vec<f32>], n_results: usize) -> Result<Vec<QueryResult>>;
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}
