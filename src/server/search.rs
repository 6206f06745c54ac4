//! Similarity search and collection counts.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::index::Modality;
use crate::store::VectorStore;

/// Accepted query image formats.
const QUERY_IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct TextQuery {
    pub query: String,
    pub threshold: Option<f32>,
}

pub async fn search_images(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SearchResponse>, ApiError> {
    image_query(state, Modality::Image, multipart).await
}

pub async fn search_videos(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SearchResponse>, ApiError> {
    image_query(state, Modality::Video, multipart).await
}

fn is_query_image(filename: &str) -> bool {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| QUERY_IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

async fn image_query(
    state: AppState,
    modality: Modality,
    mut multipart: Multipart,
) -> Result<Json<SearchResponse>, ApiError> {
    let mut upload = None;
    let mut threshold = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("query_image") => {
                let filename = field
                    .file_name()
                    .map(str::to_owned)
                    .ok_or_else(|| ApiError::bad_request("Missing query_image"))?;
                if !is_query_image(&filename) {
                    return Err(ApiError::bad_request("Unsupported file type"));
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read query_image: {e}")))?;
                upload = Some(bytes);
            }
            Some("threshold") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read threshold: {e}")))?;
                let value = text
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| ApiError::bad_request(format!("invalid threshold: {text}")))?;
                threshold = Some(value);
            }
            _ => {}
        }
    }

    let bytes = upload.ok_or_else(|| ApiError::bad_request("Missing query_image"))?;
    let (default_threshold, n_results) = search_defaults(&state);
    let threshold = threshold.unwrap_or(default_threshold);

    let provider = state.coordinator.image_provider();
    let store = state.coordinator.collection(modality);

    let results = tokio::task::spawn_blocking(move || {
        let image = image::load_from_memory(&bytes)
            .map_err(|e| ApiError::bad_request(format!("could not decode query_image: {e}")))?;
        let embedding = provider
            .embed(&image)
            .map_err(|e| ApiError::internal("Error generating embedding", format!("{e:#}")))?;
        nearest(store.as_ref(), embedding, n_results, threshold)
    })
    .await
    .map_err(|e| ApiError::internal("Error generating embedding", e))??;

    tracing::debug!(%modality, hits = results.len(), threshold, "image search");
    Ok(Json(SearchResponse { results }))
}

pub async fn search_text(
    State(state): State<AppState>,
    Json(request): Json<TextQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("Missing query text"));
    }
    let (default_threshold, n_results) = search_defaults(&state);
    let threshold = request.threshold.unwrap_or(default_threshold);

    let provider = state.coordinator.text_provider();
    let store = state.coordinator.collection(Modality::Text);

    let results = tokio::task::spawn_blocking(move || {
        let embedding = provider
            .embed(&request.query)
            .map_err(|e| ApiError::internal("Error generating embedding", format!("{e:#}")))?;
        nearest(store.as_ref(), embedding, n_results, threshold)
    })
    .await
    .map_err(|e| ApiError::internal("Error generating embedding", e))??;

    tracing::debug!(hits = results.len(), threshold, "text search");
    Ok(Json(SearchResponse { results }))
}

pub async fn count(
    State(state): State<AppState>,
    Path(modality): Path<Modality>,
) -> Result<Json<CountResponse>, ApiError> {
    let store: Arc<dyn VectorStore> = state.coordinator.collection(modality);
    let count = tokio::task::spawn_blocking(move || store.count())
        .await
        .map_err(|e| ApiError::internal("Error counting items in collection", e))?
        .map_err(|e| ApiError::internal("Error counting items in collection", format!("{e:#}")))?;
    Ok(Json(CountResponse { count }))
}

fn search_defaults(state: &AppState) -> (f32, usize) {
    let config = state.config();
    (config.search.similarity_threshold, config.search.n_results)
}

fn nearest(
    store: &dyn VectorStore,
    embedding: Vec<f32>,
    n_results: usize,
    threshold: f32,
) -> Result<Vec<String>, ApiError> {
    let hits = store
        .query(&[embedding], n_results)
        .map_err(|e| ApiError::internal("Error querying database", format!("{e:#}")))?;
    Ok(hits
        .first()
        .map(|hit| hit.within(threshold))
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_image_extensions() {
        assert!(is_query_image("cat.PNG"));
        assert!(is_query_image("a.b.webp"));
        assert!(!is_query_image("clip.mp4"));
        assert!(!is_query_image("noext"));
    }
}
