//! Active model inspection and hot swap.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::coordinator::ActiveModels;
use crate::embedding::{ModelKind, ModelName};

#[derive(Debug, Deserialize)]
pub struct SetModelRequest {
    pub model: ModelName,
}

#[derive(Debug, Serialize)]
pub struct SetModelResponse {
    pub changed: bool,
    pub models: ActiveModels,
}

pub async fn active_models(State(state): State<AppState>) -> Json<ActiveModels> {
    Json(state.coordinator.active_models())
}

/// `PUT /api/models/{image|text}`: swap the model and persist the choice.
pub async fn set_model(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<SetModelRequest>,
) -> Result<Json<SetModelResponse>, ApiError> {
    let kind = match kind.as_str() {
        "image" => ModelKind::Image,
        "text" => ModelKind::Text,
        other => return Err(ApiError::bad_request(format!("unknown model kind: {other}"))),
    };
    let model = request.model;

    let coordinator = state.coordinator.clone();
    let changed = tokio::task::spawn_blocking(move || coordinator.swap(kind, model))
        .await
        .map_err(|e| ApiError::internal("Error loading model", e))??;

    if changed {
        state
            .persist_config(|config| match kind {
                ModelKind::Image => config.models.image_encoder_model = model,
                ModelKind::Text => config.models.text_encoder_model = model,
            })
            .map_err(|e| ApiError::internal("Error saving config", format!("{e:#}")))?;
    }

    Ok(Json(SetModelResponse {
        changed,
        models: state.coordinator.active_models(),
    }))
}
