//! Embeddings handler.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use modelhost_engine::ModelIdentity;
use modelhost_runtime::EmbedError;

use crate::{
    error::ServerError,
    models::{Embedding, EmbeddingRequest, EmbeddingResponse, Usage},
    state::AppState,
};

/// Handle embedding requests.
///
/// Without a `model` field the resident embedding model is used as is.
pub async fn handle_embeddings(
    State(state): State<AppState>,
    payload: Result<Json<EmbeddingRequest>, JsonRejection>,
) -> Result<Json<EmbeddingResponse>, ServerError> {
    let Json(req) = payload?;

    let texts = req.input.texts();
    if texts.is_empty() || texts.iter().any(|t| t.trim().is_empty()) {
        return Err(EmbedError::EmptyInput.into());
    }

    if let Some(model) = req.model.as_deref() {
        state
            .embedding_slot()
            .load_if_needed(&ModelIdentity::new(model))
            .await?;
    }

    let mut data = Vec::with_capacity(texts.len());
    for (index, text) in texts.into_iter().enumerate() {
        data.push(Embedding {
            object: "embedding".to_string(),
            embedding: state.embedder.embed(text).await?,
            index,
        });
    }

    let model = req
        .model
        .or_else(|| state.embedder.resident_model().map(ModelIdentity::into_inner))
        .unwrap_or_else(|| "unknown".to_string());

    Ok(Json(EmbeddingResponse {
        object: "list".to_string(),
        data,
        model,
        usage: Usage::default(),
    }))
}
