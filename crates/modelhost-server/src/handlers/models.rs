//! Resident model listing.

use axum::{extract::State, Json};

use crate::{
    models::{ModelList, ModelObject},
    state::AppState,
};

/// List the models currently resident in the chat and embedding slots.
pub async fn handle_list_models(State(state): State<AppState>) -> Json<ModelList> {
    let data = [
        state.chat_slot().current_identity(),
        state.embedding_slot().current_identity(),
    ]
    .into_iter()
    .flatten()
    .map(|id| ModelObject::local(id.into_inner()))
    .collect();

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}
