//! Types shared by the chat, embeddings and models endpoints.

use serde::{Deserialize, Serialize};

pub use modelhost_runtime::ChatMessage;

/// Token usage statistics.
///
/// Token accounting is not wired to the engine yet: embeddings report zeros and
/// chat completions leave `usage` as `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub total_tokens: usize,
}

/// One entry of `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    pub owned_by: String,
}

impl ModelObject {
    pub fn local(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: "model".to_string(),
            owned_by: "local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelObject>,
}
