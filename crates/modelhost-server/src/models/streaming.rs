//! Server-Sent Events (SSE) streaming types for chat completions.

use serde::{Deserialize, Serialize};

/// Chat completion chunk for streaming responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoiceDelta>,
}

/// Chat choice with delta for streaming. `finish_reason` is written as `null`
/// on content chunks.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoiceDelta {
    pub index: usize,
    pub delta: ChatDelta,
    pub finish_reason: Option<String>,
}

/// Delta object containing incremental content.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// Opening chunk announcing the assistant role.
    pub fn role(id: &str, created: u64, model: &str) -> Self {
        let delta = ChatDelta {
            role: Some("assistant".to_string()),
            content: None,
        };
        Self::single(id, created, model, delta, None)
    }

    pub fn content(id: &str, created: u64, model: &str, fragment: String) -> Self {
        let delta = ChatDelta {
            role: None,
            content: Some(fragment),
        };
        Self::single(id, created, model, delta, None)
    }

    pub fn finish(id: &str, created: u64, model: &str, reason: &str) -> Self {
        Self::single(id, created, model, ChatDelta::default(), Some(reason.to_string()))
    }

    fn single(
        id: &str,
        created: u64,
        model: &str,
        delta: ChatDelta,
        finish_reason: Option<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChatChoiceDelta {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }
}
