//! Chat completion request/response types.

use crate::models::common::{ChatMessage, Usage};
use serde::{Deserialize, Serialize};

/// Chat completion request.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

/// Chat completion choice.
#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: ChatMessage,
    pub finish_reason: String,
}

/// Chat completion response.
///
/// `usage` is always serialized, as `null` while token accounting is absent.
#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Option<Usage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_defaults_to_false() {
        let req: ChatCompletionRequest = serde_json::from_str(
            r#"{"model":"m","messages":[{"role":"user","content":"Hi"}]}"#,
        )
        .unwrap();
        assert!(!req.stream);
        assert_eq!(req.max_tokens, None);
        assert_eq!(req.messages[0].content, "Hi");
    }

    #[test]
    fn missing_messages_is_an_error() {
        let res: Result<ChatCompletionRequest, _> = serde_json::from_str(r#"{"model":"m"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn usage_serializes_as_null() {
        let resp = ChatCompletionResponse {
            id: "chatcmpl-x".into(),
            object: "chat.completion".into(),
            created: 1,
            model: "m".into(),
            choices: vec![],
            usage: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("usage").unwrap().is_null());
    }
}
