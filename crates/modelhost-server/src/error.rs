//! HTTP error handling and response mapping.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use modelhost_runtime::{EmbedError, GenerationError, SlotError};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Embedding(#[from] EmbedError),
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::InvalidRequest(rejection.body_text())
    }
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Embedding(EmbedError::EmptyInput) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Slot(_) | ServerError::Generation(_) | ServerError::Embedding(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_type(&self) -> &'static str {
        if self.status().is_client_error() {
            "invalid_request_error"
        } else {
            "server_error"
        }
    }
}

/// OpenAI-style error body.
pub fn error_body(message: &str, error_type: &str) -> serde_json::Value {
    json!({
        "error": {
            "message": message,
            "type": error_type,
            "param": null,
            "code": null,
        }
    })
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "rejected request");
        }
        let body = Json(error_body(&self.to_string(), self.error_type()));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelhost_engine::EngineError;
    use modelhost_runtime::SlotKind;

    #[test]
    fn client_errors_map_to_400() {
        assert_eq!(
            ServerError::InvalidRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::from(EmbedError::EmptyInput).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn model_errors_map_to_500() {
        let not_loaded = ServerError::from(SlotError::NotLoaded {
            kind: SlotKind::Chat,
        });
        assert_eq!(not_loaded.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(not_loaded.to_string(), "chat model not loaded");

        let load = ServerError::from(SlotError::Load {
            identity: "m".into(),
            source: EngineError::ModelLoad("missing".into()),
        });
        assert_eq!(load.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(load.error_type(), "server_error");

        let engine = ServerError::from(GenerationError::Engine(EngineError::Inference(
            "boom".into(),
        )));
        assert_eq!(engine.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
