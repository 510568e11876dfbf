//! Chat completion handler.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use modelhost_runtime::{GenerationError, GenerationRequest};
use uuid::Uuid;

use crate::{
    config::ServerConfig,
    error::ServerError,
    models::{ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage},
    state::AppState,
    streaming::{self, CompletionMeta},
};

/// Handle chat completion requests (streaming and non-streaming).
///
/// The requested model is made resident first; concurrent requests for the
/// same model share one load. Dropping the response, or the handler future for
/// non-streaming requests, cancels generation.
pub async fn handle_chat_completion(
    State(state): State<AppState>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, ServerError> {
    let created = Utc::now().timestamp() as u64;
    let Json(req) = payload?;
    let request = generation_request(&state.config, req)?;

    state.chat_slot().load_if_needed(&request.model).await?;
    let fragments = state.chat.generate(&request)?;

    // Report the model that is generating, even if the slot switched after the load.
    let meta = CompletionMeta {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        created,
        model: fragments.model().to_string(),
    };
    tracing::debug!(
        id = %meta.id,
        model = %meta.model,
        messages = request.messages.len(),
        stream = request.stream,
        "chat completion"
    );

    if request.stream {
        return Ok(streaming::stream_chat_completion(&state.config, meta, fragments));
    }

    let content = fragments
        .collect_text()
        .await
        .map_err(GenerationError::from)?;

    Ok(Json(ChatCompletionResponse {
        id: meta.id,
        object: "chat.completion".to_string(),
        created: meta.created,
        model: meta.model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage::new("assistant", content),
            finish_reason: "stop".to_string(),
        }],
        usage: None,
    })
    .into_response())
}

/// Apply configured defaults and reject out-of-range sampling settings.
fn generation_request(
    config: &ServerConfig,
    req: ChatCompletionRequest,
) -> Result<GenerationRequest, ServerError> {
    if req.model.trim().is_empty() {
        return Err(ServerError::InvalidRequest("model must not be empty".into()));
    }
    let max_tokens = req.max_tokens.unwrap_or(config.default_max_tokens);
    if max_tokens == 0 {
        return Err(ServerError::InvalidRequest(
            "max_tokens must be greater than 0".into(),
        ));
    }
    let temperature = req.temperature.unwrap_or(config.default_temperature);
    if !temperature.is_finite() || temperature < 0.0 {
        return Err(ServerError::InvalidRequest(
            "temperature must be a non-negative number".into(),
        ));
    }

    Ok(GenerationRequest::new(req.model, req.messages)
        .with_max_tokens(max_tokens)
        .with_temperature(temperature)
        .streaming(req.stream))
}
