//! Server-Sent Events (SSE) streaming for chat completions.
//!
//! Each fragment is sent as `data: {json}\n\n` in generation order. When the
//! engine fails mid-stream a single `data: {"error":..}` frame follows the
//! fragments already sent. In strict mode the stream opens with a role chunk
//! and closes with a `finish_reason` chunk and `data: [DONE]`; otherwise it
//! carries content chunks only.
//!
//! The stream owns the [`FragmentStream`]. When the client disconnects, axum
//! drops the body, which drops the fragments and cancels generation.

use std::time::Duration;

use axum::{
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::{Stream, StreamExt};
use modelhost_runtime::FragmentStream;

use crate::{config::ServerConfig, error::error_body, models::ChatCompletionChunk};

/// Identifies one completion across all of its chunks.
#[derive(Debug, Clone)]
pub struct CompletionMeta {
    pub id: String,
    pub created: u64,
    pub model: String,
}

/// Render `fragments` as an SSE response.
pub fn stream_chat_completion(
    config: &ServerConfig,
    meta: CompletionMeta,
    fragments: FragmentStream,
) -> Response {
    let events = chunk_events(meta, fragments, config.strict_openai_stream);
    let sse = Sse::new(events);
    let sse = match config.sse_keep_alive_secs {
        Some(secs) => sse
            .keep_alive(KeepAlive::new().interval(Duration::from_secs(secs)))
            .into_response(),
        None => sse.into_response(),
    };
    ([(header::CONNECTION, "keep-alive")], sse).into_response()
}

fn chunk_events(
    meta: CompletionMeta,
    mut fragments: FragmentStream,
    strict: bool,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    async_stream::stream! {
        let mut sent = 0usize;
        let mut failed = false;

        if strict {
            let chunk = ChatCompletionChunk::role(&meta.id, meta.created, &meta.model);
            yield Event::default().json_data(&chunk);
        }

        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    let chunk =
                        ChatCompletionChunk::content(&meta.id, meta.created, &meta.model, fragment);
                    sent += 1;
                    yield Event::default().json_data(&chunk);
                }
                Err(e) => {
                    tracing::warn!(id = %meta.id, sent, error = %e, "generation failed mid-stream");
                    yield Event::default().json_data(error_body(&e.to_string(), "server_error"));
                    failed = true;
                    break;
                }
            }
        }

        if strict && !failed {
            let chunk = ChatCompletionChunk::finish(&meta.id, meta.created, &meta.model, "stop");
            yield Event::default().json_data(&chunk);
            yield Ok(Event::default().data("[DONE]"));
        }
        tracing::debug!(id = %meta.id, sent, "stream finished");
    }
}
