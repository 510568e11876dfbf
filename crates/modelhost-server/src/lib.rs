//! # modelhost-server
//!
//! OpenAI-compatible HTTP API over the modelhost runtime.
//!
//! Serves `/v1/chat/completions` (JSON or Server-Sent Events), `/v1/embeddings`,
//! `/v1/models` and `/health`. Chat and embedding models are loaded lazily, once,
//! into their slots when the first request naming them arrives. The listener
//! itself is driven by [`ServerManager`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod models;
pub mod server;
pub mod state;
pub mod streaming;

pub use config::ServerConfig;
pub use error::ServerError;
pub use lifecycle::{ServerManager, ServerState};
pub use server::create_router;
pub use state::AppState;
