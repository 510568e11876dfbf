use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use modelhost_runtime::{MockChatEngine, MockEmbeddingEngine};
use modelhost_server::{ServerConfig, ServerManager, ServerState};
use tracing_subscriber::EnvFilter;

/// OpenAI-compatible model server.
#[derive(Debug, Parser)]
#[command(name = "modelhost-server", version)]
struct Cli {
    /// Hostname or IP to bind
    #[arg(long, env = "MODELHOST_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(long, short, env = "MODELHOST_PORT", default_value_t = 8080)]
    port: u16,

    /// Model storage directory [default: ~/.modelhost/models]
    #[arg(long, env = "MODELHOST_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Chat model to load before serving
    #[arg(long, env = "MODELHOST_MODEL")]
    model: Option<String>,

    /// Embedding model to load before serving
    #[arg(long, env = "MODELHOST_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    /// Default max_tokens for chat requests
    #[arg(long, env = "MODELHOST_MAX_TOKENS", default_value_t = 100)]
    max_tokens: usize,

    /// Default sampling temperature for chat requests
    #[arg(long, env = "MODELHOST_TEMPERATURE", default_value_t = 0.6)]
    temperature: f32,

    /// End streams with a finish chunk and `data: [DONE]`
    #[arg(long, env = "MODELHOST_STRICT_OPENAI_STREAM")]
    strict_openai_stream: bool,

    /// Release the old model before loading a new one
    #[arg(long, env = "MODELHOST_NO_FALLBACK")]
    no_fallback: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "MODELHOST_LOG", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::new()
            .with_host(self.host)
            .with_port(self.port)
            .with_default_max_tokens(self.max_tokens)
            .with_default_temperature(self.temperature)
            .with_strict_openai_stream(self.strict_openai_stream)
            .with_keep_previous_on_switch(!self.no_fallback);
        if let Some(dir) = self.model_dir {
            config = config.with_model_storage_dir(dir);
        }
        if let Some(model) = self.model {
            config = config.with_preload_chat_model(model);
        }
        if let Some(model) = self.embedding_model {
            config = config.with_preload_embedding_model(model);
        }
        config.log_level = self.log_level;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config();

    let filter = EnvFilter::builder()
        .parse_lossy(std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let manager = ServerManager::new(
        config,
        Arc::new(MockChatEngine::new()),
        Arc::new(MockEmbeddingEngine::new()),
    );

    manager.start().await;
    if let ServerState::Error(msg) = manager.status() {
        anyhow::bail!("server failed to start: {msg}");
    }
    if let Some(addr) = manager.local_addr() {
        tracing::info!("OpenAI compatible: http://{addr}/v1/chat/completions");
        tracing::info!("Embeddings: http://{addr}/v1/embeddings");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");
    manager.stop().await;
    Ok(())
}
