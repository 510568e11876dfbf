//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for one server instance.
///
/// Owned by the [`ServerManager`](crate::lifecycle::ServerManager) and handed
/// to handlers through [`AppState`](crate::state::AppState); there is no global
/// copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Hostname or IP to bind.
    pub host: String,
    /// TCP port to bind. 0 picks a free port.
    pub port: u16,
    /// Where models are stored; created on start if missing.
    pub model_storage_dir: PathBuf,
    /// `max_tokens` used when a request omits it.
    pub default_max_tokens: usize,
    /// `temperature` used when a request omits it.
    pub default_temperature: f32,
    /// Pause between stop and start on restart, so the socket is released.
    #[serde(with = "millis")]
    pub restart_delay: Duration,
    /// How long `stop` waits for in-flight requests before aborting them.
    #[serde(with = "millis")]
    pub shutdown_grace: Duration,
    /// Chat model to load before the listener binds.
    pub preload_chat_model: Option<String>,
    /// Embedding model to load before the listener binds.
    pub preload_embedding_model: Option<String>,
    /// Keep the old model resident if a switch to a new one fails.
    pub keep_previous_on_switch: bool,
    /// Emit a final `finish_reason` chunk and `data: [DONE]` on streams.
    pub strict_openai_stream: bool,
    /// Interval for SSE keep-alive comments. Off when `None`.
    pub sse_keep_alive_secs: Option<u64>,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            model_storage_dir: default_model_storage_dir(),
            default_max_tokens: 100,
            default_temperature: 0.6,
            restart_delay: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
            preload_chat_model: None,
            preload_embedding_model: None,
            keep_previous_on_switch: true,
            strict_openai_stream: false,
            sse_keep_alive_secs: None,
            log_level: "info".to_string(),
        }
    }
}

/// `~/.modelhost/models`, or `./models` when there is no home directory.
pub fn default_model_storage_dir() -> PathBuf {
    dirs_next::home_dir()
        .map(|home| home.join(".modelhost").join("models"))
        .unwrap_or_else(|| PathBuf::from("models"))
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_model_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_storage_dir = dir.into();
        self
    }

    pub fn with_default_max_tokens(mut self, n: usize) -> Self {
        self.default_max_tokens = n;
        self
    }

    pub fn with_default_temperature(mut self, t: f32) -> Self {
        self.default_temperature = t;
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_preload_chat_model(mut self, id: impl Into<String>) -> Self {
        self.preload_chat_model = Some(id.into());
        self
    }

    pub fn with_preload_embedding_model(mut self, id: impl Into<String>) -> Self {
        self.preload_embedding_model = Some(id.into());
        self
    }

    pub fn with_keep_previous_on_switch(mut self, keep: bool) -> Self {
        self.keep_previous_on_switch = keep;
        self
    }

    pub fn with_strict_openai_stream(mut self, strict: bool) -> Self {
        self.strict_openai_stream = strict;
        self
    }

    pub fn with_sse_keep_alive_secs(mut self, secs: Option<u64>) -> Self {
        self.sse_keep_alive_secs = secs;
        self
    }

    /// Address string for binding, e.g. `127.0.0.1:8080`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
