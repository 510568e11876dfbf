//! Start/stop/restart state machine for the HTTP listener.
//!
//! ```text
//! stopped -> starting -> running -> stopping -> stopped
//!               |           |
//!               +-> error <-+
//! ```
//!
//! Every start builds fresh, empty model slots, so a restart also unloads
//! whatever models the previous run had resident.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use modelhost_engine::{ChatLoader, EmbeddingLoader, ModelIdentity};
use modelhost_runtime::SlotError;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{config::ServerConfig, server::create_router, state::AppState};

/// Observable state of the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error(String),
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Stopped => f.write_str("stopped"),
            ServerState::Starting => f.write_str("starting"),
            ServerState::Running => f.write_str("running"),
            ServerState::Stopping => f.write_str("stopping"),
            ServerState::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum StartError {
    #[error("failed to create model directory {}: {source}", .path.display())]
    StorageDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to preload model: {0}")]
    Preload(#[from] SlotError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

struct Serving {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the HTTP listener and its state machine.
///
/// One manager per process is the intended use; it is constructed explicitly
/// and passed to whoever needs to drive it. Lifecycle calls are serialised, so
/// concurrent `start`/`stop` callers observe one transition at a time.
pub struct ServerManager {
    config: ServerConfig,
    chat_loader: Arc<ChatLoader>,
    embedding_loader: Arc<EmbeddingLoader>,
    state: Arc<Mutex<ServerState>>,
    local_addr: Mutex<Option<SocketAddr>>,
    serving: tokio::sync::Mutex<Option<Serving>>,
}

impl ServerManager {
    pub fn new(
        config: ServerConfig,
        chat_loader: Arc<ChatLoader>,
        embedding_loader: Arc<EmbeddingLoader>,
    ) -> Self {
        Self {
            config,
            chat_loader,
            embedding_loader,
            state: Arc::new(Mutex::new(ServerState::Stopped)),
            local_addr: Mutex::new(None),
            serving: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn status(&self) -> ServerState {
        lock(&self.state).clone()
    }

    /// Human-readable status line.
    pub fn status_text(&self) -> String {
        match self.status() {
            ServerState::Stopped => "Server Stopped".to_string(),
            ServerState::Starting => "Starting...".to_string(),
            ServerState::Running => "Server Running".to_string(),
            ServerState::Stopping => "Stopping...".to_string(),
            ServerState::Error(msg) => format!("Error: {msg}"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status() == ServerState::Running
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// Bind and serve. Does nothing unless the server is stopped.
    ///
    /// Returns once the listener is accepting connections or the start has
    /// failed; a failure leaves the server in [`ServerState::Error`]. Dropping
    /// the future before then puts the server back to stopped.
    pub async fn start(&self) {
        let mut serving = self.serving.lock().await;
        {
            let mut state = lock(&self.state);
            if *state != ServerState::Stopped {
                tracing::warn!(state = %state, "start ignored: server already running or in transition");
                return;
            }
            *state = ServerState::Starting;
        }

        let _reset_if_dropped = StartingGuard(&self.state);
        match self.launch().await {
            Ok(launched) => *serving = Some(launched),
            Err(e) => {
                tracing::error!(error = %e, "server failed to start");
                *lock(&self.state) = ServerState::Error(e.to_string());
            }
        }
    }

    /// Shut the listener down. Does nothing unless the server is running.
    ///
    /// In-flight requests get `shutdown_grace` to finish before the serving
    /// task is aborted.
    pub async fn stop(&self) {
        let mut serving = self.serving.lock().await;
        {
            let mut state = lock(&self.state);
            if *state != ServerState::Running {
                tracing::info!(state = %state, "stop ignored: server not running");
                return;
            }
            *state = ServerState::Stopping;
        }

        if let Some(Serving { shutdown, task }) = serving.take() {
            self.shut_down(shutdown, task).await;
        }
        *lock(&self.local_addr) = None;
        *lock(&self.state) = ServerState::Stopped;
        tracing::info!("server stopped");
    }

    /// Stop, wait `restart_delay` for the socket to be released, then start.
    pub async fn restart(&self) {
        self.stop().await;
        tokio::time::sleep(self.config.restart_delay).await;
        self.start().await;
    }

    /// Leave the error state so the server can be started again.
    pub async fn clear_error(&self) {
        let mut serving = self.serving.lock().await;
        if !matches!(self.status(), ServerState::Error(_)) {
            return;
        }
        if let Some(Serving { shutdown, task }) = serving.take() {
            self.shut_down(shutdown, task).await;
        }
        *lock(&self.local_addr) = None;
        *lock(&self.state) = ServerState::Stopped;
    }

    async fn launch(&self) -> Result<Serving, StartError> {
        let dir = &self.config.model_storage_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| StartError::StorageDir {
                path: dir.clone(),
                source,
            })?;

        let app_state = AppState::new(
            self.config.clone(),
            self.chat_loader.clone(),
            self.embedding_loader.clone(),
        );
        self.preload(&app_state).await?;

        let addr = self.config.bind_address();
        let bind_err = |source| StartError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let app = create_router(app_state);
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let state = self.state.clone();

        *lock(&self.local_addr) = Some(local_addr);
        *lock(&self.state) = ServerState::Running;
        tracing::info!(
            addr = %local_addr,
            models = %self.config.model_storage_dir.display(),
            "server running; models load on first request"
        );

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    signal.cancelled().await;
                    tracing::debug!("listener received shutdown signal");
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "server error");
                let mut state = lock(&state);
                if *state == ServerState::Running {
                    *state = ServerState::Error(e.to_string());
                }
            }
        });

        Ok(Serving { shutdown, task })
    }

    async fn preload(&self, app_state: &AppState) -> Result<(), StartError> {
        if let Some(id) = &self.config.preload_chat_model {
            tracing::info!(model = %id, "preloading chat model");
            app_state
                .chat_slot()
                .load(ModelIdentity::new(id.as_str()))
                .await?;
        }
        if let Some(id) = &self.config.preload_embedding_model {
            tracing::info!(model = %id, "preloading embedding model");
            app_state
                .embedding_slot()
                .load(ModelIdentity::new(id.as_str()))
                .await?;
        }
        Ok(())
    }

    async fn shut_down(&self, shutdown: CancellationToken, mut task: JoinHandle<()>) {
        shutdown.cancel();
        if tokio::time::timeout(self.config.shutdown_grace, &mut task)
            .await
            .is_err()
        {
            tracing::warn!(
                grace_ms = self.config.shutdown_grace.as_millis() as u64,
                "in-flight requests outlived shutdown grace; aborting"
            );
            task.abort();
            let _ = task.await;
        }
    }
}

/// Puts a `starting` server back to `stopped` if `start` is abandoned mid-launch.
struct StartingGuard<'a>(&'a Mutex<ServerState>);

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.0);
        if *state == ServerState::Starting {
            tracing::warn!("start abandoned before the listener was bound");
            *state = ServerState::Stopped;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
