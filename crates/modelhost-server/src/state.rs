//! Application state shared across handlers.

use std::sync::Arc;

use modelhost_engine::{ChatLoader, EmbeddingLoader};
use modelhost_runtime::{ChatGenerator, ChatSlot, Embedder, EmbeddingSlot, ModelSlot, SlotKind};

use crate::config::ServerConfig;

/// Application state shared across handlers.
///
/// Cloning is cheap; every clone refers to the same two model slots.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Chat generation against the chat slot.
    pub chat: ChatGenerator,
    /// Embedding against the embedding slot.
    pub embedder: Embedder,
}

impl AppState {
    /// State with fresh, empty chat and embedding slots.
    pub fn new(
        config: ServerConfig,
        chat_loader: Arc<ChatLoader>,
        embedding_loader: Arc<EmbeddingLoader>,
    ) -> Self {
        let chat_slot: ChatSlot =
            ModelSlot::new(SlotKind::Chat, chat_loader, &config.model_storage_dir)
                .with_keep_previous_on_switch(config.keep_previous_on_switch);
        let embedding_slot: EmbeddingSlot = ModelSlot::new(
            SlotKind::Embedding,
            embedding_loader,
            &config.model_storage_dir,
        )
        .with_keep_previous_on_switch(config.keep_previous_on_switch);

        Self {
            config: Arc::new(config),
            chat: ChatGenerator::new(Arc::new(chat_slot)),
            embedder: Embedder::new(Arc::new(embedding_slot)),
        }
    }

    pub fn chat_slot(&self) -> &Arc<ChatSlot> {
        self.chat.slot()
    }

    pub fn embedding_slot(&self) -> &Arc<EmbeddingSlot> {
        self.embedder.slot()
    }
}
