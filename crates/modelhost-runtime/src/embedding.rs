//! Text embedding on top of the embedding [`ModelSlot`].

use std::sync::Arc;

use modelhost_engine::{DynEmbeddingModel, EngineError, ModelIdentity};

use crate::slot::{ModelSlot, SlotError};

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("input cannot be empty")]
    EmptyInput,

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),
}

/// Maps one input string to one normalised vector.
#[derive(Clone)]
pub struct Embedder {
    slot: Arc<ModelSlot<DynEmbeddingModel>>,
}

impl Embedder {
    pub fn new(slot: Arc<ModelSlot<DynEmbeddingModel>>) -> Self {
        Self { slot }
    }

    pub fn slot(&self) -> &Arc<ModelSlot<DynEmbeddingModel>> {
        &self.slot
    }

    pub fn resident_model(&self) -> Option<ModelIdentity> {
        self.slot.current_identity()
    }

    /// Tokenize, run the encoder, and mean-pool with normalisation.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, EmbedError> {
        if input.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        let model = self.slot.with_handle(|_, model| model.clone())?;
        let text = input.to_string();

        let vector = tokio::task::spawn_blocking(move || {
            let mut model = model.lock()?;
            let tokens = model.tokenize(&text)?;
            let hidden = model.forward(&tokens)?;
            model.pool(&hidden, true)
        })
        .await
        .map_err(|e| EngineError::Inference(format!("embedding task failed: {e}")))??;

        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEmbeddingEngine;
    use crate::slot::SlotKind;

    fn embedder(engine: MockEmbeddingEngine) -> Embedder {
        Embedder::new(Arc::new(ModelSlot::new(
            SlotKind::Embedding,
            Arc::new(engine),
            "/tmp/models",
        )))
    }

    #[tokio::test]
    async fn blank_input_is_rejected_before_model_lookup() {
        let embedder = embedder(MockEmbeddingEngine::new());
        assert!(matches!(embedder.embed("").await, Err(EmbedError::EmptyInput)));
        assert!(matches!(embedder.embed("  \n").await, Err(EmbedError::EmptyInput)));
    }

    #[tokio::test]
    async fn missing_model_is_reported() {
        let embedder = embedder(MockEmbeddingEngine::new());
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            EmbedError::Slot(SlotError::NotLoaded { kind: SlotKind::Embedding })
        ));
    }

    #[tokio::test]
    async fn vectors_are_unit_length_with_model_dimension() {
        let embedder = embedder(MockEmbeddingEngine::new().with_dimension(32));
        embedder.slot().load_if_needed(&"e".into()).await.unwrap();

        let v = embedder.embed("hello world").await.unwrap();
        assert_eq!(v.len(), 32);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(embedder.resident_model(), Some("e".into()));
    }

    #[tokio::test]
    async fn fixed_vector_passes_through() {
        let embedder = embedder(MockEmbeddingEngine::new().with_fixed_vector(vec![0.1, 0.2, 0.3]));
        embedder.slot().load_if_needed(&"e".into()).await.unwrap();
        assert_eq!(embedder.embed("hello").await.unwrap(), vec![0.1, 0.2, 0.3]);
    }
}
