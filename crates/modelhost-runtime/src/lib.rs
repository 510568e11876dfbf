//! # modelhost-runtime
//!
//! Drives the engine on behalf of the server: owns loaded models in
//! single-flight [`ModelSlot`]s, turns chat requests into cancellable fragment
//! streams, embeds text, and reports generation telemetry. Also ships the
//! deterministic mock engines used by tests and the demo binary.

pub mod embedding;
pub mod generation;
pub mod mock;
pub mod slot;
pub mod telemetry;

pub use embedding::{EmbedError, Embedder};
pub use generation::{ChatGenerator, ChatMessage, FragmentStream, GenerationError, GenerationRequest};
pub use mock::{MockChatEngine, MockEmbeddingEngine, MockStats};
pub use slot::{LoadedModel, ModelSlot, SlotError, SlotKind};
pub use telemetry::{
    GenerationMetrics, GenerationTimer, NoopTelemetry, RecordingTelemetry, TelemetryHook,
    TracingTelemetry,
};

use modelhost_engine::{DynChatModel, DynEmbeddingModel};

pub type ChatSlot = ModelSlot<DynChatModel>;
pub type EmbeddingSlot = ModelSlot<DynEmbeddingModel>;
