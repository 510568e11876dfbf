//! Chat generation on top of the chat [`ModelSlot`].
//!
//! The engine is blocking, so each generation runs on a blocking thread and
//! hands fragments to the async side through a one-slot channel. The engine
//! only produces the next fragment once the previous one has been taken, and it
//! stops as soon as the [`FragmentStream`] is cancelled or dropped.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use modelhost_engine::{
    ChatTurn, DynChatModel, EngineError, GenerateParameters, ModelIdentity, Role,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::slot::{LoadedModel, ModelSlot, SlotError};
use crate::telemetry::{GenerationTimer, TelemetryHook, TracingTelemetry};

/// One message of OpenAI-style conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Everything needed to produce one assistant reply.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: ModelIdentity,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub stream: bool,
}

impl GenerationRequest {
    /// A non-streaming request with default sampling (100 tokens, temperature 0.6).
    pub fn new(model: impl Into<ModelIdentity>, messages: Vec<ChatMessage>) -> Self {
        let defaults = GenerateParameters::default();
        Self {
            model: model.into(),
            messages,
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
            stream: false,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn parameters(&self) -> GenerateParameters {
        GenerateParameters {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// History in the engine's representation, order preserved.
    pub fn turns(&self) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .map(|m| ChatTurn::new(Role::from_wire(&m.role), m.content.clone()))
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),
}

type Fragment = Result<String, EngineError>;

/// Cancellable, ordered sequence of generated fragments.
///
/// Dropping the stream cancels generation; the engine does no further work.
pub struct FragmentStream {
    model: ModelIdentity,
    rx: mpsc::Receiver<Fragment>,
    cancel: CancellationToken,
}

impl FragmentStream {
    /// The model actually generating, which can differ from the requested one
    /// if the slot was switched in between.
    pub fn model(&self) -> &ModelIdentity {
        &self.model
    }

    /// Drain the stream and concatenate every fragment.
    pub async fn collect_text(mut self) -> Result<String, EngineError> {
        let mut content = String::new();
        while let Some(fragment) = self.next().await {
            content.push_str(&fragment?);
        }
        Ok(content)
    }

    /// Stop generation now. Buffered fragments are discarded.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for FragmentStream {
    type Item = Fragment;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Fragment>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Turns chat requests into fragment streams using the chat slot's model.
#[derive(Clone)]
pub struct ChatGenerator {
    slot: Arc<ModelSlot<DynChatModel>>,
    telemetry: Arc<dyn TelemetryHook>,
}

impl ChatGenerator {
    pub fn new(slot: Arc<ModelSlot<DynChatModel>>) -> Self {
        Self {
            slot,
            telemetry: Arc::new(TracingTelemetry),
        }
    }

    pub fn with_telemetry(mut self, hook: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = hook;
        self
    }

    pub fn slot(&self) -> &Arc<ModelSlot<DynChatModel>> {
        &self.slot
    }

    /// Start generating. Fails only if the slot has no model.
    ///
    /// Engine failures, including ones in `prepare`, arrive as the last item of
    /// the stream. Fragments already yielded are never retracted.
    pub fn generate(&self, request: &GenerationRequest) -> Result<FragmentStream, SlotError> {
        let (resident, model) = self
            .slot
            .with_handle(|identity, model| (identity.clone(), model.clone()))?;
        if resident != request.model {
            tracing::warn!(
                requested = %request.model,
                resident = %resident,
                "chat slot switched before generation started; using resident model"
            );
        }

        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let job = GenerationJob {
            model,
            turns: request.turns(),
            params: request.parameters(),
            tx,
            cancel: cancel.clone(),
            timer: GenerationTimer::new(self.telemetry.clone()),
        };
        tokio::task::spawn_blocking(move || job.run());

        Ok(FragmentStream {
            model: resident,
            rx,
            cancel,
        })
    }

    /// Generate to completion and concatenate every fragment.
    pub async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        Ok(self.generate(request)?.collect_text().await?)
    }
}

struct GenerationJob {
    model: LoadedModel<DynChatModel>,
    turns: Vec<ChatTurn>,
    params: GenerateParameters,
    tx: mpsc::Sender<Fragment>,
    cancel: CancellationToken,
    timer: GenerationTimer,
}

impl GenerationJob {
    fn run(mut self) {
        let cancelled = self.drive();
        if cancelled {
            tracing::debug!("generation cancelled by consumer");
        }
        self.timer.finish(cancelled);
    }

    /// Returns true if the consumer went away before the engine finished.
    fn drive(&mut self) -> bool {
        let mut model = match self.model.lock() {
            Ok(model) => model,
            Err(e) => return self.send(Err(e)),
        };
        if self.cancel.is_cancelled() {
            return true;
        }

        let input = match model.prepare(&self.turns) {
            Ok(input) => input,
            Err(e) => return self.send(Err(e)),
        };
        self.timer.mark_prepared(input.tokens.len());

        let mut fragments = match model.generate(input, &self.params) {
            Ok(fragments) => fragments,
            Err(e) => return self.send(Err(e)),
        };

        loop {
            if self.cancel.is_cancelled() {
                return true;
            }
            let Some(item) = fragments.next() else {
                return false;
            };
            match item {
                Ok(text) => {
                    self.timer.mark_fragment();
                    if self.send(Ok(text)) {
                        return true;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "generation failed mid-stream");
                    return self.send(Err(e));
                }
            }
        }
    }

    /// Returns true if the receiver is gone.
    fn send(&self, item: Fragment) -> bool {
        self.tx.blocking_send(item).is_err()
    }
}
