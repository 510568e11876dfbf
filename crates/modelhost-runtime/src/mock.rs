//! Deterministic in-process engines.
//!
//! These stand in for a real backend in tests and in the demo server. They
//! never touch the filesystem; "loading" is a counter plus an optional sleep.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modelhost_engine::{
    ChatModel, ChatTurn, DynChatModel, DynEmbeddingModel, EmbeddingModel, EngineError, Fragments,
    GenerateParameters, HiddenStates, ModelIdentity, ModelLoader, ModelSpec, PreparedInput,
    Result, Role, TokenId,
};

/// Counters shared between a mock engine and the models it loads.
#[derive(Debug, Default)]
pub struct MockStats {
    loads: AtomicUsize,
    fragments: AtomicUsize,
    embeds: AtomicUsize,
    last_history: Mutex<Option<Vec<ChatTurn>>>,
    last_params: Mutex<Option<GenerateParameters>>,
}

impl MockStats {
    /// Number of successful loads.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of fragments the engine has produced across all generations.
    pub fn fragments_produced(&self) -> usize {
        self.fragments.load(Ordering::SeqCst)
    }

    pub fn embed_count(&self) -> usize {
        self.embeds.load(Ordering::SeqCst)
    }

    /// History passed to the most recent `prepare` call.
    pub fn last_history(&self) -> Option<Vec<ChatTurn>> {
        self.last_history.lock().ok().and_then(|h| h.clone())
    }

    pub fn last_params(&self) -> Option<GenerateParameters> {
        self.last_params.lock().ok().and_then(|p| *p)
    }
}

#[derive(Debug, Clone, Default)]
struct ChatBehaviour {
    script: Option<Vec<String>>,
    fail_after: Option<usize>,
    load_delay: Duration,
    fragment_delay: Duration,
    unloadable: HashSet<String>,
}

/// Chat engine that either replays a script or echoes the last turn word by word.
#[derive(Debug, Clone, Default)]
pub struct MockChatEngine {
    behaviour: ChatBehaviour,
    stats: Arc<MockStats>,
}

impl MockChatEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always reply with exactly these fragments (still capped by `max_tokens`).
    pub fn with_fragments<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.behaviour.script = Some(fragments.into_iter().map(Into::into).collect());
        self
    }

    /// Fail with an inference error after `n` fragments.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.behaviour.fail_after = Some(n);
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.behaviour.load_delay = delay;
        self
    }

    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.behaviour.fragment_delay = delay;
        self
    }

    /// Make loads of `identity` fail.
    pub fn with_unloadable(mut self, identity: impl Into<String>) -> Self {
        self.behaviour.unloadable.insert(identity.into());
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }
}

impl ModelLoader for MockChatEngine {
    type Model = DynChatModel;

    fn load_model(&self, spec: &ModelSpec) -> Result<DynChatModel> {
        check_loadable(&self.behaviour.unloadable, self.behaviour.load_delay, spec)?;
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockChatModel {
            identity: spec.identity.clone(),
            behaviour: self.behaviour.clone(),
            history: Vec::new(),
            stats: self.stats.clone(),
        }))
    }
}

fn check_loadable(unloadable: &HashSet<String>, delay: Duration, spec: &ModelSpec) -> Result<()> {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
    if unloadable.contains(spec.identity.as_str()) {
        return Err(EngineError::ModelLoad(format!(
            "no model found at {}",
            spec.local_path().display()
        )));
    }
    Ok(())
}

struct MockChatModel {
    identity: ModelIdentity,
    behaviour: ChatBehaviour,
    history: Vec<ChatTurn>,
    stats: Arc<MockStats>,
}

impl MockChatModel {
    fn reply_for(&self, history: &[ChatTurn]) -> Vec<String> {
        if let Some(script) = &self.behaviour.script {
            return script.clone();
        }
        let last = history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .unwrap_or("");
        let words: Vec<&str> = last.split_whitespace().collect();
        words
            .iter()
            .enumerate()
            .map(|(i, w)| {
                if i + 1 < words.len() {
                    format!("{w} ")
                } else {
                    w.to_string()
                }
            })
            .collect()
    }
}

impl ChatModel for MockChatModel {
    fn prepare(&mut self, turns: &[ChatTurn]) -> Result<PreparedInput> {
        self.history = turns.to_vec();
        if let Ok(mut last) = self.stats.last_history.lock() {
            *last = Some(self.history.clone());
        }
        let tokens = turns
            .iter()
            .flat_map(|t| t.content.split_whitespace())
            .enumerate()
            .map(|(i, _)| i as TokenId)
            .collect();
        Ok(PreparedInput { tokens })
    }

    fn generate<'a>(
        &'a mut self,
        _input: PreparedInput,
        params: &GenerateParameters,
    ) -> Result<Fragments<'a>> {
        if let Ok(mut last) = self.stats.last_params.lock() {
            *last = Some(*params);
        }
        let mut reply = self.reply_for(&self.history).into_iter().take(params.max_tokens);
        let fail_after = self.behaviour.fail_after;
        let delay = self.behaviour.fragment_delay;
        let stats = self.stats.clone();
        let identity = self.identity.clone();
        let mut produced = 0usize;
        let mut failed = false;

        Ok(Box::new(std::iter::from_fn(move || {
            if failed {
                return None;
            }
            if fail_after == Some(produced) {
                failed = true;
                return Some(Err(EngineError::Inference(format!(
                    "{identity} failed after {produced} fragments"
                ))));
            }
            let next = reply.next()?;
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            produced += 1;
            stats.fragments.fetch_add(1, Ordering::SeqCst);
            Some(Ok(next))
        })))
    }
}

#[derive(Debug, Clone, Default)]
struct EmbeddingBehaviour {
    dim: usize,
    fixed: Option<Vec<f32>>,
    load_delay: Duration,
    unloadable: HashSet<String>,
}

/// Embedding engine producing deterministic, byte-derived vectors.
#[derive(Debug, Clone)]
pub struct MockEmbeddingEngine {
    behaviour: EmbeddingBehaviour,
    stats: Arc<MockStats>,
}

impl Default for MockEmbeddingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbeddingEngine {
    pub fn new() -> Self {
        Self {
            behaviour: EmbeddingBehaviour {
                dim: 8,
                ..Default::default()
            },
            stats: Arc::new(MockStats::default()),
        }
    }

    pub fn with_dimension(mut self, dim: usize) -> Self {
        self.behaviour.dim = dim;
        self
    }

    /// Return exactly `vector` for every input, bypassing pooling.
    pub fn with_fixed_vector(mut self, vector: Vec<f32>) -> Self {
        self.behaviour.dim = vector.len();
        self.behaviour.fixed = Some(vector);
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.behaviour.load_delay = delay;
        self
    }

    pub fn with_unloadable(mut self, identity: impl Into<String>) -> Self {
        self.behaviour.unloadable.insert(identity.into());
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }
}

impl ModelLoader for MockEmbeddingEngine {
    type Model = DynEmbeddingModel;

    fn load_model(&self, spec: &ModelSpec) -> Result<DynEmbeddingModel> {
        check_loadable(&self.behaviour.unloadable, self.behaviour.load_delay, spec)?;
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEmbeddingModel {
            behaviour: self.behaviour.clone(),
            stats: self.stats.clone(),
        }))
    }
}

struct MockEmbeddingModel {
    behaviour: EmbeddingBehaviour,
    stats: Arc<MockStats>,
}

impl EmbeddingModel for MockEmbeddingModel {
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        Ok(text.bytes().map(TokenId::from).collect())
    }

    fn forward(&mut self, tokens: &[TokenId]) -> Result<HiddenStates> {
        let dim = self.behaviour.dim;
        let mut data = Vec::with_capacity(tokens.len() * dim);
        for &t in tokens {
            for j in 0..dim {
                data.push(((t as usize * (j + 1)) % 17) as f32 / 17.0);
            }
        }
        self.stats.embeds.fetch_add(1, Ordering::SeqCst);
        HiddenStates::new(tokens.len(), dim, data)
    }

    fn pool(&self, hidden: &HiddenStates, normalize: bool) -> Result<Vec<f32>> {
        if let Some(fixed) = &self.behaviour.fixed {
            return Ok(fixed.clone());
        }
        let mut pooled = modelhost_engine::mean_pool(hidden)?;
        if normalize {
            modelhost_engine::l2_normalize(&mut pooled);
        }
        Ok(pooled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> ModelSpec {
        ModelSpec::new(id.into(), "/tmp/models")
    }

    #[test]
    fn echo_mode_replays_last_user_turn() {
        let engine = MockChatEngine::new();
        let mut model = engine.load_model(&spec("m")).unwrap();
        let turns = vec![
            ChatTurn::new(Role::System, "be brief"),
            ChatTurn::new(Role::User, "hello there friend"),
        ];
        let input = model.prepare(&turns).unwrap();
        let out: Vec<String> = model
            .generate(input, &GenerateParameters::default())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(out.concat(), "hello there friend");
        assert_eq!(engine.stats().fragments_produced(), 3);
    }

    #[test]
    fn scripted_failure_stops_sequence() {
        let engine = MockChatEngine::new()
            .with_fragments(["a", "b", "c"])
            .failing_after(1);
        let mut model = engine.load_model(&spec("m")).unwrap();
        let input = model.prepare(&[]).unwrap();
        let items: Vec<Result<String>> = model
            .generate(input, &GenerateParameters::default())
            .unwrap()
            .collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        assert!(items[1].is_err());
    }

    #[test]
    fn unloadable_identity_fails_with_path() {
        let engine = MockChatEngine::new().with_unloadable("org/missing");
        let err = match engine.load_model(&spec("org/missing")) {
            Err(e) => e,
            Ok(_) => panic!("load should fail"),
        };
        assert!(err.to_string().contains("org--missing"));
        assert_eq!(engine.stats().load_count(), 0);
    }

    #[test]
    fn embedding_vectors_are_deterministic_and_sized() {
        let engine = MockEmbeddingEngine::new().with_dimension(16);
        let mut model = engine.load_model(&spec("e")).unwrap();
        let embed = |m: &mut DynEmbeddingModel, text: &str| {
            let tokens = m.tokenize(text).unwrap();
            let hidden = m.forward(&tokens).unwrap();
            m.pool(&hidden, true).unwrap()
        };
        let a = embed(&mut model, "hello");
        let b = embed(&mut model, "hello");
        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
    }
}
