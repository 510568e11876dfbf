//! # modelhost-engine
//!
//! The boundary between the serving layer and whatever actually runs the
//! network. Everything above this crate talks to models only through the
//! [`ModelLoader`], [`ChatModel`] and [`EmbeddingModel`] traits, so a Metal,
//! CPU or FFI backend can be swapped in without touching the server.
//!
//! ## Design Notes
//!
//! ### Blocking calls
//! Every method here is synchronous and may block for a long time (a load can
//! take minutes, a forward pass hundreds of milliseconds). Callers are expected
//! to run them on a blocking thread, never directly on an async worker.
//!
//! ### Mutability
//! Unlike a shared engine, a loaded model takes `&mut self` for inference. The
//! backend is assumed to support a single caller per model at a time; the
//! runtime serialises access with a mutex around each loaded model.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, EngineError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Top-level error type for all engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Name of a model: a registry id (`org/name`) or a local path.
///
/// Two identities are the same model iff the strings are byte-equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelIdentity(String);

impl ModelIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ModelIdentity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ModelIdentity {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for ModelIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Everything a backend needs to locate and load one model.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub identity: ModelIdentity,
    /// Root directory where downloaded models are kept.
    pub storage_dir: PathBuf,
}

impl ModelSpec {
    pub fn new(identity: ModelIdentity, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            identity,
            storage_dir: storage_dir.into(),
        }
    }

    /// Directory the model lives in on disk.
    ///
    /// Absolute identities are taken verbatim. Registry ids are flattened into
    /// the storage directory with `/` replaced by `--`, so
    /// `mlx-community/Llama-3.2-1B` maps to `<storage>/mlx-community--Llama-3.2-1B`.
    pub fn local_path(&self) -> PathBuf {
        let id = self.identity.as_str();
        if Path::new(id).is_absolute() {
            return PathBuf::from(id);
        }
        self.storage_dir.join(id.replace('/', "--"))
    }
}

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Map an OpenAI role string. Anything unrecognised is treated as `user`.
    pub fn from_wire(role: &str) -> Self {
        match role {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of conversation history, in the engine's representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sampling parameters for one generation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateParameters {
    /// Hard upper bound on the number of generated tokens.
    pub max_tokens: usize,
    /// Sampling temperature (0.0 = greedy).
    pub temperature: f32,
}

impl Default for GenerateParameters {
    fn default() -> Self {
        Self {
            max_tokens: 100,
            temperature: 0.6,
        }
    }
}

/// A conversation after the chat template has been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedInput {
    pub tokens: Vec<TokenId>,
}

/// Lazy, forward-only sequence of generated text fragments.
///
/// Each call to `next()` may run one or more decode steps. Dropping the
/// iterator stops generation; no further engine work is done.
pub type Fragments<'a> = Box<dyn Iterator<Item = Result<String>> + Send + 'a>;

/// The expensive, blocking load step. One loader serves one kind of model.
pub trait ModelLoader: Send + Sync {
    type Model: Send + 'static;

    /// Resolve and load the model named by `spec`.
    fn load_model(&self, spec: &ModelSpec) -> Result<Self::Model>;
}

/// A loaded causal language model.
pub trait ChatModel: Send {
    /// Apply the model's chat template and tokenise the conversation.
    fn prepare(&mut self, turns: &[ChatTurn]) -> Result<PreparedInput>;

    /// Start generating from a fresh context.
    ///
    /// No KV state from earlier calls may leak into this one; callers always
    /// resend the full history.
    fn generate<'a>(
        &'a mut self,
        input: PreparedInput,
        params: &GenerateParameters,
    ) -> Result<Fragments<'a>>;
}

impl<T: ChatModel + ?Sized> ChatModel for Box<T> {
    fn prepare(&mut self, turns: &[ChatTurn]) -> Result<PreparedInput> {
        (**self).prepare(turns)
    }

    fn generate<'a>(
        &'a mut self,
        input: PreparedInput,
        params: &GenerateParameters,
    ) -> Result<Fragments<'a>> {
        (**self).generate(input, params)
    }
}

/// Per-token output of an encoder forward pass, row-major `[rows, dim]`.
#[derive(Debug, Clone, PartialEq)]
pub struct HiddenStates {
    rows: usize,
    dim: usize,
    data: Vec<f32>,
}

impl HiddenStates {
    pub fn new(rows: usize, dim: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * dim {
            return Err(EngineError::Inference(format!(
                "hidden states shape mismatch: expected {rows}x{dim}={}, got {}",
                rows * dim,
                data.len()
            )));
        }
        Ok(Self { rows, dim, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }
}

/// Average the token rows into a single vector.
pub fn mean_pool(hidden: &HiddenStates) -> Result<Vec<f32>> {
    if hidden.rows == 0 {
        return Err(EngineError::Inference("no token states to pool".to_string()));
    }
    let mut pooled = vec![0.0f32; hidden.dim];
    for i in 0..hidden.rows {
        for (acc, v) in pooled.iter_mut().zip(hidden.row(i)) {
            *acc += v;
        }
    }
    let n = hidden.rows as f32;
    pooled.iter_mut().for_each(|v| *v /= n);
    Ok(pooled)
}

/// Scale `v` to unit length in place. A zero vector is left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// A loaded encoder model that maps text to a fixed-size vector.
pub trait EmbeddingModel: Send {
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Run the encoder over one sequence (batch size 1).
    fn forward(&mut self, tokens: &[TokenId]) -> Result<HiddenStates>;

    /// Collapse per-token states into one vector. Defaults to mean pooling.
    fn pool(&self, hidden: &HiddenStates, normalize: bool) -> Result<Vec<f32>> {
        let mut pooled = mean_pool(hidden)?;
        if normalize {
            l2_normalize(&mut pooled);
        }
        Ok(pooled)
    }
}

impl<T: EmbeddingModel + ?Sized> EmbeddingModel for Box<T> {
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        (**self).tokenize(text)
    }

    fn forward(&mut self, tokens: &[TokenId]) -> Result<HiddenStates> {
        (**self).forward(tokens)
    }

    fn pool(&self, hidden: &HiddenStates, normalize: bool) -> Result<Vec<f32>> {
        (**self).pool(hidden, normalize)
    }
}

pub type DynChatModel = Box<dyn ChatModel>;
pub type DynEmbeddingModel = Box<dyn EmbeddingModel>;

/// Loader for chat models, as a trait object.
pub type ChatLoader = dyn ModelLoader<Model = DynChatModel>;
/// Loader for embedding models, as a trait object.
pub type EmbeddingLoader = dyn ModelLoader<Model = DynEmbeddingModel>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_roles_fall_back_to_user() {
        assert_eq!(Role::from_wire("system"), Role::System);
        assert_eq!(Role::from_wire("assistant"), Role::Assistant);
        assert_eq!(Role::from_wire("user"), Role::User);
        assert_eq!(Role::from_wire("tool"), Role::User);
        assert_eq!(Role::from_wire(""), Role::User);
    }

    #[test]
    fn registry_id_maps_into_storage_dir() {
        let spec = ModelSpec::new("mlx-community/Llama-3.2-1B".into(), "/models");
        assert_eq!(
            spec.local_path(),
            PathBuf::from("/models/mlx-community--Llama-3.2-1B")
        );
    }

    #[test]
    fn absolute_identity_is_used_verbatim() {
        let spec = ModelSpec::new("/opt/weights/tiny".into(), "/models");
        assert_eq!(spec.local_path(), PathBuf::from("/opt/weights/tiny"));
    }

    #[test]
    fn mean_pool_averages_rows() {
        let hidden = HiddenStates::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(mean_pool(&hidden).unwrap(), vec![2.0, 3.0]);
    }

    #[test]
    fn mean_pool_rejects_empty_sequence() {
        let hidden = HiddenStates::new(0, 4, vec![]).unwrap();
        assert!(matches!(mean_pool(&hidden), Err(EngineError::Inference(_))));
    }

    #[test]
    fn hidden_states_checks_shape() {
        assert!(HiddenStates::new(2, 3, vec![0.0; 5]).is_err());
    }

    #[test]
    fn l2_normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
