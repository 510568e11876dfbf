//! Single-flight model slots.
//!
//! A [`ModelSlot`] owns at most one loaded model. Loads are serialised: while
//! one is running, every other caller parks on a `watch` channel and is woken
//! when that load finishes, then re-checks whether the resident model is the
//! one it wanted. Concurrent requests for the same identity therefore converge
//! on one physical load; requests for different identities queue up behind
//! each other and the last successful load decides who stays resident.
//!
//! The load itself runs in a detached task. If the request that triggered it
//! goes away (client disconnect), the load still completes, the model is still
//! installed and the busy flag is still cleared.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use modelhost_engine::{EngineError, ModelIdentity, ModelLoader, ModelSpec};
use tokio::sync::watch;

/// Which kind of model a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Chat,
    Embedding,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::Chat => write!(f, "chat"),
            SlotKind::Embedding => write!(f, "embedding"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("{kind} model not loaded")]
    NotLoaded { kind: SlotKind },

    #[error("failed to load {identity}: {source}")]
    Load {
        identity: ModelIdentity,
        source: EngineError,
    },
}

/// Shared handle to a loaded model.
///
/// The inner mutex serialises engine calls: a backend expects one caller at a
/// time per model. Cloning is cheap and keeps the model alive, so a
/// generation that started before a switch finishes on the old model.
pub struct LoadedModel<M>(Arc<Mutex<M>>);

impl<M> Clone for LoadedModel<M> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<M> LoadedModel<M> {
    fn new(model: M) -> Self {
        Self(Arc::new(Mutex::new(model)))
    }

    /// Block until this caller has exclusive use of the model.
    pub fn lock(&self) -> Result<MutexGuard<'_, M>, EngineError> {
        self.0
            .lock()
            .map_err(|_| EngineError::Inference("model poisoned by an earlier panic".to_string()))
    }
}

struct Resident<M> {
    identity: ModelIdentity,
    model: LoadedModel<M>,
}

struct SlotState<M> {
    // Identity and handle travel together, so one is present iff the other is.
    resident: Option<Resident<M>>,
    loading: bool,
}

impl<M> SlotState<M> {
    fn holds(&self, identity: &ModelIdentity) -> bool {
        self.resident
            .as_ref()
            .is_some_and(|r| &r.identity == identity)
    }
}

/// Holder of at most one loaded model with single-flight loading.
pub struct ModelSlot<M> {
    kind: SlotKind,
    loader: Arc<dyn ModelLoader<Model = M>>,
    storage_dir: PathBuf,
    keep_previous_on_switch: bool,
    state: Mutex<SlotState<M>>,
    /// Bumped every time a load finishes, successfully or not.
    load_epoch: watch::Sender<u64>,
}

impl<M> ModelSlot<M> {
    /// Create an empty slot.
    pub fn new(
        kind: SlotKind,
        loader: Arc<dyn ModelLoader<Model = M>>,
        storage_dir: impl Into<PathBuf>,
    ) -> Self {
        let (load_epoch, _) = watch::channel(0);
        Self {
            kind,
            loader,
            storage_dir: storage_dir.into(),
            keep_previous_on_switch: true,
            state: Mutex::new(SlotState {
                resident: None,
                loading: false,
            }),
            load_epoch,
        }
    }

    /// Whether a failed switch falls back to the previously resident model.
    ///
    /// With `false` the old model is released before the new one loads, which
    /// halves peak memory but leaves the slot empty if the new load fails.
    pub fn with_keep_previous_on_switch(mut self, keep: bool) -> Self {
        self.keep_previous_on_switch = keep;
        self
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    /// Identity of the resident model, if any.
    pub fn current_identity(&self) -> Option<ModelIdentity> {
        self.state().resident.as_ref().map(|r| r.identity.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.state().resident.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    /// Scoped access to the resident model.
    ///
    /// `body` runs under the slot lock and must not block; take a clone of the
    /// [`LoadedModel`] and do the real work elsewhere.
    pub fn with_handle<T>(
        &self,
        body: impl FnOnce(&ModelIdentity, &LoadedModel<M>) -> T,
    ) -> Result<T, SlotError> {
        let state = self.state();
        let resident = state
            .resident
            .as_ref()
            .ok_or(SlotError::NotLoaded { kind: self.kind })?;
        Ok(body(&resident.identity, &resident.model))
    }

    fn state(&self) -> MutexGuard<'_, SlotState<M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_flight(&self) {
        self.state().loading = false;
        self.load_epoch.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }
}

impl<M: Send + 'static> ModelSlot<M> {
    /// Load `identity` unconditionally, replacing whatever is resident.
    ///
    /// Waits for any in-flight load first; two loads never overlap.
    pub async fn load(self: &Arc<Self>, identity: ModelIdentity) -> Result<(), SlotError> {
        loop {
            let mut done = {
                let mut state = self.state();
                if !state.loading {
                    state.loading = true;
                    break;
                }
                self.load_epoch.subscribe()
            };
            let _ = done.changed().await;
        }
        self.run_flight(identity).await
    }

    /// Make `identity` resident, loading it only if it is not already.
    pub async fn load_if_needed(self: &Arc<Self>, identity: &ModelIdentity) -> Result<(), SlotError> {
        loop {
            let mut done = {
                let mut state = self.state();
                if state.holds(identity) {
                    return Ok(());
                }
                if !state.loading {
                    state.loading = true;
                    break;
                }
                tracing::debug!(slot = %self.kind, model = %identity, "waiting for in-flight load");
                // Subscribed under the lock, so the completion bump cannot be missed.
                self.load_epoch.subscribe()
            };
            let _ = done.changed().await;
        }
        self.run_flight(identity.clone()).await
    }

    /// Run one load in a detached task. The caller must have set `loading`.
    async fn run_flight(self: &Arc<Self>, identity: ModelIdentity) -> Result<(), SlotError> {
        let flight = FlightGuard(Arc::clone(self));
        let target = identity.clone();
        let task = tokio::spawn(async move {
            let result = flight.0.install(target).await;
            drop(flight);
            result
        });

        match task.await {
            Ok(result) => result,
            Err(e) => Err(SlotError::Load {
                identity,
                source: EngineError::ModelLoad(format!("load task failed: {e}")),
            }),
        }
    }

    async fn install(&self, identity: ModelIdentity) -> Result<(), SlotError> {
        {
            let mut state = self.state();
            let previous = state.resident.as_ref().map(|r| r.identity.clone());
            if let Some(previous) = previous.filter(|p| *p != identity) {
                tracing::info!(slot = %self.kind, from = %previous, to = %identity, "switching model");
                if !self.keep_previous_on_switch {
                    state.resident = None;
                }
            }
        }

        tracing::info!(slot = %self.kind, model = %identity, "loading model");
        let started = Instant::now();
        let loader = Arc::clone(&self.loader);
        let spec = ModelSpec::new(identity.clone(), self.storage_dir.clone());

        let model = match tokio::task::spawn_blocking(move || loader.load_model(&spec)).await {
            Ok(Ok(model)) => model,
            Ok(Err(source)) => {
                tracing::warn!(slot = %self.kind, model = %identity, error = %source, "model load failed");
                return Err(SlotError::Load { identity, source });
            }
            Err(e) => {
                return Err(SlotError::Load {
                    identity,
                    source: EngineError::ModelLoad(format!("loader panicked: {e}")),
                });
            }
        };

        self.state().resident = Some(Resident {
            identity: identity.clone(),
            model: LoadedModel::new(model),
        });
        tracing::info!(
            slot = %self.kind,
            model = %identity,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model loaded"
        );
        Ok(())
    }
}

/// Clears the busy flag and wakes waiters however the load ends.
struct FlightGuard<M>(Arc<ModelSlot<M>>);

impl<M> Drop for FlightGuard<M> {
    fn drop(&mut self) {
        self.0.finish_flight();
    }
}
