use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::traits::{ModelLoader, SegmentationModel};

/// Lifecycle of the process-wide model.
///
/// `Loaded` and `Unavailable` are terminal: once reached, the weights are
/// never looked up again for the lifetime of the manager.
enum ModelState<M> {
    Uninitialized,
    Loaded(Arc<M>),
    Unavailable,
}

/// Discriminant of the current lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStateKind {
    Uninitialized,
    Loaded,
    Unavailable,
}

/// What callers get back from [`ModelLifecycleManager::acquire`].
pub enum ModelHandle<M> {
    Loaded(Arc<M>),
    /// No usable weights. Not an error: callers route to the legacy path.
    Unavailable,
}

impl<M> ModelHandle<M> {
    pub fn model(&self) -> Option<&Arc<M>> {
        match self {
            ModelHandle::Loaded(model) => Some(model),
            ModelHandle::Unavailable => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelHandle::Loaded(_))
    }
}

impl<M> Clone for ModelHandle<M> {
    fn clone(&self) -> Self {
        match self {
            ModelHandle::Loaded(model) => ModelHandle::Loaded(Arc::clone(model)),
            ModelHandle::Unavailable => ModelHandle::Unavailable,
        }
    }
}

/// Owns the single cached model instance.
///
/// The first `acquire` loads the weights under the write lock; concurrent
/// first callers block on that lock and then observe the settled state, so
/// the weights are loaded at most once and no caller sees a half-built model.
pub struct ModelLifecycleManager<L: ModelLoader> {
    loader: L,
    weights_path: PathBuf,
    state: RwLock<ModelState<L::Model>>,
}

impl<L: ModelLoader> ModelLifecycleManager<L> {
    pub fn new(loader: L, weights_path: impl Into<PathBuf>) -> Self {
        Self {
            loader,
            weights_path: weights_path.into(),
            state: RwLock::new(ModelState::Uninitialized),
        }
    }

    pub fn weights_path(&self) -> &Path {
        &self.weights_path
    }

    pub fn state(&self) -> ModelStateKind {
        match *self.state.read() {
            ModelState::Uninitialized => ModelStateKind::Uninitialized,
            ModelState::Loaded(_) => ModelStateKind::Loaded,
            ModelState::Unavailable => ModelStateKind::Unavailable,
        }
    }

    pub fn acquire(&self) -> ModelHandle<L::Model> {
        if let Some(handle) = Self::settled(&self.state.read()) {
            return handle;
        }

        let mut state = self.state.write();
        if let Some(handle) = Self::settled(&state) {
            return handle;
        }

        *state = self.load();
        Self::settled(&state).unwrap_or(ModelHandle::Unavailable)
    }

    fn settled(state: &ModelState<L::Model>) -> Option<ModelHandle<L::Model>> {
        match state {
            ModelState::Uninitialized => None,
            ModelState::Loaded(model) => Some(ModelHandle::Loaded(Arc::clone(model))),
            ModelState::Unavailable => Some(ModelHandle::Unavailable),
        }
    }

    fn load(&self) -> ModelState<L::Model> {
        if !self.weights_path.is_file() {
            warn!(
                weights = %self.weights_path.display(),
                "model weights not found; analyses will use legacy annotations"
            );
            return ModelState::Unavailable;
        }

        match self.loader.load(&self.weights_path) {
            Ok(model) => {
                info!(
                    backend = model.backend(),
                    input_size = model.input_size(),
                    "segmentation model ready"
                );
                ModelState::Loaded(Arc::new(model))
            }
            Err(e) => {
                error!(
                    weights = %self.weights_path.display(),
                    error = %e,
                    "failed to load model weights; analyses will use legacy annotations"
                );
                ModelState::Unavailable
            }
        }
    }
}
