//! Owner of the active providers and their collections.
//!
//! The coordinator hands each indexing run a snapshot of providers and
//! collections (see [`Coordinator::begin_run`]) together with a [`RunLease`].
//! A model swap is refused while any lease covers the modalities that model
//! serves. The image model serves both images and videos.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;

use crate::config::SmartScanConfig;
use crate::embedding::frames::{FfmpegFrameSampler, FrameSampler};
use crate::embedding::{
    ImageEmbeddingProvider, ModelKind, ModelName, OnnxProviderFactory, ProviderFactory,
    TextEmbeddingProvider,
};
use crate::index::{Collections, EmbeddingStage, Modality, ModalityRouter, RunResources};
use crate::store::SqliteCollection;

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("cannot change models while a {0} indexing run is active")]
    RunActive(Modality),

    #[error("{model} is not {expected} model")]
    WrongKind {
        model: ModelName,
        expected: &'static str,
    },

    #[error("model change failed: {0:#}")]
    Provider(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveModels {
    pub image: ModelName,
    pub text: ModelName,
}

struct State {
    image: Arc<dyn ImageEmbeddingProvider>,
    text: Arc<dyn TextEmbeddingProvider>,
    image_store: Arc<SqliteCollection>,
    video_store: Arc<SqliteCollection>,
    text_store: Arc<SqliteCollection>,
    running: HashMap<Modality, usize>,
}

impl State {
    fn busy(&self, modality: Modality) -> bool {
        self.running.get(&modality).copied().unwrap_or(0) > 0
    }
}

pub struct Coordinator {
    db: Arc<Mutex<Connection>>,
    factory: Arc<dyn ProviderFactory>,
    frames: Arc<dyn FrameSampler>,
    router: ModalityRouter,
    state: Mutex<State>,
}

/// Marks modalities as in use by a run. Released on drop.
pub struct RunLease {
    coordinator: Arc<Coordinator>,
    modalities: HashSet<Modality>,
}

impl RunLease {
    /// Release every modality not in `keep`.
    pub fn retain(&mut self, keep: &HashSet<Modality>) {
        let released: Vec<Modality> = self.modalities.difference(keep).copied().collect();
        if released.is_empty() {
            return;
        }
        self.coordinator.release(&released);
        self.modalities.retain(|m| keep.contains(m));
    }

    pub fn modalities(&self) -> &HashSet<Modality> {
        &self.modalities
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        let held: Vec<Modality> = self.modalities.drain().collect();
        self.coordinator.release(&held);
    }
}

impl Coordinator {
    /// Create and initialise both providers and open their collections.
    pub fn new(
        db: Arc<Mutex<Connection>>,
        factory: Arc<dyn ProviderFactory>,
        frames: Arc<dyn FrameSampler>,
        router: ModalityRouter,
        image_model: ModelName,
        text_model: ModelName,
    ) -> Result<Self> {
        let image = factory.image_provider(image_model)?;
        image
            .init()
            .with_context(|| format!("failed to initialise image model {image_model}"))?;
        let text = factory.text_provider(text_model)?;
        text.init()
            .with_context(|| format!("failed to initialise text model {text_model}"))?;

        let open = |model, modality| -> Result<Arc<SqliteCollection>> {
            Ok(Arc::new(SqliteCollection::get_or_create(db.clone(), model, modality)?))
        };
        let state = State {
            image_store: open(image_model, Modality::Image)?,
            video_store: open(image_model, Modality::Video)?,
            text_store: open(text_model, Modality::Text)?,
            image,
            text,
            running: HashMap::new(),
        };

        tracing::info!(image = %image_model, text = %text_model, "models ready");
        Ok(Self {
            db,
            factory,
            frames,
            router,
            state: Mutex::new(state),
        })
    }

    /// Production setup: on-disk database, ONNX providers, ffmpeg frames.
    pub fn open(config: &SmartScanConfig) -> Result<Arc<Self>> {
        let db_path = config.resolved_db_path();
        let conn = crate::db::open_database(&db_path)?;
        tracing::info!(db = %db_path.display(), "database ready");

        let router = ModalityRouter::from_config(&config.indexing)?;
        let coordinator = Self::new(
            Arc::new(Mutex::new(conn)),
            Arc::new(OnnxProviderFactory::new(config.resolved_cache_dir())),
            Arc::new(FfmpegFrameSampler),
            router,
            config.models.image_encoder_model,
            config.models.text_encoder_model,
        )?;
        Ok(Arc::new(coordinator))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, modalities: &[Modality]) {
        let mut state = self.state();
        for modality in modalities {
            if let Some(count) = state.running.get_mut(modality) {
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Snapshot the current providers and collections for a new run. The
    /// lease initially covers every modality.
    ///
    /// Blocks while a model swap is in progress.
    pub fn begin_run(self: &Arc<Self>) -> (RunResources, RunLease) {
        let mut state = self.state();
        for modality in Modality::ALL {
            *state.running.entry(modality).or_insert(0) += 1;
        }

        let resources = RunResources {
            stage: Arc::new(EmbeddingStage::new(
                state.image.clone(),
                state.text.clone(),
                self.frames.clone(),
            )),
            collections: Collections {
                image: state.image_store.clone(),
                text: state.text_store.clone(),
                video: state.video_store.clone(),
            },
            router: self.router.clone(),
        };
        let lease = RunLease {
            coordinator: Arc::clone(self),
            modalities: Modality::ALL.into_iter().collect(),
        };
        (resources, lease)
    }

    pub fn is_running(&self, modality: Modality) -> bool {
        self.state().busy(modality)
    }

    pub fn active_models(&self) -> ActiveModels {
        let state = self.state();
        ActiveModels {
            image: state.image.model(),
            text: state.text.model(),
        }
    }

    pub fn image_provider(&self) -> Arc<dyn ImageEmbeddingProvider> {
        self.state().image.clone()
    }

    pub fn text_provider(&self) -> Arc<dyn TextEmbeddingProvider> {
        self.state().text.clone()
    }

    /// Current destination collection for `modality`.
    pub fn collection(&self, modality: Modality) -> Arc<SqliteCollection> {
        let state = self.state();
        match modality {
            Modality::Image => state.image_store.clone(),
            Modality::Text => state.text_store.clone(),
            Modality::Video => state.video_store.clone(),
        }
    }

    pub fn swap(&self, kind: ModelKind, model: ModelName) -> Result<bool, SwapError> {
        match kind {
            ModelKind::Image => self.swap_image_model(model),
            ModelKind::Text => self.swap_text_model(model),
        }
    }

    /// Replace the image model and repoint the image and video collections.
    /// Returns `false` if `model` is already active.
    ///
    /// On failure the previous model stays active.
    pub fn swap_image_model(&self, model: ModelName) -> Result<bool, SwapError> {
        if model.kind() != ModelKind::Image {
            return Err(SwapError::WrongKind {
                model,
                expected: "an image",
            });
        }

        let mut state = self.state();
        for modality in [Modality::Image, Modality::Video] {
            if state.busy(modality) {
                return Err(SwapError::RunActive(modality));
            }
        }
        let previous = state.image.model();
        if previous == model {
            return Ok(false);
        }

        let image_store = SqliteCollection::get_or_create(self.db.clone(), model, Modality::Image)?;
        let video_store = SqliteCollection::get_or_create(self.db.clone(), model, Modality::Video)?;
        let provider = self.factory.image_provider(model)?;

        state.image.close();
        if let Err(e) = provider.init() {
            if let Err(restore) = state.image.init() {
                tracing::error!(
                    model = %previous,
                    error = %restore,
                    "failed to restore previous image model"
                );
            }
            return Err(SwapError::Provider(
                e.context(format!("failed to initialise image model {model}")),
            ));
        }

        state.image = provider;
        state.image_store = Arc::new(image_store);
        state.video_store = Arc::new(video_store);
        tracing::info!(from = %previous, to = %model, "image model changed");
        Ok(true)
    }

    /// Replace the text model and repoint the text collection.
    pub fn swap_text_model(&self, model: ModelName) -> Result<bool, SwapError> {
        if model.kind() != ModelKind::Text {
            return Err(SwapError::WrongKind {
                model,
                expected: "a text",
            });
        }

        let mut state = self.state();
        if state.busy(Modality::Text) {
            return Err(SwapError::RunActive(Modality::Text));
        }
        let previous = state.text.model();
        if previous == model {
            return Ok(false);
        }

        let text_store = SqliteCollection::get_or_create(self.db.clone(), model, Modality::Text)?;
        let provider = self.factory.text_provider(model)?;

        state.text.close();
        if let Err(e) = provider.init() {
            if let Err(restore) = state.text.init() {
                tracing::error!(
                    model = %previous,
                    error = %restore,
                    "failed to restore previous text model"
                );
            }
            return Err(SwapError::Provider(
                e.context(format!("failed to initialise text model {model}")),
            ));
        }

        state.text = provider;
        state.text_store = Arc::new(text_store);
        tracing::info!(from = %previous, to = %model, "text model changed");
        Ok(true)
    }

    /// Release both providers.
    pub fn shutdown(&self) {
        let state = self.state();
        state.image.close();
        state.text.close();
        tracing::debug!("models released");
    }
}
