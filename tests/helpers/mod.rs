#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use image::{DynamicImage, Rgb, RgbImage};
use rusqlite::Connection;

use smartscan::coordinator::Coordinator;
use smartscan::embedding::frames::FrameSampler;
use smartscan::embedding::{
    Encoder, ImageEmbeddingProvider, ModelName, ProviderFactory, TextEmbeddingProvider,
};
use smartscan::index::{
    Collections, EmbeddingStage, ModalityRouter, ProgressEvent, RunResources,
};
use smartscan::index::events::EventReceiver;
use smartscan::store::{QueryResult, VectorStore};

/// Red channel of the frame returned by [`StubFrames`].
pub const FRAME_RED: u8 = 7;

/// Called with the zero-based call index before each embedding.
pub type Hook = Arc<dyn Fn(usize) + Send + Sync>;

/// Shared database with schema and migrations applied.
pub fn test_db() -> Arc<Mutex<Connection>> {
    Arc::new(Mutex::new(smartscan::db::open_memory_database().unwrap()))
}

/// One-hot vector of `dims` at `index % dims`.
pub fn one_hot(index: usize, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    v[index % dims] = 1.0;
    v
}

/// The embedding [`MockImage`] produces for an image whose first pixel has red `red`.
pub fn image_embedding(red: u8, dims: usize) -> Vec<f32> {
    one_hot(red as usize, dims)
}

/// The embedding [`MockText`] produces for `text`.
pub fn text_embedding(text: &str, dims: usize) -> Vec<f32> {
    one_hot(text.bytes().map(usize::from).sum(), dims)
}

/// Counts lifecycle calls.
#[derive(Default)]
pub struct Lifecycle {
    pub inits: AtomicUsize,
    pub closes: AtomicUsize,
    pub embeds: AtomicUsize,
}

/// Image provider keyed on the red channel of the first pixel.
pub struct MockImage {
    pub model: ModelName,
    pub fail_init: bool,
    pub hook: Option<Hook>,
    pub lifecycle: Arc<Lifecycle>,
}

impl MockImage {
    pub fn new(model: ModelName) -> Self {
        Self {
            model,
            fail_init: false,
            hook: None,
            lifecycle: Arc::default(),
        }
    }

    pub fn with_hook(mut self, hook: Hook) -> Self {
        self.hook = Some(hook);
        self
    }
}

impl Encoder for MockImage {
    fn init(&self) -> Result<()> {
        if self.fail_init {
            bail!("weights for {} are missing", self.model);
        }
        self.lifecycle.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.lifecycle.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn model(&self) -> ModelName {
        self.model
    }
}

impl ImageEmbeddingProvider for MockImage {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let call = self.lifecycle.embeds.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.hook {
            hook(call);
        }
        let red = image.to_rgb8().get_pixel(0, 0)[0];
        Ok(image_embedding(red, self.model.dimensions()))
    }
}

/// Text provider that fails on documents containing `FAIL`.
pub struct MockText {
    pub model: ModelName,
    pub fail_init: bool,
    pub lifecycle: Arc<Lifecycle>,
}

impl MockText {
    pub fn new(model: ModelName) -> Self {
        Self {
            model,
            fail_init: false,
            lifecycle: Arc::default(),
        }
    }
}

impl Encoder for MockText {
    fn init(&self) -> Result<()> {
        if self.fail_init {
            bail!("weights for {} are missing", self.model);
        }
        self.lifecycle.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.lifecycle.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn model(&self) -> ModelName {
        self.model
    }
}

impl TextEmbeddingProvider for MockText {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.lifecycle.embeds.fetch_add(1, Ordering::SeqCst);
        if text.contains("FAIL") {
            bail!("tokenizer rejected input");
        }
        Ok(text_embedding(text, self.model.dimensions()))
    }
}

/// Returns a small solid frame for any video.
pub struct StubFrames;

impl FrameSampler for StubFrames {
    fn sample(&self, _video: &Path) -> Result<DynamicImage> {
        Ok(solid(FRAME_RED))
    }
}

/// Builds mock providers, sharing one lifecycle counter per model.
#[derive(Default)]
pub struct MockFactory {
    pub fail_init: HashSet<ModelName>,
    pub image_hook: Mutex<Option<Hook>>,
    pub lifecycles: Mutex<Vec<(ModelName, Arc<Lifecycle>)>>,
}

impl MockFactory {
    pub fn lifecycle(&self, model: ModelName) -> Arc<Lifecycle> {
        let mut lifecycles = self.lifecycles.lock().unwrap();
        if let Some((_, l)) = lifecycles.iter().find(|(m, _)| *m == model) {
            return l.clone();
        }
        let l = Arc::new(Lifecycle::default());
        lifecycles.push((model, l.clone()));
        l
    }

    pub fn set_image_hook(&self, hook: Hook) {
        *self.image_hook.lock().unwrap() = Some(hook);
    }
}

impl ProviderFactory for MockFactory {
    fn image_provider(&self, model: ModelName) -> Result<Arc<dyn ImageEmbeddingProvider>> {
        Ok(Arc::new(MockImage {
            model,
            fail_init: self.fail_init.contains(&model),
            hook: self.image_hook.lock().unwrap().clone(),
            lifecycle: self.lifecycle(model),
        }))
    }

    fn text_provider(&self, model: ModelName) -> Result<Arc<dyn TextEmbeddingProvider>> {
        Ok(Arc::new(MockText {
            model,
            fail_init: self.fail_init.contains(&model),
            lifecycle: self.lifecycle(model),
        }))
    }
}

pub fn default_router() -> ModalityRouter {
    ModalityRouter::new(&["png", "jpg"], &["txt", "md"], &["mp4"]).unwrap()
}

/// Coordinator over an in-memory database with dinov2-small and all-minilm-l6-v2 mocks.
pub fn test_coordinator(factory: Arc<MockFactory>) -> Arc<Coordinator> {
    Arc::new(
        Coordinator::new(
            test_db(),
            factory,
            Arc::new(StubFrames),
            default_router(),
            ModelName::Dinov2Small,
            ModelName::AllMiniLmL6V2,
        )
        .unwrap(),
    )
}

/// Wraps a store, recording the size of every `add` and optionally failing it.
pub struct RecordingStore {
    pub inner: Arc<dyn VectorStore>,
    pub fail: bool,
    pub adds: Mutex<Vec<usize>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<dyn VectorStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail: false,
            adds: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(inner: Arc<dyn VectorStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail: true,
            adds: Mutex::new(Vec::new()),
        })
    }

    pub fn add_sizes(&self) -> Vec<usize> {
        self.adds.lock().unwrap().clone()
    }
}

impl VectorStore for RecordingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn add(&self, ids: &[String], embeddings: &[Vec<f32>]) -> Result<usize> {
        if self.fail {
            bail!("database is locked");
        }
        self.adds.lock().unwrap().push(ids.len());
        self.inner.add(ids, embeddings)
    }

    fn get(&self, limit: usize, offset: usize) -> Result<Vec<String>> {
        self.inner.get(limit, offset)
    }

    fn count(&self) -> Result<usize> {
        self.inner.count()
    }

    fn query(&self, embeddings: &[Vec<f32>], n_results: usize) -> Result<Vec<QueryResult>> {
        self.inner.query(embeddings, n_results)
    }
}

/// Run resources built directly from providers and collections.
pub fn resources(
    image: Arc<dyn ImageEmbeddingProvider>,
    text: Arc<dyn TextEmbeddingProvider>,
    collections: Collections,
) -> RunResources {
    RunResources {
        stage: Arc::new(EmbeddingStage::new(image, text, Arc::new(StubFrames))),
        collections,
        router: default_router(),
    }
}

/// A 4x4 image filled with `red`.
pub fn solid(red: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([red, 0, 0])))
}

pub fn write_png(dir: &Path, name: &str, red: u8) -> PathBuf {
    let path = dir.join(name);
    solid(red).save(&path).unwrap();
    path
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Every event up to and including the terminal one.
pub async fn drain(mut rx: EventReceiver) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn progress_values(events: &[ProgressEvent]) -> Vec<f32> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect()
}

pub fn error_items(events: &[ProgressEvent]) -> Vec<String> {
    let mut items: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Error { item, .. } => Some(item.clone()),
            _ => None,
        })
        .collect();
    items.sort();
    items
}

/// Asserts `Active` first, exactly one terminal event, and that it is last.
pub fn assert_well_formed(events: &[ProgressEvent]) {
    assert_eq!(events.first(), Some(&ProgressEvent::Active), "{events:?}");
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "{events:?}");
    assert!(events.last().is_some_and(|e| e.is_terminal()), "{events:?}");
}
