//! Local multimodal file indexing with streaming batch embedding.
//!
//! SmartScan walks directories, embeds images, videos and text documents with
//! local ONNX models, and stores the vectors in per-modality collections for
//! similarity search. Indexing is incremental: files already present in a
//! collection are skipped.
//!
//! | Modality | Provider | Collection |
//! |----------|----------|------------|
//! | **Image** | image model (DINOv2-small or CLIP ViT-B/32) | `{image_model}_image_collection` |
//! | **Video** | image model on a sampled frame | `{image_model}_video_collection` |
//! | **Text** | text model (all-MiniLM-L6-v2 or CLIP ViT-B/32) | `{text_model}_text_collection` |
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   `vec0` tables, one per collection
//! - **Embeddings**: ONNX Runtime sessions, loaded on `init` and released on `close`
//! - **Pipeline**: dedup → modality routing → bounded-concurrency embedding →
//!   batched writes, reporting progress as events
//! - **Transport**: axum HTTP for search and a WebSocket for indexing sessions
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations, and health checks
//! - [`store`]: The vector collection boundary and its sqlite-vec implementation
//! - [`embedding`]: Model registry and embedding providers
//! - [`index`]: The indexing pipeline
//! - [`coordinator`]: Active models and collections, run leases, model swaps
//! - [`scan`]: Directory traversal
//! - [`server`]: HTTP and WebSocket endpoints

pub mod config;
pub mod coordinator;
pub mod db;
pub mod embedding;
pub mod index;
pub mod scan;
pub mod server;
pub mod store;
