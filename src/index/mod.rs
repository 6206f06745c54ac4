//! Incremental multimodal indexing.
//!
//! Candidate paths go through dedup, modality routing, bounded-concurrency
//! embedding and batched writes. Progress is reported as [`ProgressEvent`]s
//! over a channel (see [`events`]).

pub mod batch;
pub mod dedup;
pub mod embed;
mod error;
pub mod events;
pub mod orchestrator;
pub mod router;
mod types;

pub use batch::{BatchAccumulator, Collections, FlushReport};
pub use embed::EmbeddingStage;
pub use error::{IndexError, ItemError};
pub use events::{event_channel, EventReceiver, EventSender, EventSink, Listener};
pub use orchestrator::{IndexOptions, IndexRun, Indexer, RunResources, RunTicket};
pub use router::ModalityRouter;
pub use types::{Candidate, EmbeddedItem, Modality, ProgressEvent, RunResult, RunState};
