use thiserror::Error;

use super::Modality;

/// Misuse of the indexing API. Operational failures never surface here; they
/// are reported as listener events.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("an indexing run is already active")]
    AlreadyActive,

    #[error("extension .{extension} is configured for both {first} and {second}")]
    OverlappingExtension {
        extension: String,
        first: Modality,
        second: Modality,
    },
}

/// A single candidate could not be embedded. The run continues.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("failed to read file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("could not sample a video frame: {0:#}")]
    Frame(anyhow::Error),

    #[error("document is empty")]
    Empty,

    #[error("embedding failed: {0:#}")]
    Provider(anyhow::Error),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimensions { expected: usize, actual: usize },

    #[error("embedding worker panicked")]
    Panicked,

    #[error("embedding worker was cancelled")]
    Aborted,
}
