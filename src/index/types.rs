//! Values that flow through an indexing run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// The kind of file being indexed. Determines provider and destination collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Image,
    Text,
    /// Embedded through the image provider from a sampled frame.
    Video,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Self::Image, Self::Text, Self::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Text => "text",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "text" => Ok(Self::Text),
            "video" => Ok(Self::Video),
            _ => Err(format!("unknown modality: {s}")),
        }
    }
}

/// A file accepted into a run. The id is the path as stored in the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub path: PathBuf,
    pub modality: Modality,
}

/// Output of the embedding stage, consumed once by the batch accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedItem {
    pub item_id: String,
    pub embedding: Vec<f32>,
    pub modality: Modality,
}

/// Lifecycle of an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Terminal value of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    Completed {
        total_processed: usize,
        time_elapsed: Duration,
    },
    /// Stopped early; the open batch was still flushed.
    Cancelled {
        total_processed: usize,
        time_elapsed: Duration,
    },
    Failed {
        error: String,
    },
}

impl RunResult {
    /// Items written to a collection, `None` for failed runs.
    pub fn total_processed(&self) -> Option<usize> {
        match self {
            Self::Completed { total_processed, .. } | Self::Cancelled { total_processed, .. } => {
                Some(*total_processed)
            }
            Self::Failed { .. } => None,
        }
    }

    pub fn state(&self) -> RunState {
        match self {
            Self::Completed { .. } => RunState::Completed,
            Self::Cancelled { .. } => RunState::Cancelled,
            Self::Failed { .. } => RunState::Failed,
        }
    }
}

/// Everything a listener can observe about a run.
///
/// `Active` is always first and exactly one of `Complete`/`Fail` is last;
/// `Progress`, `Error` and `BatchComplete` interleave in between.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Active,
    /// Fraction of accepted candidates attempted, in `[0, 1]`.
    Progress(f32),
    Error {
        item: String,
        error: String,
    },
    Fail {
        error: String,
    },
    /// Emitted for both normal completion and cancellation.
    Complete {
        total_processed: usize,
        time_elapsed: Duration,
    },
    /// Items just persisted by one flush.
    BatchComplete(Vec<EmbeddedItem>),
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Fail { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modality_round_trips() {
        for modality in Modality::ALL {
            assert_eq!(modality.as_str().parse::<Modality>().unwrap(), modality);
        }
        assert!("audio".parse::<Modality>().is_err());
        assert_eq!(serde_json::to_string(&Modality::Video).unwrap(), "\"video\"");
    }

    #[test]
    fn run_result_reports_state_and_count() {
        let done = RunResult::Completed {
            total_processed: 3,
            time_elapsed: Duration::from_millis(5),
        };
        assert_eq!(done.state(), RunState::Completed);
        assert_eq!(done.total_processed(), Some(3));

        let failed = RunResult::Failed {
            error: "boom".into(),
        };
        assert_eq!(failed.state(), RunState::Failed);
        assert!(failed.total_processed().is_none());
        assert!(RunState::Cancelled.is_terminal());
        assert!(!RunState::Active.is_terminal());
    }
}
