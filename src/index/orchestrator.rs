//! Driving one indexing run from candidate paths to persisted embeddings.
//!
//! A run proceeds through four phases:
//!
//! 1. **Accept**: drop ids already stored in any collection, then classify
//!    the rest by extension. Unsupported files are dropped silently.
//! 2. **Embed**: at most `workers` candidates are embedded concurrently on
//!    blocking threads. Cancellation is checked before each new candidate is
//!    taken; in-flight work is allowed to finish.
//! 3. **Batch**: successes go to a [`BatchAccumulator`]; each full batch is
//!    flushed with one `add` per modality.
//! 4. **Finish**: the residual batch is flushed and exactly one terminal
//!    event is emitted.
//!
//! Per-item problems become `Error` events. Only a batch whose every partition
//! fails, or an unreadable collection, ends the run with `Fail`.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::batch::{self, BatchAccumulator, Collections};
use super::dedup::{self, ExistingIds};
use super::embed::EmbeddingStage;
use super::events::{EventSender, EventSink};
use super::{
    Candidate, EmbeddedItem, IndexError, ItemError, Modality, ModalityRouter, RunResult, RunState,
};
use crate::config::IndexingConfig;
use crate::coordinator::{Coordinator, RunLease};

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub batch_size: usize,
    pub workers: usize,
    pub page_size: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            workers: 4,
            page_size: 100,
        }
    }
}

impl From<&IndexingConfig> for IndexOptions {
    fn from(config: &IndexingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            workers: config.workers.max(1),
            page_size: config.page_size.max(1),
        }
    }
}

/// Providers, collections and routing captured when a run starts. A model
/// swap after this point does not affect the run.
#[derive(Clone)]
pub struct RunResources {
    pub stage: Arc<EmbeddingStage>,
    pub collections: Collections,
    pub router: ModalityRouter,
}

/// A single run. Consumed by [`IndexRun::execute`].
pub struct IndexRun {
    run_id: Uuid,
    resources: RunResources,
    options: IndexOptions,
    cancel: CancellationToken,
    lease: Option<RunLease>,
}

/// Reason a run ended with `Fail`.
type Fatal = String;

impl IndexRun {
    pub fn new(resources: RunResources, options: IndexOptions, cancel: CancellationToken) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            resources,
            options,
            cancel,
            lease: None,
        }
    }

    /// Hold `lease` for the run's lifetime, narrowed to the modalities that
    /// actually have work once candidates are classified.
    pub fn with_lease(mut self, lease: RunLease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn execute(mut self, paths: Vec<PathBuf>, mut sink: EventSink) -> RunResult {
        let started = Instant::now();
        let run_id = self.run_id;
        sink.active();
        info!(%run_id, candidates = paths.len(), "indexing run started");

        let accepted = match self.accept(paths).await {
            Ok(accepted) => accepted,
            Err(reason) => return self.fail(sink, reason),
        };

        let modalities: HashSet<Modality> = accepted.iter().map(|c| c.modality).collect();
        if let Some(lease) = self.lease.as_mut() {
            lease.retain(&modalities);
        }

        match self.process(accepted, &mut sink).await {
            Ok((total_processed, cancelled)) => {
                let time_elapsed = started.elapsed();
                self.lease.take();
                info!(
                    %run_id,
                    total_processed,
                    cancelled,
                    elapsed_ms = time_elapsed.as_millis() as u64,
                    "indexing run finished"
                );
                sink.complete(total_processed, time_elapsed);
                if cancelled {
                    RunResult::Cancelled {
                        total_processed,
                        time_elapsed,
                    }
                } else {
                    RunResult::Completed {
                        total_processed,
                        time_elapsed,
                    }
                }
            }
            Err(reason) => self.fail(sink, reason),
        }
    }

    fn fail(mut self, sink: EventSink, reason: Fatal) -> RunResult {
        self.lease.take();
        error!(run_id = %self.run_id, error = %reason, "indexing run failed");
        sink.fail(reason.clone());
        RunResult::Failed { error: reason }
    }

    /// Deduplicate against every collection, then classify.
    async fn accept(&self, paths: Vec<PathBuf>) -> Result<Vec<Candidate>, Fatal> {
        let mut seen = HashSet::new();
        let ids: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let collections = self.resources.collections.clone();
        let page_size = self.options.page_size;
        let existing = tokio::task::spawn_blocking(move || -> anyhow::Result<ExistingIds> {
            let mut existing = ExistingIds::new();
            for modality in Modality::ALL {
                let store = collections.get(modality);
                let ids = dedup::fetch_existing_ids(Some(store.as_ref()), page_size)?;
                existing.insert(modality, ids);
            }
            Ok(existing)
        })
        .await
        .map_err(|e| format!("existing-id lookup panicked: {e}"))?
        .map_err(|e| format!("could not read indexed items: {e:#}"))?;

        let fresh = dedup::filter(&ids, &existing);
        let skipped = ids.len() - fresh.len();

        let mut unsupported = 0usize;
        let accepted: Vec<Candidate> = fresh
            .into_iter()
            .filter_map(|id| {
                let path = PathBuf::from(&id);
                match self.resources.router.classify(&path) {
                    Some(modality) => Some(Candidate { id, path, modality }),
                    None => {
                        unsupported += 1;
                        None
                    }
                }
            })
            .collect();

        debug!(
            run_id = %self.run_id,
            accepted = accepted.len(),
            already_indexed = skipped,
            unsupported,
            "candidates accepted"
        );
        Ok(accepted)
    }

    /// Embed, batch and flush. Returns `(total_processed, cancelled)`.
    async fn process(
        &self,
        candidates: Vec<Candidate>,
        sink: &mut EventSink,
    ) -> Result<(usize, bool), Fatal> {
        let total = candidates.len();
        let workers = self.options.workers.max(1);
        let mut pending = candidates.into_iter();
        let mut in_flight = JoinSet::new();
        let mut item_ids: HashMap<task::Id, String> = HashMap::new();
        let mut accumulator = BatchAccumulator::new(self.options.batch_size);
        let mut attempted = 0usize;
        let mut flushed = 0usize;
        let mut cancelled = false;

        if total == 0 {
            sink.progress(1.0);
        }

        loop {
            while !cancelled && in_flight.len() < workers && pending.len() > 0 {
                if self.cancel.is_cancelled() {
                    info!(run_id = %self.run_id, remaining = pending.len(), "cancellation requested");
                    cancelled = true;
                    break;
                }
                let Some(candidate) = pending.next() else {
                    break;
                };
                let item_id = candidate.id.clone();
                let stage = Arc::clone(&self.resources.stage);
                let handle = in_flight.spawn_blocking(move || stage.embed(&candidate));
                item_ids.insert(handle.id(), item_id);
            }

            let Some(joined) = in_flight.join_next_with_id().await else {
                break;
            };
            attempted += 1;

            let (item_id, outcome) = match joined {
                Ok((id, outcome)) => (item_ids.remove(&id), outcome),
                Err(e) if e.is_panic() => (item_ids.remove(&e.id()), Err(ItemError::Panicked)),
                Err(e) => (item_ids.remove(&e.id()), Err(ItemError::Aborted)),
            };
            let item_id = item_id.unwrap_or_default();

            let full = match outcome {
                Ok(item) => accumulator.offer(item),
                Err(e) => {
                    warn!(run_id = %self.run_id, item = %item_id, error = %e, "item failed to embed");
                    sink.error(&item_id, &e);
                    None
                }
            };
            sink.progress(attempted as f32 / total as f32);

            if let Some(full) = full {
                flushed += self.flush(full, sink).await?;
            }
        }

        if let Some(residual) = accumulator.finish() {
            flushed += self.flush(residual, sink).await?;
        }

        Ok((flushed, cancelled))
    }

    /// Persist one batch. Fatal only if no partition could be written.
    async fn flush(&self, batch: Vec<EmbeddedItem>, sink: &mut EventSink) -> Result<usize, Fatal> {
        let size = batch.len();
        let collections = self.resources.collections.clone();
        let report = tokio::task::spawn_blocking(move || batch::flush(&collections, batch))
            .await
            .map_err(|e| format!("batch flush panicked: {e}"))?;

        for failure in &report.failed {
            sink.error(
                &failure.item_id,
                format!("failed to write to {}: {}", failure.collection, failure.reason),
            );
        }

        if report.is_total_failure() {
            let reason = report
                .failed
                .first()
                .map(|f| f.reason.clone())
                .unwrap_or_default();
            return Err(format!("could not persist a batch of {size} items: {reason}"));
        }

        let inserted = report.inserted;
        debug!(
            run_id = %self.run_id,
            size,
            written = report.written.len(),
            inserted,
            "batch flushed"
        );
        if !report.written.is_empty() {
            sink.batch_complete(report.written);
        }
        Ok(inserted)
    }
}

struct Session {
    state: RunState,
    cancel: Option<CancellationToken>,
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Session-level orchestrator: one run at a time against a [`Coordinator`].
pub struct Indexer {
    coordinator: Arc<Coordinator>,
    options: IndexOptions,
    session: Arc<Mutex<Session>>,
}

/// A reserved run slot returned by [`Indexer::start`].
///
/// From the moment it exists the indexer is `Active` and [`Indexer::stop`]
/// reaches the run. Dropping it without executing returns the indexer to a
/// terminal state.
pub struct RunTicket {
    session: Arc<Mutex<Session>>,
    cancel: CancellationToken,
    finished: Option<RunState>,
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        let mut session = lock(&self.session);
        session.state = self.finished.unwrap_or(RunState::Cancelled);
        session.cancel = None;
    }
}

impl Indexer {
    pub fn new(coordinator: Arc<Coordinator>, options: IndexOptions) -> Self {
        Self {
            coordinator,
            options,
            session: Arc::new(Mutex::new(Session {
                state: RunState::Idle,
                cancel: None,
            })),
        }
    }

    pub fn state(&self) -> RunState {
        lock(&self.session).state
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Reserve the run slot. Fails if another run is active.
    pub fn start(&self) -> Result<RunTicket, IndexError> {
        let mut session = lock(&self.session);
        if session.state == RunState::Active {
            return Err(IndexError::AlreadyActive);
        }
        let cancel = CancellationToken::new();
        session.state = RunState::Active;
        session.cancel = Some(cancel.clone());
        Ok(RunTicket {
            session: Arc::clone(&self.session),
            cancel,
            finished: None,
        })
    }

    /// Run a reserved slot over `paths`, reporting through `events`. Returns
    /// once the terminal event has been emitted.
    pub async fn execute(
        &self,
        mut ticket: RunTicket,
        paths: Vec<PathBuf>,
        events: EventSender,
    ) -> RunResult {
        // A model swap may be holding the coordinator while it loads weights.
        let coordinator = Arc::clone(&self.coordinator);
        let result = match tokio::task::spawn_blocking(move || coordinator.begin_run()).await {
            Ok((resources, lease)) => {
                IndexRun::new(resources, self.options.clone(), ticket.cancel.clone())
                    .with_lease(lease)
                    .execute(paths, EventSink::new(events))
                    .await
            }
            Err(e) => {
                let reason = format!("could not start indexing: {e}");
                let mut sink = EventSink::new(events);
                sink.active();
                error!(error = %reason, "indexing run failed to start");
                sink.fail(reason.clone());
                RunResult::Failed { error: reason }
            }
        };

        ticket.finished = Some(result.state());
        result
    }

    /// [`start`](Self::start) then [`execute`](Self::execute).
    ///
    /// The only error is starting while another run is active.
    pub async fn run(
        &self,
        paths: Vec<PathBuf>,
        events: EventSender,
    ) -> Result<RunResult, IndexError> {
        let ticket = self.start()?;
        Ok(self.execute(ticket, paths, events).await)
    }

    /// Request cancellation of the active run. No-op when idle; idempotent.
    pub fn stop(&self) {
        let session = lock(&self.session);
        match &session.cancel {
            Some(token) if !token.is_cancelled() => {
                info!("stopping active indexing run");
                token.cancel();
            }
            _ => debug!("stop requested with no active run"),
        }
    }
}
