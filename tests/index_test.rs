mod helpers;

use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use smartscan::coordinator::SwapError;
use smartscan::embedding::ModelName;
use smartscan::index::{
    event_channel, Collections, IndexError, IndexOptions, IndexRun, Indexer, Modality,
    ProgressEvent, RunResult, RunState,
};
use smartscan::store::{SqliteCollection, VectorStore};
use tokio_util::sync::CancellationToken;

use helpers::*;

fn options(batch_size: usize, workers: usize) -> IndexOptions {
    IndexOptions {
        batch_size,
        workers,
        page_size: 2,
    }
}

type Stores = (
    Arc<SqliteCollection>,
    Arc<SqliteCollection>,
    Arc<SqliteCollection>,
);

fn sqlite_collections(db: &Arc<Mutex<rusqlite::Connection>>) -> Stores {
    let open = |model, modality| {
        Arc::new(SqliteCollection::get_or_create(db.clone(), model, modality).unwrap())
    };
    (
        open(ModelName::Dinov2Small, Modality::Image),
        open(ModelName::AllMiniLmL6V2, Modality::Text),
        open(ModelName::Dinov2Small, Modality::Video),
    )
}

#[tokio::test]
async fn indexes_every_modality_and_counts_flushed_items() {
    let dir = tempfile::tempdir().unwrap();
    let files = vec![
        write_png(dir.path(), "a.png", 1),
        write_png(dir.path(), "b.PNG", 2),
        write_file(dir.path(), "notes.md", "meeting notes"),
        write_file(dir.path(), "clip.mp4", "not really a video"),
        write_file(dir.path(), "archive.zip", "zip"),
    ];

    let coordinator = test_coordinator(Arc::new(MockFactory::default()));
    let indexer = Indexer::new(coordinator.clone(), options(2, 2));
    let (tx, rx) = event_channel();

    let result = indexer.run(files, tx).await.unwrap();
    let events = drain(rx).await;

    assert_eq!(result.total_processed(), Some(4));
    assert_eq!(result.state(), RunState::Completed);
    assert_eq!(indexer.state(), RunState::Completed);
    assert_well_formed(&events);
    assert!(error_items(&events).is_empty(), "unsupported files are not errors");
    match events.last() {
        Some(ProgressEvent::Complete { total_processed, .. }) => assert_eq!(*total_processed, 4),
        other => panic!("unexpected terminal event: {other:?}"),
    }

    assert_eq!(coordinator.collection(Modality::Image).count().unwrap(), 2);
    assert_eq!(coordinator.collection(Modality::Text).count().unwrap(), 1);
    assert_eq!(coordinator.collection(Modality::Video).count().unwrap(), 1);

    let video_hits = coordinator
        .collection(Modality::Video)
        .query(&[image_embedding(FRAME_RED, 384)], 1)
        .unwrap();
    assert!(video_hits[0].ids[0].ends_with("clip.mp4"));
}

#[tokio::test]
async fn progress_is_monotonic_and_reaches_one() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<_> = (0..5u8)
        .map(|i| write_png(dir.path(), &format!("{i}.png"), i))
        .collect();

    let coordinator = test_coordinator(Arc::new(MockFactory::default()));
    let indexer = Indexer::new(coordinator, options(2, 3));
    let (tx, rx) = event_channel();
    indexer.run(files, tx).await.unwrap();

    let progress = progress_values(&drain(rx).await);
    assert_eq!(progress.len(), 5);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));
    assert_eq!(*progress.last().unwrap(), 1.0);
}

#[tokio::test]
async fn rerun_skips_everything_already_indexed() {
    let dir = tempfile::tempdir().unwrap();
    let files = vec![
        write_png(dir.path(), "a.png", 1),
        write_file(dir.path(), "b.txt", "hello"),
    ];

    let coordinator = test_coordinator(Arc::new(MockFactory::default()));
    let indexer = Indexer::new(coordinator.clone(), options(8, 2));

    let (tx, rx) = event_channel();
    indexer.run(files.clone(), tx).await.unwrap();
    drain(rx).await;

    let (tx, rx) = event_channel();
    let result = indexer.run(files, tx).await.unwrap();
    let events = drain(rx).await;

    assert_eq!(result.total_processed(), Some(0));
    assert_eq!(
        events,
        vec![
            ProgressEvent::Active,
            ProgressEvent::Progress(1.0),
            events.last().cloned().unwrap(),
        ],
        "an empty run reports itself done"
    );
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Complete {
            total_processed: 0,
            ..
        })
    ));
    assert_eq!(coordinator.collection(Modality::Image).count().unwrap(), 1);
}

#[tokio::test]
async fn duplicate_candidates_are_embedded_once() {
    let dir = tempfile::tempdir().unwrap();
    let png = write_png(dir.path(), "a.png", 1);

    let factory = Arc::new(MockFactory::default());
    let coordinator = test_coordinator(factory.clone());
    let indexer = Indexer::new(coordinator, options(8, 2));
    let (tx, rx) = event_channel();

    let result = indexer.run(vec![png.clone(), png], tx).await.unwrap();
    drain(rx).await;

    assert_eq!(result.total_processed(), Some(1));
    assert_eq!(
        factory.lifecycle(ModelName::Dinov2Small).embeds.load(Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn item_failures_become_error_events() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_png(dir.path(), "good.png", 3);
    let corrupt = write_file(dir.path(), "corrupt.png", "not an image");
    let rejected = write_file(dir.path(), "rejected.txt", "please FAIL");
    let empty = write_file(dir.path(), "empty.md", "");

    let coordinator = test_coordinator(Arc::new(MockFactory::default()));
    let indexer = Indexer::new(coordinator, options(4, 2));
    let (tx, rx) = event_channel();

    let result = indexer
        .run(vec![good, corrupt.clone(), rejected.clone(), empty.clone()], tx)
        .await
        .unwrap();
    let events = drain(rx).await;

    assert_well_formed(&events);
    assert_eq!(result.total_processed(), Some(1));
    let mut expected: Vec<String> = [corrupt, rejected, empty]
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    expected.sort();
    assert_eq!(error_items(&events), expected);
    assert_eq!(*progress_values(&events).last().unwrap(), 1.0);
}

#[tokio::test]
async fn batches_are_bounded_by_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<_> = (0..3u8)
        .map(|i| write_png(dir.path(), &format!("{i}.png"), i))
        .collect();

    let db = test_db();
    let (image, text, video) = sqlite_collections(&db);
    let recording = RecordingStore::new(image.clone());
    let collections = Collections {
        image: recording.clone(),
        text,
        video,
    };
    let resources = resources(
        Arc::new(MockImage::new(ModelName::Dinov2Small)),
        Arc::new(MockText::new(ModelName::AllMiniLmL6V2)),
        collections,
    );

    let (tx, rx) = event_channel();
    let result = IndexRun::new(resources, options(2, 1), CancellationToken::new())
        .execute(files, smartscan::index::EventSink::new(tx))
        .await;
    let events = drain(rx).await;

    assert_eq!(result.total_processed(), Some(3));
    assert_eq!(recording.add_sizes(), vec![2, 1]);
    let batch_sizes: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::BatchComplete(items) => Some(items.len()),
            _ => None,
        })
        .collect();
    assert_eq!(batch_sizes, vec![2, 1]);
    assert_eq!(image.count().unwrap(), 3);
}

#[tokio::test]
async fn failed_partition_is_reported_and_the_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let png = write_png(dir.path(), "a.png", 1);
    let txt = write_file(dir.path(), "b.txt", "kept");

    let db = test_db();
    let (image, text, video) = sqlite_collections(&db);
    let collections = Collections {
        image: RecordingStore::failing(image.clone()),
        text: text.clone(),
        video,
    };
    let resources = resources(
        Arc::new(MockImage::new(ModelName::Dinov2Small)),
        Arc::new(MockText::new(ModelName::AllMiniLmL6V2)),
        collections,
    );

    let (tx, rx) = event_channel();
    let result = IndexRun::new(resources, options(8, 2), CancellationToken::new())
        .execute(vec![png.clone(), txt], smartscan::index::EventSink::new(tx))
        .await;
    let events = drain(rx).await;

    assert_well_formed(&events);
    assert_eq!(result.total_processed(), Some(1));
    assert_eq!(error_items(&events), vec![png.to_string_lossy().into_owned()]);
    assert_eq!(image.count().unwrap(), 0);
    assert_eq!(text.count().unwrap(), 1);
}

#[tokio::test]
async fn a_batch_that_cannot_be_written_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let files = vec![
        write_png(dir.path(), "a.png", 1),
        write_png(dir.path(), "b.png", 2),
        write_png(dir.path(), "c.png", 3),
    ];

    let db = test_db();
    let (image, text, video) = sqlite_collections(&db);
    let collections = Collections {
        image: RecordingStore::failing(image),
        text: RecordingStore::failing(text),
        video: RecordingStore::failing(video),
    };
    let resources = resources(
        Arc::new(MockImage::new(ModelName::Dinov2Small)),
        Arc::new(MockText::new(ModelName::AllMiniLmL6V2)),
        collections,
    );

    let (tx, rx) = event_channel();
    let result = IndexRun::new(resources, options(1, 1), CancellationToken::new())
        .execute(files, smartscan::index::EventSink::new(tx))
        .await;
    let events = drain(rx).await;

    assert_well_formed(&events);
    assert!(matches!(result, RunResult::Failed { .. }));
    assert!(matches!(events.last(), Some(ProgressEvent::Fail { .. })));
    // The run stops at the first failed batch.
    assert_eq!(progress_values(&events).len(), 1);
}

#[tokio::test]
async fn cancellation_stops_intake_and_flushes_the_open_batch() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<_> = (0..6u8)
        .map(|i| write_png(dir.path(), &format!("{i}.png"), i))
        .collect();

    let db = test_db();
    let (image, text, video) = sqlite_collections(&db);
    let token = CancellationToken::new();
    let cancel_on_second = {
        let token = token.clone();
        Arc::new(move |call: usize| {
            if call == 1 {
                token.cancel();
            }
        })
    };
    let resources = resources(
        Arc::new(MockImage::new(ModelName::Dinov2Small).with_hook(cancel_on_second)),
        Arc::new(MockText::new(ModelName::AllMiniLmL6V2)),
        Collections {
            image: image.clone(),
            text,
            video,
        },
    );

    let (tx, rx) = event_channel();
    let result = IndexRun::new(resources, options(10, 1), token)
        .execute(files, smartscan::index::EventSink::new(tx))
        .await;
    let events = drain(rx).await;

    assert_well_formed(&events);
    match result {
        RunResult::Cancelled {
            total_processed, ..
        } => assert_eq!(total_processed, 2),
        other => panic!("expected a cancelled run, got {other:?}"),
    }
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Complete {
            total_processed: 2,
            ..
        })
    ));
    assert_eq!(image.count().unwrap(), 2);
}

#[tokio::test]
async fn a_panicking_worker_is_reported_against_its_item() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_png(dir.path(), "a.png", 1);
    let second = write_png(dir.path(), "b.png", 2);

    let factory = Arc::new(MockFactory::default());
    factory.set_image_hook(Arc::new(|call: usize| {
        if call == 0 {
            panic!("corrupt model state");
        }
    }));
    let coordinator = test_coordinator(factory);
    let indexer = Indexer::new(coordinator.clone(), options(4, 1));

    let (tx, rx) = event_channel();
    let result = indexer.run(vec![first.clone(), second], tx).await.unwrap();
    let events = drain(rx).await;

    assert_well_formed(&events);
    assert_eq!(error_items(&events), vec![first.to_string_lossy().into_owned()]);
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Error { error, .. } if error.contains("panicked")
    )));
    assert_eq!(*progress_values(&events).last().unwrap(), 1.0);
    assert_eq!(result.total_processed(), Some(1));
    assert_eq!(coordinator.collection(Modality::Image).count().unwrap(), 1);
}

#[tokio::test]
async fn stop_right_after_spawning_a_run_cancels_it() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<_> = (0..20u8)
        .map(|i| write_png(dir.path(), &format!("{i}.png"), i))
        .collect();

    let coordinator = test_coordinator(Arc::new(MockFactory::default()));
    let indexer = Arc::new(Indexer::new(coordinator.clone(), options(4, 2)));

    let ticket = indexer.start().unwrap();
    assert_eq!(indexer.state(), RunState::Active);
    let (tx, rx) = event_channel();
    let run = tokio::spawn({
        let indexer = indexer.clone();
        async move { indexer.execute(ticket, files, tx).await }
    });
    // The spawned task has not been polled yet.
    indexer.stop();

    let result = run.await.unwrap();
    let events = drain(rx).await;

    assert_well_formed(&events);
    assert!(
        matches!(result, RunResult::Cancelled { total_processed: 0, .. }),
        "{result:?}"
    );
    assert_eq!(indexer.state(), RunState::Cancelled);
    assert_eq!(coordinator.collection(Modality::Image).count().unwrap(), 0);
}

#[tokio::test]
async fn a_reserved_slot_blocks_other_runs_until_dropped() {
    let coordinator = test_coordinator(Arc::new(MockFactory::default()));
    let indexer = Indexer::new(coordinator, IndexOptions::default());

    let ticket = indexer.start().unwrap();
    assert!(matches!(indexer.start(), Err(IndexError::AlreadyActive)));
    drop(ticket);

    assert_eq!(indexer.state(), RunState::Cancelled);
    let (tx, rx) = event_channel();
    assert!(indexer.run(Vec::new(), tx).await.is_ok());
    drain(rx).await;
}

#[tokio::test]
async fn stop_without_a_run_is_a_noop() {
    let coordinator = test_coordinator(Arc::new(MockFactory::default()));
    let indexer = Indexer::new(coordinator, IndexOptions::default());
    indexer.stop();
    indexer.stop();
    assert_eq!(indexer.state(), RunState::Idle);

    let (tx, rx) = event_channel();
    let result = indexer.run(Vec::new(), tx).await.unwrap();
    drain(rx).await;
    assert_eq!(result.total_processed(), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_run_and_model_swap_are_rejected_while_active() {
    let dir = tempfile::tempdir().unwrap();
    let png = write_png(dir.path(), "a.png", 9);

    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);
    let factory = Arc::new(MockFactory::default());
    factory.set_image_hook(Arc::new(move |_| {
        let _ = entered_tx.lock().unwrap().send(());
        let _ = release_rx.lock().unwrap().recv();
    }));

    let coordinator = test_coordinator(factory.clone());
    let indexer = Arc::new(Indexer::new(coordinator.clone(), options(4, 1)));

    let (tx, rx) = event_channel();
    let run = tokio::spawn({
        let indexer = indexer.clone();
        let png = png.clone();
        async move { indexer.run(vec![png], tx).await }
    });

    tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(10)))
        .await
        .unwrap()
        .expect("embedding never started");

    assert_eq!(indexer.state(), RunState::Active);
    let (tx2, _rx2) = event_channel();
    assert!(matches!(
        indexer.run(Vec::new(), tx2).await,
        Err(IndexError::AlreadyActive)
    ));
    assert!(matches!(
        coordinator.swap_image_model(ModelName::ClipVitB32Image),
        Err(SwapError::RunActive(Modality::Image))
    ));
    // Only images are being indexed, so the text slot is free.
    assert!(coordinator.swap_text_model(ModelName::ClipVitB32Text).unwrap());

    release_tx.send(()).unwrap();
    let result = run.await.unwrap().unwrap();
    assert_eq!(result.total_processed(), Some(1));
    drain(rx).await;

    assert!(!coordinator.is_running(Modality::Image));
    // The next embed call would block on the hook again; release it up front.
    release_tx.send(()).unwrap();
    assert!(coordinator.swap_image_model(ModelName::ClipVitB32Image).unwrap());
    assert_eq!(
        coordinator.collection(Modality::Image).name(),
        "clip-vit-b-32-image_image_collection"
    );

    let (tx, rx) = event_channel();
    let rerun = indexer.run(vec![png], tx).await.unwrap();
    drain(rx).await;
    assert_eq!(rerun.total_processed(), Some(1), "new collection starts empty");
    assert_eq!(coordinator.collection(Modality::Image).count().unwrap(), 1);
}
