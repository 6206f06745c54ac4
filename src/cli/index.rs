use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

use smartscan::config::{expand_tilde, SmartScanConfig};
use smartscan::coordinator::Coordinator;
use smartscan::index::events::dispatch;
use smartscan::index::{event_channel, IndexOptions, Indexer, Listener, RunResult};
use smartscan::scan::collect_files;

/// Renders run events as a terminal progress bar.
struct ProgressBarListener {
    bar: ProgressBar,
    errors: usize,
}

const STEPS: u64 = 1000;

impl ProgressBarListener {
    fn new() -> Self {
        let bar = ProgressBar::new(STEPS);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {percent:>3}% {elapsed_precise} {msg}")
                .expect("valid template")
                .progress_chars("##-"),
        );
        Self { bar, errors: 0 }
    }
}

impl Listener for ProgressBarListener {
    fn on_active(&mut self) {
        self.bar.set_message("indexing");
    }

    fn on_progress(&mut self, fraction: f32) {
        self.bar.set_position((fraction as f64 * STEPS as f64) as u64);
    }

    fn on_error(&mut self, error: &str, item: &str) {
        self.errors += 1;
        self.bar.println(format!("  skipped {item}: {error}"));
    }

    fn on_fail(&mut self, _error: &str) {
        self.bar.abandon();
    }

    fn on_complete(&mut self, _total_processed: usize, _time_elapsed: Duration) {
        self.bar.finish_and_clear();
    }
}

/// Index `dirs` (or the configured target directories) in this process.
pub async fn index(config: &SmartScanConfig, dirs: Vec<String>) -> Result<()> {
    let dirs = if dirs.is_empty() {
        config.indexing.target_dirs.clone()
    } else {
        dirs
    };
    anyhow::ensure!(
        !dirs.is_empty(),
        "no directories given and indexing.target_dirs is empty"
    );

    let dirs: Vec<PathBuf> = dirs.iter().map(|d| expand_tilde(d)).collect();
    let extensions = config.indexing.all_extensions();
    let files = tokio::task::spawn_blocking(move || collect_files(&dirs, &extensions)).await?;
    println!("Found {} candidate file(s)", files.len());

    let coordinator = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Coordinator::open(&config)).await??
    };
    let indexer = Arc::new(Indexer::new(
        coordinator.clone(),
        IndexOptions::from(&config.indexing),
    ));

    let (tx, rx) = event_channel();
    let run = tokio::spawn({
        let indexer = indexer.clone();
        async move { indexer.run(files, tx).await }
    });

    let interrupt = tokio::spawn({
        let indexer = indexer.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nStopping after in-flight items...");
                indexer.stop();
            }
        }
    });

    let mut listener = ProgressBarListener::new();
    dispatch(rx, &mut listener).await;
    let result = run.await??;
    interrupt.abort();
    coordinator.shutdown();

    match result {
        RunResult::Completed {
            total_processed,
            time_elapsed,
        } => {
            println!(
                "Indexed {total_processed} item(s) in {:.1}s ({} skipped)",
                time_elapsed.as_secs_f64(),
                listener.errors
            );
        }
        RunResult::Cancelled {
            total_processed,
            time_elapsed,
        } => {
            println!(
                "Stopped after indexing {total_processed} item(s) in {:.1}s",
                time_elapsed.as_secs_f64()
            );
        }
        RunResult::Failed { error } => anyhow::bail!("indexing failed: {error}"),
    }
    Ok(())
}
