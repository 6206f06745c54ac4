//! Event delivery from a run to its listener.
//!
//! The run never calls a listener directly. It pushes [`ProgressEvent`]s into
//! an unbounded channel through an [`EventSink`]; whoever holds the receiver
//! decides how to present them. Sending never blocks, and a dropped receiver
//! only silences the run.

use std::time::Duration;

use tokio::sync::mpsc;

use super::{EmbeddedItem, ProgressEvent};

pub type EventSender = mpsc::UnboundedSender<ProgressEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Sending half owned by a single run.
///
/// The terminal methods take `self`, so nothing can be emitted after
/// `complete` or `fail`.
pub struct EventSink {
    tx: EventSender,
    connected: bool,
}

impl EventSink {
    pub fn new(tx: EventSender) -> Self {
        Self {
            tx,
            connected: true,
        }
    }

    fn send(&mut self, event: ProgressEvent) {
        if self.tx.send(event).is_err() && self.connected {
            self.connected = false;
            tracing::debug!("event listener went away, dropping further events");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected && !self.tx.is_closed()
    }

    pub fn active(&mut self) {
        self.send(ProgressEvent::Active);
    }

    pub fn progress(&mut self, fraction: f32) {
        self.send(ProgressEvent::Progress(fraction.clamp(0.0, 1.0)));
    }

    pub fn error(&mut self, item: &str, error: impl std::fmt::Display) {
        self.send(ProgressEvent::Error {
            item: item.to_string(),
            error: error.to_string(),
        });
    }

    pub fn batch_complete(&mut self, items: Vec<EmbeddedItem>) {
        self.send(ProgressEvent::BatchComplete(items));
    }

    pub fn complete(mut self, total_processed: usize, time_elapsed: Duration) {
        self.send(ProgressEvent::Complete {
            total_processed,
            time_elapsed,
        });
    }

    pub fn fail(mut self, error: impl Into<String>) {
        self.send(ProgressEvent::Fail {
            error: error.into(),
        });
    }
}

/// Callback-style consumer. Every hook defaults to doing nothing.
pub trait Listener {
    fn on_active(&mut self) {}
    fn on_progress(&mut self, _fraction: f32) {}
    fn on_error(&mut self, _error: &str, _item: &str) {}
    fn on_fail(&mut self, _error: &str) {}
    fn on_complete(&mut self, _total_processed: usize, _time_elapsed: Duration) {}
    fn on_batch_complete(&mut self, _items: &[EmbeddedItem]) {}
}

/// Route one event to the matching hook.
pub fn deliver<L: Listener + ?Sized>(listener: &mut L, event: &ProgressEvent) {
    match event {
        ProgressEvent::Active => listener.on_active(),
        ProgressEvent::Progress(fraction) => listener.on_progress(*fraction),
        ProgressEvent::Error { item, error } => listener.on_error(error, item),
        ProgressEvent::Fail { error } => listener.on_fail(error),
        ProgressEvent::Complete {
            total_processed,
            time_elapsed,
        } => listener.on_complete(*total_processed, *time_elapsed),
        ProgressEvent::BatchComplete(items) => listener.on_batch_complete(items),
    }
}

/// Drain `rx` into `listener` until a terminal event or until the sender is
/// dropped.
pub async fn dispatch<L: Listener + ?Sized>(mut rx: EventReceiver, listener: &mut L) {
    while let Some(event) = rx.recv().await {
        deliver(listener, &event);
        if event.is_terminal() {
            break;
        }
    }
}
