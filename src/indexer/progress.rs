//! Progress reporting
//!
//! The indexer reports through an `IndexObserver`. Hosts that prefer a
//! stream of events can wrap a channel in `ChannelObserver`.

use tokio::sync::mpsc;

/// Events emitted while indexing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexEvent {
    /// Percentage of the current run that is done
    Progress(u8),
    /// The queue ran dry
    Completed,
    /// A full rebuild is about to wipe the store
    RebuildStarting,
}

/// Receives indexing progress. Every method defaults to a no-op.
pub trait IndexObserver: Send + Sync {
    fn on_progress(&self, _percent: u8) {}

    fn on_complete(&self) {}

    fn on_rebuild_starting(&self) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl IndexObserver for NoopObserver {}

/// Forwards observer callbacks into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<IndexEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IndexEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: IndexEvent) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

impl IndexObserver for ChannelObserver {
    fn on_progress(&self, percent: u8) {
        self.send(IndexEvent::Progress(percent));
    }

    fn on_complete(&self) {
        self.send(IndexEvent::Completed);
    }

    fn on_rebuild_starting(&self) {
        self.send(IndexEvent::RebuildStarting);
    }
}

/// Rounded completion percentage. An empty run is complete.
pub fn progress_percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = (processed as f64 * 100.0 / total as f64).round();
    percent.min(100.0) as u8
}
