//! Live per-database progress line on the status stream.
//!
//! The dump engine reports `(database, keys dumped so far)` pairs over a
//! bounded channel. A single [`ProgressAggregator`] task owns the per-database
//! counts and the status writer; [`ProgressSession`] starts it before a dump
//! and tears it down afterwards.

use std::collections::HashMap;
use std::io::Write;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Senders wait when the aggregator falls behind; events are never dropped.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub db: u8,
    /// Cumulative number of keys dumped for `db`.
    pub dumped: u64,
}

pub type ProgressSender = mpsc::Sender<ProgressEvent>;

pub struct ProgressAggregator<W> {
    out: W,
    quiet: bool,
    stats: HashMap<u8, u64>,
    last_db: Option<u8>,
}

impl<W: Write> ProgressAggregator<W> {
    pub fn new(out: W, quiet: bool) -> Self {
        Self {
            out,
            quiet,
            stats: HashMap::new(),
            last_db: None,
        }
    }

    /// Record `event` and redraw the status line.
    ///
    /// Moving to another database starts a new line first, so a line only
    /// ever carries one database label. A zero count is tracked but not
    /// drawn.
    pub fn record(&mut self, event: ProgressEvent) {
        let switched = !self.stats.is_empty() && self.last_db != Some(event.db);
        self.stats.insert(event.db, event.dumped);
        self.last_db = Some(event.db);

        if self.quiet {
            return;
        }
        if let Err(err) = self.draw(event, switched) {
            debug!(%err, "failed to write progress");
        }
    }

    fn draw(&mut self, event: ProgressEvent, switched: bool) -> std::io::Result<()> {
        if switched {
            self.out.write_all(b"\n")?;
        }
        if event.dumped == 0 {
            return self.out.flush();
        }
        write!(
            self.out,
            "\rDatabase {}: {} keys dumped",
            event.db, event.dumped
        )?;
        self.out.flush()
    }

    pub fn stats(&self) -> &HashMap<u8, u64> {
        &self.stats
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Consume events until every sender is gone, then end the status line.
    ///
    /// The channel closes however the senders went away, including a sender
    /// dropped while a panic unwinds, so the line is always finished.
    pub async fn drain(mut self, mut events: mpsc::Receiver<ProgressEvent>) -> Self {
        while let Some(event) = events.recv().await {
            self.record(event);
        }
        self.finish();
        self
    }

    fn finish(&mut self) {
        if self.quiet {
            return;
        }
        if let Err(err) = self.out.write_all(b"\n").and_then(|()| self.out.flush()) {
            debug!(%err, "failed to finish progress line");
        }
    }
}

/// Owns the progress channel for one dump: [`start`](Self::start) spawns the
/// aggregator, [`shutdown`](Self::shutdown) closes the channel and waits for
/// the aggregator to drain and finish the status line.
///
/// Dropping a session without calling `shutdown` still closes the channel;
/// the aggregator then drains, finishes the line and exits on its own.
pub struct ProgressSession<W> {
    sender: ProgressSender,
    aggregator: JoinHandle<ProgressAggregator<W>>,
}

impl<W> ProgressSession<W>
where
    W: Write + Send + 'static,
{
    /// Must be called from within a tokio runtime.
    pub fn start(out: W, quiet: bool) -> Self {
        let (sender, events) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let aggregator = tokio::spawn(ProgressAggregator::new(out, quiet).drain(events));
        Self { sender, aggregator }
    }

    /// Write-only handle for the dump engine. It is lent, never given away,
    /// so only [`shutdown`](Self::shutdown) decides when the channel closes.
    pub fn sender(&self) -> &ProgressSender {
        &self.sender
    }

    /// Close the channel and wait for the aggregator to end the status line.
    /// Returns the status writer, or `None` if the aggregator task died.
    pub async fn shutdown(self) -> Option<W> {
        let Self { sender, aggregator } = self;
        drop(sender);

        let aggregator = match aggregator.await {
            Ok(aggregator) => aggregator,
            Err(err) => {
                error!(%err, "progress task failed");
                return None;
            }
        };

        let mut dbs: Vec<_> = aggregator.stats().iter().collect();
        dbs.sort_unstable();
        for (db, dumped) in dbs {
            info!(db, dumped, "dump progress");
        }

        Some(aggregator.into_inner())
    }
}
