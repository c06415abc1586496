//! Transport trace capture and connection condition text.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::traits::Tracer;

/// Default number of trace lines retained.
pub const DEFAULT_TRACE_CAPACITY: usize = 256;

struct Inner {
    history: VecDeque<String>,
    capacity: usize,
    dropped: u64,
    condition: Option<String>,
}

/// Bounded ring of transport trace lines plus the latest condition text.
///
/// Engines push into it through [`Tracer`]; it has no behaviour of its own
/// beyond recording. Live listeners get new trace lines over a broadcast
/// channel, so a late subscriber can read the history and then follow.
pub struct TransportDiagnostics {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<String>,
}

impl Default for TransportDiagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

impl TransportDiagnostics {
    /// Create a recorder retaining at most `capacity` trace lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(capacity.min(32)),
                capacity,
                dropped: 0,
                condition: None,
            }),
            sender,
        }
    }

    /// Append a trace line, dropping the oldest when full.
    pub fn record_trace(&self, line: impl Into<String>) {
        let line = line.into();
        let _ = self.sender.send(line.clone()); // live listeners

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.capacity == 0 {
            inner.dropped += 1;
            return;
        }
        while inner.history.len() >= inner.capacity {
            inner.history.pop_front();
            inner.dropped += 1;
        }
        inner.history.push_back(line);
    }

    /// Store the most recent condition text, replacing the previous one.
    pub fn record_condition(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::warn!(condition = %text, "transport condition");
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .condition = Some(text);
    }

    /// The stored condition text, or empty.
    #[must_use]
    pub fn last_condition(&self) -> String {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .condition
            .clone()
            .unwrap_or_default()
    }

    /// Forget the live condition (a new connection starts clean).
    pub fn clear_condition(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .condition = None;
    }

    /// Snapshot of retained trace lines, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .cloned()
            .collect()
    }

    /// Number of trace lines evicted from the ring so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).dropped
    }

    /// Emit a summary of the retained trace to the log and clear it.
    pub fn flush(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.history.is_empty() {
            return;
        }
        tracing::debug!(
            retained = inner.history.len(),
            dropped = inner.dropped,
            "flushing transport trace"
        );
        for line in inner.history.drain(..) {
            tracing::trace!(target: "messenger::transport", "{line}");
        }
    }

    /// Receiver for live trace lines.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Stream that yields retained history first, then live trace lines.
    #[must_use]
    pub fn trace_stream(&self) -> futures::stream::BoxStream<'static, String> {
        let (history, rx) = (self.history(), self.subscribe());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}

impl Tracer for TransportDiagnostics {
    fn trace(&self, line: &str) {
        self.record_trace(line);
    }

    fn condition(&self, text: &str) {
        self.record_condition(text);
    }
}
