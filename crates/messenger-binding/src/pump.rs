//! Async wrapper for tokio hosts.
//!
//! The session itself never spawns threads. Hosts running an async runtime
//! wrap it in an [`AsyncMessenger`], which moves blocking sends onto the
//! blocking pool and can run a background pump that drives `work`, drains
//! received messages through a [`DeliveryHandler`] and settles them.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use messenger_core::{Connector, Disposition, TrackerId};
use messenger_session::{Inbound, MessengerSession, Timeout};
use tokio::{sync::oneshot, task::JoinHandle};

use crate::error::BindingError;

/// Messages pulled per pump tick.
const PUMP_BATCH: usize = 64;

/// Decides the disposition of each received message.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Handle one message. The returned disposition is applied and the
    /// delivery settled.
    async fn on_message(&self, inbound: &Inbound) -> Disposition;
}

/// Handler that accepts every well-formed message and rejects malformed ones.
#[derive(Debug, Default, Clone)]
pub struct AcceptAll;

#[async_trait]
impl DeliveryHandler for AcceptAll {
    async fn on_message(&self, inbound: &Inbound) -> Disposition {
        if inbound.is_malformed() {
            Disposition::Reject
        } else {
            Disposition::Accept
        }
    }
}

/// Shared handle to a session for async hosts.
pub struct AsyncMessenger<C: Connector + 'static> {
    session: Arc<Mutex<MessengerSession<C>>>,
}

impl<C: Connector + 'static> Clone for AsyncMessenger<C> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<C: Connector + 'static> AsyncMessenger<C> {
    /// Wrap a session.
    #[must_use]
    pub fn new(session: MessengerSession<C>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Run `f` against the session. Must not be held across an await point.
    pub fn with<R>(&self, f: impl FnOnce(&mut MessengerSession<C>) -> R) -> R {
        f(&mut self.lock())
    }

    /// Flush buffered messages on the blocking pool.
    ///
    /// # Errors
    /// Returns the session's send error, or `Task` if the blocking task panicked.
    pub async fn send(&self, timeout: Timeout) -> Result<usize, BindingError> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .send(timeout)
        })
        .await
        .map_err(|e| BindingError::Task(e.to_string()))?
        .map_err(BindingError::from)
    }

    /// Trace history followed by live trace lines.
    #[must_use]
    pub fn trace_stream(&self) -> futures::stream::BoxStream<'static, String> {
        self.lock().trace_stream()
    }

    /// Start a background pump ticking every `interval`.
    ///
    /// The pump stops on shutdown or once the session is stopped.
    #[must_use]
    pub fn spawn_pump(&self, interval: Duration, handler: Arc<dyn DeliveryHandler>) -> PumpHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let messenger = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {}
                }

                let batch = match messenger.drain() {
                    Ok(Some(batch)) => batch,
                    Ok(None) => {
                        tracing::info!("session stopped, pump exiting");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "pump work failed");
                        continue;
                    }
                };

                let mut decided: Vec<(TrackerId, Disposition)> = Vec::with_capacity(batch.len());
                for inbound in &batch {
                    decided.push((inbound.tracker, handler.on_message(inbound).await));
                }
                messenger.settle_all(&decided);
            }
        });

        PumpHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// One non-blocking work pass followed by a receive; `None` once stopped.
    fn drain(&self) -> Result<Option<Vec<Inbound>>, BindingError> {
        let mut session = self.lock();
        if session.stopped() {
            return Ok(None);
        }
        session.work(Duration::ZERO)?;
        if session.stopped() {
            return Ok(None);
        }
        Ok(Some(session.receive(PUMP_BATCH)?.collect()))
    }

    fn settle_all(&self, decided: &[(TrackerId, Disposition)]) {
        let mut session = self.lock();
        for &(tracker, disposition) in decided {
            if let Err(e) = session.settle(tracker, Some(disposition)) {
                tracing::warn!(%tracker, error = %e, "settle failed");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, MessengerSession<C>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a running pump.
pub struct PumpHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl PumpHandle {
    /// Stop the pump and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "pump task failed");
        }
    }

    /// Whether the pump has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
