//! In-process engine.
//!
//! A [`MemoryBroker`] hosts named endpoints and address queues inside the
//! process. Connections obtained from a [`MemoryConnector`] behave like a
//! real AMQP connection as far as the session can tell: transfers are
//! buffered until worked, the peer decides their outcome, receiving links
//! honour credit, and the broker can refuse, drop or sever.
//!
//! Useful for tests, demos and single-process deployments.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use bytes::Bytes;
use messenger_core::{
    ConnectOptions, Connection, Connector, DeliveryStatus, Disposition, EngineError, EngineEvent,
    ServiceAddress, TrackerId, Tracer, address::Security,
};
use uuid::Uuid;

use super::pattern_matches;

/// Upper bound on a single idle sleep inside `work`.
const IDLE_SLICE: Duration = Duration::from_millis(5);

/// Behaviour of one listening endpoint.
#[derive(Debug, Clone, Default)]
pub struct EndpointConfig {
    credentials: Option<(String, String)>,
    idle_timeout: Option<Duration>,
    transfers_per_work: Option<usize>,
    max_queue_depth: Option<usize>,
    tls: bool,
}

impl EndpointConfig {
    /// Plain endpoint with no authentication and no limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require SASL PLAIN with these credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Idle timeout advertised to connecting peers.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Limit how many transfers one `work` call writes.
    #[must_use]
    pub const fn transfers_per_work(mut self, n: usize) -> Self {
        self.transfers_per_work = Some(n);
        self
    }

    /// Reject transfers to a queue already holding `depth` messages.
    #[must_use]
    pub const fn max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }

    /// Accept only `amqps` connections.
    #[must_use]
    pub const fn tls(mut self, enabled: bool) -> Self {
        self.tls = enabled;
        self
    }
}

#[derive(Debug)]
struct Endpoint {
    config: EndpointConfig,
    epoch: u64,
    closed_with: Option<String>,
}

#[derive(Debug, Default)]
struct BrokerState {
    endpoints: HashMap<String, Endpoint>,
    queues: HashMap<String, VecDeque<Bytes>>,
    next_tracker: u64,
    drop_transfers: usize,
}

impl BrokerState {
    fn next_tracker(&mut self) -> TrackerId {
        self.next_tracker += 1;
        TrackerId::new(self.next_tracker)
    }

    /// Pop the next message for `pattern`, scanning matching queues in name order.
    fn pop_matching(&mut self, pattern: &str) -> Option<(String, Bytes)> {
        let mut names: Vec<&String> = self
            .queues
            .iter()
            .filter(|(name, q)| !q.is_empty() && pattern_matches(pattern, name))
            .map(|(name, _)| name)
            .collect();
        names.sort();
        let name = names.first().map(|n| (*n).clone())?;
        let payload = self.queues.get_mut(&name)?.pop_front()?;
        Some((name, payload))
    }

    fn requeue(&mut self, address: String, payload: Bytes) {
        self.queues.entry(address).or_default().push_front(payload);
    }

    /// Put unsettled deliveries back at the head of their queues.
    fn return_unsettled(&mut self, unsettled: &mut HashMap<TrackerId, (String, Bytes)>) {
        let mut pending: Vec<_> = unsettled.drain().collect();
        // newest first so push_front restores the original order
        pending.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        for (_, (address, payload)) in pending {
            self.requeue(address, payload);
        }
    }
}

/// Shared in-process broker. Cloning yields another handle to the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Create an empty broker with no endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector that opens connections against this broker.
    #[must_use]
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector::new(self.clone())
    }

    /// Start listening on `endpoint` (`host:port`). Replaces any existing listener.
    ///
    /// # Errors
    /// Returns error if the broker state is poisoned.
    pub fn listen(&self, endpoint: &str, config: EndpointConfig) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        let epoch = state.endpoints.get(endpoint).map_or(0, |e| e.epoch + 1);
        state.endpoints.insert(
            endpoint.to_string(),
            Endpoint {
                config,
                epoch,
                closed_with: None,
            },
        );
        tracing::debug!(endpoint, "listening");
        Ok(())
    }

    /// Stop listening on `endpoint`. Open connections observe a fatal close.
    ///
    /// # Errors
    /// Returns error if the broker state is poisoned.
    pub fn shutdown(&self, endpoint: &str) -> Result<bool, EngineError> {
        Ok(self.lock()?.endpoints.remove(endpoint).is_some())
    }

    /// Force-close every connection on `endpoint` with `condition`. The
    /// endpoint keeps listening for new connections.
    ///
    /// # Errors
    /// Returns error if the broker state is poisoned.
    pub fn sever(&self, endpoint: &str, condition: &str) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        if let Some(ep) = state.endpoints.get_mut(endpoint) {
            ep.epoch += 1;
            ep.closed_with = Some(condition.to_string());
            tracing::debug!(endpoint, condition, "severed");
        }
        Ok(())
    }

    /// Lose the next `n` transfers written by any connection.
    ///
    /// # Errors
    /// Returns error if the broker state is poisoned.
    pub fn drop_transfers(&self, n: usize) -> Result<(), EngineError> {
        self.lock()?.drop_transfers += n;
        Ok(())
    }

    /// Place a message directly on the queue for `address`.
    ///
    /// # Errors
    /// Returns error if the broker state is poisoned.
    pub fn enqueue(&self, address: &str, payload: impl Into<Bytes>) -> Result<(), EngineError> {
        self.lock()?
            .queues
            .entry(address.to_string())
            .or_default()
            .push_back(payload.into());
        Ok(())
    }

    /// Messages waiting on the queue for `address`.
    ///
    /// # Errors
    /// Returns error if the broker state is poisoned.
    pub fn queue_depth(&self, address: &str) -> Result<usize, EngineError> {
        Ok(self.lock()?.queues.get(address).map_or(0, VecDeque::len))
    }

    /// Drain the queue for `address`.
    ///
    /// # Errors
    /// Returns error if the broker state is poisoned.
    pub fn drain(&self, address: &str) -> Result<Vec<Bytes>, EngineError> {
        Ok(self
            .lock()?
            .queues
            .get_mut(address)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>, EngineError> {
        self.state
            .lock()
            .map_err(|e| EngineError::Internal(e.to_string()))
    }
}

/// Opens [`MemoryConnection`]s against a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

impl MemoryConnector {
    /// Connector for `broker`.
    #[must_use]
    pub const fn new(broker: MemoryBroker) -> Self {
        Self { broker }
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    fn connect(
        &self,
        address: &ServiceAddress,
        options: &ConnectOptions,
        tracer: Arc<dyn Tracer>,
    ) -> Result<MemoryConnection, EngineError> {
        let endpoint = address.endpoint();
        let state = self.broker.lock()?;
        let ep = state.endpoints.get(&endpoint).ok_or_else(|| {
            EngineError::Refused(format!(
                "amqp:connection:refused: nothing listening on {endpoint}"
            ))
        })?;

        let wants_tls = address.security() == Security::Tls;
        if ep.config.tls != wants_tls {
            return Err(EngineError::Refused(format!(
                "amqp:connection:framing-error: {endpoint} expects {}",
                if ep.config.tls { "amqps" } else { "amqp" }
            )));
        }

        let user = options.username.as_deref().unwrap_or("");
        match &ep.config.credentials {
            Some((expected_user, expected_pass)) => {
                let authenticated = user == expected_user
                    && options.password.as_deref() == Some(expected_pass.as_str());
                if !authenticated {
                    return Err(EngineError::Authentication(format!(
                        "amqp:unauthorized-access: SASL PLAIN failed for user {user:?}"
                    )));
                }
            }
            None if options.require_auth => {
                return Err(EngineError::Authentication(format!(
                    "amqp:unauthorized-access: {endpoint} offers no SASL mechanism for user {user:?}"
                )));
            }
            None => {}
        }

        let name = if options.name.trim().is_empty() {
            let suffix: String = Uuid::new_v4().simple().to_string().chars().take(7).collect();
            format!("messenger_{suffix}")
        } else {
            options.name.trim().to_string()
        };

        let epoch = ep.epoch;
        drop(state);

        if options.trace {
            let idle = options
                .idle_timeout
                .map_or_else(|| "none".to_string(), |d| d.as_millis().to_string());
            tracer.trace(&format!(
                "[{name}] -> AMQP open container-id={name} hostname={endpoint} idle-time-out={idle}"
            ));
        }
        tracing::debug!(%name, endpoint, "memory connection opened");

        Ok(MemoryConnection {
            broker: self.broker.clone(),
            tracer,
            name,
            endpoint,
            epoch,
            trace: options.trace,
            outbound: VecDeque::new(),
            links: HashMap::new(),
            unsettled: HashMap::new(),
            closed: None,
        })
    }
}

/// One connection to a [`MemoryBroker`] endpoint.
pub struct MemoryConnection {
    broker: MemoryBroker,
    tracer: Arc<dyn Tracer>,
    name: String,
    endpoint: String,
    epoch: u64,
    trace: bool,
    outbound: VecDeque<(TrackerId, String, Bytes)>,
    links: HashMap<String, u32>,
    /// Incoming deliveries not yet settled: tracker -> (queue, payload).
    unsettled: HashMap<TrackerId, (String, Bytes)>,
    closed: Option<String>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("outbound", &self.outbound.len())
            .field("links", &self.links)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl MemoryConnection {
    fn trace(&self, line: impl FnOnce() -> String) {
        if self.trace {
            self.tracer.trace(&format!("[{}] {}", self.name, line()));
        }
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        match &self.closed {
            Some(condition) => Err(EngineError::Closed(condition.clone())),
            None => Ok(()),
        }
    }

    /// Condition that closed this connection at the broker, if any.
    fn lost(&self, state: &BrokerState) -> Option<String> {
        match state.endpoints.get(&self.endpoint) {
            None => Some(format!(
                "amqp:connection:forced: listener on {} shut down",
                self.endpoint
            )),
            Some(ep) if ep.epoch != self.epoch => Some(
                ep.closed_with
                    .clone()
                    .unwrap_or_else(|| "amqp:connection:forced".to_string()),
            ),
            Some(_) => None,
        }
    }
}

impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&mut self, address: &str, payload: Bytes) -> Result<TrackerId, EngineError> {
        self.ensure_open()?;
        let tracker = self.broker.lock()?.next_tracker();
        self.outbound.push_back((tracker, address.to_string(), payload));
        Ok(tracker)
    }

    fn outgoing(&self) -> usize {
        self.outbound.len()
    }

    fn work(&mut self, timeout: Duration) -> Result<Vec<EngineEvent>, EngineError> {
        self.ensure_open()?;
        let mut events = Vec::new();
        let mut state = self.broker.lock()?;

        if let Some(condition) = self.lost(&state) {
            state.return_unsettled(&mut self.unsettled);
            drop(state);
            self.trace(|| format!("<- AMQP close error={condition}"));
            self.closed = Some(condition.clone());
            events.push(EngineEvent::Closed {
                condition,
                fatal: true,
            });
            return Ok(events);
        }

        let config = state
            .endpoints
            .get(&self.endpoint)
            .map(|ep| ep.config.clone())
            .unwrap_or_default();
        let mut conditions = Vec::new();
        let mut lines = Vec::new();

        let budget = config.transfers_per_work.unwrap_or(usize::MAX);
        for _ in 0..budget {
            let Some((tracker, address, payload)) = self.outbound.pop_front() else {
                break;
            };
            lines.push(format!("-> transfer delivery-id={tracker} address={address}"));

            let status = if state.drop_transfers > 0 {
                state.drop_transfers -= 1;
                conditions.push(format!(
                    "amqp:link:transfer-lost: delivery {tracker} to {address} was not received"
                ));
                DeliveryStatus::Released
            } else if config
                .max_queue_depth
                .is_some_and(|max| state.queues.get(&address).map_or(0, VecDeque::len) >= max)
            {
                conditions.push(format!(
                    "amqp:resource-limit-exceeded: queue {address} is full"
                ));
                DeliveryStatus::Rejected
            } else {
                state.queues.entry(address).or_default().push_back(payload);
                DeliveryStatus::Accepted
            };
            lines.push(format!("<- disposition delivery-id={tracker} state={status}"));
            events.push(EngineEvent::Outcome { tracker, status });
        }

        let mut sources: Vec<String> = self.links.keys().cloned().collect();
        sources.sort();
        for source in sources {
            let mut credit = self.links.get(&source).copied().unwrap_or(0);
            while credit > 0 {
                let Some((queue, payload)) = state.pop_matching(&source) else {
                    break;
                };
                credit -= 1;
                let tracker = state.next_tracker();
                lines.push(format!("<- transfer delivery-id={tracker} source={source}"));
                self.unsettled.insert(tracker, (queue, payload.clone()));
                events.push(EngineEvent::Delivery {
                    tracker,
                    source: source.clone(),
                    payload,
                });
            }
            self.links.insert(source, credit);
        }
        drop(state);

        for line in lines {
            self.trace(|| line);
        }
        for condition in conditions {
            self.tracer.condition(&condition);
        }

        if events.is_empty() && !timeout.is_zero() {
            std::thread::sleep(timeout.min(IDLE_SLICE));
        }
        Ok(events)
    }

    fn subscribe(&mut self, source: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.links.entry(source.to_string()).or_insert(0);
        self.trace(|| format!("-> attach role=receiver source={source}"));
        Ok(())
    }

    fn unsubscribe(&mut self, source: &str) {
        if self.links.remove(source).is_some() {
            self.trace(|| format!("-> detach source={source}"));
        }
    }

    fn flow(&mut self, source: &str, credit: u32) -> Result<(), EngineError> {
        self.ensure_open()?;
        let link = self
            .links
            .get_mut(source)
            .ok_or_else(|| EngineError::Rejected(format!("amqp:not-found: no link for {source}")))?;
        *link = link.saturating_add(credit);
        self.trace(|| format!("-> flow source={source} link-credit={credit}"));
        Ok(())
    }

    fn disposition(
        &mut self,
        tracker: TrackerId,
        disposition: Disposition,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let status = disposition.status();
        self.trace(|| format!("-> disposition delivery-id={tracker} state={status}"));
        match disposition {
            Disposition::Accept | Disposition::Reject => {
                self.unsettled.remove(&tracker);
            }
            Disposition::Release | Disposition::Modify => {
                if let Some((address, payload)) = self.unsettled.remove(&tracker) {
                    self.broker.lock()?.requeue(address, payload);
                }
            }
        }
        Ok(())
    }

    fn settle(&mut self, tracker: TrackerId) {
        self.unsettled.remove(&tracker);
    }

    fn remote_idle_timeout(&self, endpoint: &str) -> Option<Duration> {
        let state = self.broker.lock().ok()?;
        state.endpoints.get(endpoint)?.config.idle_timeout
    }

    fn condition(&self) -> Option<String> {
        self.closed.clone()
    }

    fn close(self) {
        self.trace(|| "-> AMQP close".to_string());
        tracing::debug!(name = %self.name, "memory connection closed");
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if self.unsettled.is_empty() {
            return;
        }
        if let Ok(mut state) = self.broker.lock() {
            state.return_unsettled(&mut self.unsettled);
        }
    }
}
