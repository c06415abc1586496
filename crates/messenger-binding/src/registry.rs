//! Session registry driven by host calls.
//!
//! Host runtimes hold opaque session handles; the registry owns the sessions
//! and translates each [`HostCall`] into the matching session operation. It
//! carries no messaging logic of its own.

use std::{collections::HashMap, time::Duration};

use messenger_core::{Connector, Message, MessengerConfig};
use messenger_session::{MessengerSession, Timeout};
use uuid::Uuid;

use crate::{
    error::BindingError,
    protocol::{HostCall, HostInbound, HostReply, UNKNOWN_IDLE_TIMEOUT},
};

/// Registry of sessions created by a host runtime.
///
/// Construct one per process and share it with the host; this is the single
/// registration point for the messenger type.
pub struct Binding<C: Connector + Clone> {
    connector: C,
    defaults: MessengerConfig,
    sessions: HashMap<Uuid, MessengerSession<C>>,
}

impl<C: Connector + Clone> Binding<C> {
    /// Create a registry whose sessions connect through `connector`.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self::with_defaults(connector, MessengerConfig::default())
    }

    /// Create a registry applying `defaults` to every created session.
    #[must_use]
    pub fn with_defaults(connector: C, defaults: MessengerConfig) -> Self {
        Self {
            connector,
            defaults,
            sessions: HashMap::new(),
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove a session from the registry without stopping it.
    pub fn take(&mut self, id: Uuid) -> Option<MessengerSession<C>> {
        self.sessions.remove(&id)
    }

    /// Handle one JSON-encoded call and return the JSON-encoded reply.
    pub fn handle_json(&mut self, line: &str) -> String {
        let reply = match serde_json::from_str::<HostCall>(line) {
            Ok(call) => self.dispatch(call),
            Err(e) => BindingError::from(e).into(),
        };
        serde_json::to_string(&reply).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","kind":"PROTOCOL_ERROR","message":"{e}"}}"#)
        })
    }

    /// Handle one call. Failures become [`HostReply::Error`].
    pub fn dispatch(&mut self, call: HostCall) -> HostReply {
        self.try_dispatch(call).unwrap_or_else(|e| {
            tracing::debug!(kind = e.kind(), error = %e, "host call failed");
            e.into()
        })
    }

    fn try_dispatch(&mut self, call: HostCall) -> Result<HostReply, BindingError> {
        let reply = match call {
            HostCall::Create {
                name,
                username,
                password,
                idle_timeout_ms,
                trace,
            } => {
                let base = MessengerConfig::new(name, &username, &password);
                let config = MessengerConfig {
                    name: base.name,
                    username: base.username,
                    password: base.password,
                    idle_timeout: idle_timeout_ms
                        .map(Duration::from_millis)
                        .or(self.defaults.idle_timeout),
                    trace_enabled: trace || self.defaults.trace_enabled,
                    ..self.defaults.clone()
                };
                let session = MessengerSession::with_config(self.connector.clone(), config);
                let id = Uuid::new_v4();
                let name = session.name().to_string();
                self.sessions.insert(id, session);
                tracing::debug!(%id, %name, "session created");
                HostReply::Created { session: id, name }
            }
            HostCall::Connect { session, address } => {
                let session = self.session(session)?;
                session.connect(&address)?;
                HostReply::Text {
                    value: session.name().to_string(),
                }
            }
            HostCall::Put {
                session,
                address,
                message,
            } => {
                let message = Message::try_from(message)?;
                let tracker = self.session(session)?.put(&message, &address)?;
                HostReply::Tracker { tracker }
            }
            HostCall::Send {
                session,
                timeout_ms,
            } => HostReply::Flushed {
                count: self.session(session)?.send(Timeout::from(timeout_ms))?,
            },
            HostCall::Subscribe {
                session,
                source,
                credit,
            } => {
                let session = self.session(session)?;
                match credit {
                    Some(credit) => session.subscribe_with_credit(&source, credit)?,
                    None => session.subscribe(&source)?,
                }
                HostReply::Done
            }
            HostCall::Unsubscribe { session, source } => {
                self.session(session)?.unsubscribe(&source)?;
                HostReply::Done
            }
            HostCall::Receive { session, limit } => HostReply::Messages {
                messages: self
                    .session(session)?
                    .receive(limit)?
                    .map(|inbound| HostInbound::from(&inbound))
                    .collect(),
            },
            HostCall::Accept { session, tracker } => {
                self.session(session)?.accept(tracker)?;
                HostReply::Done
            }
            HostCall::Settle {
                session,
                tracker,
                disposition,
            } => {
                self.session(session)?.settle(tracker, disposition)?;
                HostReply::Done
            }
            HostCall::Status { session, tracker } => HostReply::Status {
                status: self.session(session)?.status(tracker),
            },
            HostCall::Flow {
                session,
                source,
                credit,
            } => {
                self.session(session)?.flow(&source, credit)?;
                HostReply::Done
            }
            HostCall::Work {
                session,
                timeout_ms,
            } => HostReply::Flag {
                value: work(self.session(session)?, Timeout::from(timeout_ms))?,
            },
            HostCall::Stop { session } => {
                self.session(session)?.stop();
                HostReply::Done
            }
            HostCall::Stopped { session } => HostReply::Flag {
                value: self.session(session)?.stopped(),
            },
            HostCall::HasOutgoing { session } => HostReply::Flag {
                value: self.session(session)?.has_outgoing(),
            },
            HostCall::LastErrorText { session } => HostReply::Text {
                value: self.session(session)?.last_error_text(),
            },
            HostCall::RemoteIdleTimeout { session, address } => HostReply::IdleTimeout {
                millis: self
                    .session(session)?
                    .remote_idle_timeout(&address)
                    .map_or(UNKNOWN_IDLE_TIMEOUT, |d| {
                        i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
                    }),
            },
            HostCall::Destroy { session } => {
                // dropping the session stops it
                self.sessions
                    .remove(&session)
                    .ok_or(BindingError::UnknownSession(session))?;
                tracing::debug!(%session, "session destroyed");
                HostReply::Done
            }
        };
        Ok(reply)
    }

    fn session(&mut self, id: Uuid) -> Result<&mut MessengerSession<C>, BindingError> {
        self.sessions
            .get_mut(&id)
            .ok_or(BindingError::UnknownSession(id))
    }
}

/// Drive `work`, looping in poll-sized slices when asked to block indefinitely.
fn work<C: Connector>(
    session: &mut MessengerSession<C>,
    timeout: Timeout,
) -> Result<bool, BindingError> {
    match timeout {
        Timeout::Immediate => Ok(session.work(Duration::ZERO)?),
        Timeout::After(d) => Ok(session.work(d)?),
        Timeout::Never => {
            let slice = session.config().send_poll_interval;
            loop {
                if session.work(slice)? || session.stopped() {
                    return Ok(true);
                }
            }
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use messenger_core::{DeliveryStatus, Disposition, TrackerId};
    use messenger_session::{EndpointConfig, MemoryBroker, MemoryConnector};
    use serde_json::json;

    use super::*;
    use crate::protocol::HostMessage;

    fn binding() -> (MemoryBroker, Binding<MemoryConnector>) {
        let broker = MemoryBroker::new();
        broker
            .listen(
                "localhost:5672",
                EndpointConfig::new().idle_timeout(Duration::from_secs(15)),
            )
            .unwrap();
        let binding = Binding::new(broker.connector());
        (broker, binding)
    }

    fn create(binding: &mut Binding<MemoryConnector>, name: &str) -> Uuid {
        match binding.dispatch(HostCall::Create {
            name: name.into(),
            username: String::new(),
            password: String::new(),
            idle_timeout_ms: None,
            trace: false,
        }) {
            HostReply::Created { session, .. } => session,
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_unknown_session() {
        let (_broker, mut binding) = binding();
        let reply = binding.dispatch(HostCall::Stop {
            session: Uuid::new_v4(),
        });
        assert!(matches!(reply, HostReply::Error { ref kind, .. } if kind == "UNKNOWN_SESSION"));
    }

    #[test]
    fn test_send_and_receive_through_calls() {
        let (_broker, mut binding) = binding();
        let tx = create(&mut binding, "tx");
        let rx = create(&mut binding, "rx");
        for id in [tx, rx] {
            assert!(matches!(
                binding.dispatch(HostCall::Connect {
                    session: id,
                    address: "amqp://localhost".into()
                }),
                HostReply::Text { .. }
            ));
        }
        binding.dispatch(HostCall::Subscribe {
            session: rx,
            source: "queue://a".into(),
            credit: Some(5),
        });

        let reply = binding.dispatch(HostCall::Put {
            session: tx,
            address: "queue://a".into(),
            message: HostMessage::text("hello"),
        });
        assert!(matches!(reply, HostReply::Tracker { .. }));
        assert_eq!(
            binding.dispatch(HostCall::Send {
                session: tx,
                timeout_ms: -1
            }),
            HostReply::Flushed { count: 1 }
        );

        binding.dispatch(HostCall::Work {
            session: rx,
            timeout_ms: 0,
        });
        let HostReply::Messages { messages } = binding.dispatch(HostCall::Receive {
            session: rx,
            limit: 10,
        }) else {
            panic!("expected messages");
        };
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, Some(HostMessage::text("hello")));

        let tracker = messages[0].tracker;
        binding.dispatch(HostCall::Settle {
            session: rx,
            tracker,
            disposition: Some(Disposition::Accept),
        });
        assert_eq!(
            binding.dispatch(HostCall::Status {
                session: rx,
                tracker
            }),
            HostReply::Status {
                status: DeliveryStatus::Settled
            }
        );
    }

    #[test]
    fn test_json_round_trip() {
        let (_broker, mut binding) = binding();
        let reply: serde_json::Value =
            serde_json::from_str(&binding.handle_json(r#"{"op":"create","name":"s1"}"#)).unwrap();
        assert_eq!(reply["type"], "created");
        let session = reply["session"].as_str().unwrap().to_string();

        let call = json!({
            "op": "remote_idle_timeout",
            "session": session,
            "address": "amqp://localhost"
        });
        let reply: serde_json::Value =
            serde_json::from_str(&binding.handle_json(&call.to_string())).unwrap();
        assert_eq!(reply["millis"], UNKNOWN_IDLE_TIMEOUT);

        let call = json!({"op": "connect", "session": session, "address": "amqp://localhost"});
        binding.handle_json(&call.to_string());
        let call = json!({
            "op": "remote_idle_timeout",
            "session": session,
            "address": "amqp://localhost"
        });
        let reply: serde_json::Value =
            serde_json::from_str(&binding.handle_json(&call.to_string())).unwrap();
        assert_eq!(reply["millis"], 15_000);

        let reply: serde_json::Value =
            serde_json::from_str(&binding.handle_json("{not json")).unwrap();
        assert_eq!(reply["kind"], "PROTOCOL_ERROR");
    }

    #[test]
    fn test_errors_carry_kind() {
        let (_broker, mut binding) = binding();
        let id = create(&mut binding, "s1");
        let reply = binding.dispatch(HostCall::Connect {
            session: id,
            address: "amqp://nowhere:5672".into(),
        });
        assert!(matches!(reply, HostReply::Error { ref kind, .. } if kind == "CONNECT_FAILED"));

        let reply = binding.dispatch(HostCall::LastErrorText { session: id });
        assert!(matches!(reply, HostReply::Text { ref value } if value.contains("nowhere")));

        let reply = binding.dispatch(HostCall::Accept {
            session: id,
            tracker: TrackerId::new(1),
        });
        assert!(matches!(reply, HostReply::Error { ref kind, .. } if kind == "UNKNOWN_TRACKER"));
    }

    #[test]
    fn test_destroy() {
        let (_broker, mut binding) = binding();
        let id = create(&mut binding, "s1");
        assert_eq!(binding.len(), 1);
        assert_eq!(binding.dispatch(HostCall::Destroy { session: id }), HostReply::Done);
        assert!(binding.is_empty());
    }
}
