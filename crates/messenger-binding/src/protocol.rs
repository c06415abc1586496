//! Call protocol between a host runtime and the binding.
//!
//! Every call names the session it targets by the handle returned from
//! `create`. Timeouts are signed milliseconds: `0` is non-blocking and any
//! negative value blocks indefinitely.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use messenger_core::{Body, DeliveryStatus, Disposition, Message, TrackerId};
use messenger_session::Inbound;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::BindingError;

/// Idle timeout reported when the peer's is unknown or the session is stopped.
pub const UNKNOWN_IDLE_TIMEOUT: i64 = -1;

/// Call from the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostCall {
    /// Construct a session. No I/O.
    Create {
        name: String,
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        idle_timeout_ms: Option<u64>,
        #[serde(default)]
        trace: bool,
    },
    Connect { session: Uuid, address: String },
    Put {
        session: Uuid,
        address: String,
        message: HostMessage,
    },
    Send { session: Uuid, timeout_ms: i64 },
    Subscribe {
        session: Uuid,
        source: String,
        #[serde(default)]
        credit: Option<u32>,
    },
    Unsubscribe { session: Uuid, source: String },
    Receive { session: Uuid, limit: usize },
    Accept { session: Uuid, tracker: TrackerId },
    Settle {
        session: Uuid,
        tracker: TrackerId,
        #[serde(default)]
        disposition: Option<Disposition>,
    },
    Status { session: Uuid, tracker: TrackerId },
    Flow {
        session: Uuid,
        source: String,
        credit: u32,
    },
    Work { session: Uuid, timeout_ms: i64 },
    Stop { session: Uuid },
    Stopped { session: Uuid },
    HasOutgoing { session: Uuid },
    LastErrorText { session: Uuid },
    RemoteIdleTimeout { session: Uuid, address: String },
    /// Stop and forget a session.
    Destroy { session: Uuid },
}

/// Reply to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostReply {
    Created { session: Uuid, name: String },
    Done,
    Tracker { tracker: TrackerId },
    Flushed { count: usize },
    Messages { messages: Vec<HostInbound> },
    Status { status: DeliveryStatus },
    Flag { value: bool },
    Text { value: String },
    /// Milliseconds, or [`UNKNOWN_IDLE_TIMEOUT`].
    IdleTimeout { millis: i64 },
    Error { kind: String, message: String },
}

impl From<BindingError> for HostReply {
    fn from(err: BindingError) -> Self {
        Self::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Message body as the host sees it. Binary bodies travel base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HostBody {
    Text(String),
    Binary(String),
    Json(Value),
}

/// Message as the host sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMessage {
    pub body: HostBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl HostMessage {
    /// Text message.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self::with_body(HostBody::Text(body.into()))
    }

    /// Binary message from raw bytes.
    #[must_use]
    pub fn binary(data: &[u8]) -> Self {
        Self::with_body(HostBody::Binary(BASE64.encode(data)))
    }

    const fn with_body(body: HostBody) -> Self {
        Self {
            body,
            content_type: None,
            correlation_id: None,
            properties: BTreeMap::new(),
        }
    }
}

impl TryFrom<HostMessage> for Message {
    type Error = BindingError;

    fn try_from(host: HostMessage) -> Result<Self, Self::Error> {
        let mut msg = match host.body {
            HostBody::Text(text) => Self::text(text),
            HostBody::Binary(data) => Self::binary(
                BASE64
                    .decode(data)
                    .map_err(|e| BindingError::InvalidBody(e.to_string()))?,
            ),
            HostBody::Json(value) => Self::json(value),
        };
        if let Some(content_type) = host.content_type {
            msg = msg.content_type(content_type);
        }
        if let Some(id) = host.correlation_id {
            msg = msg.correlation_id(id);
        }
        for (key, value) in host.properties {
            msg = msg.property(key, value);
        }
        Ok(msg)
    }
}

impl From<&Message> for HostMessage {
    fn from(msg: &Message) -> Self {
        let body = match &msg.body {
            Body::Text(text) => HostBody::Text(text.clone()),
            Body::Binary(data) => HostBody::Binary(BASE64.encode(data)),
            Body::Json(value) => HostBody::Json(value.clone()),
        };
        Self {
            body,
            content_type: msg.content_type.clone(),
            correlation_id: msg.correlation_id.clone(),
            properties: msg.properties.clone(),
        }
    }
}

/// Received message as the host sees it. Exactly one of `message`/`error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInbound {
    pub tracker: TrackerId,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<HostMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Inbound> for HostInbound {
    fn from(inbound: &Inbound) -> Self {
        let (message, error) = match &inbound.message {
            Ok(msg) => (Some(HostMessage::from(msg)), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            tracker: inbound.tracker,
            source: inbound.source.clone(),
            message,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_shape() {
        let call: HostCall = serde_json::from_str(
            r#"{"op":"send","session":"67e55044-10b1-426f-9247-bb680e5fe0c8","timeout_ms":-1}"#,
        )
        .unwrap();
        assert!(matches!(call, HostCall::Send { timeout_ms: -1, .. }));

        let call: HostCall = serde_json::from_str(r#"{"op":"create","name":"s1"}"#).unwrap();
        if let HostCall::Create { name, username, trace, .. } = call {
            assert_eq!(name, "s1");
            assert_eq!(username, "");
            assert!(!trace);
        } else {
            panic!("Wrong call type");
        }
    }

    #[test]
    fn test_settle_disposition_optional() {
        let call: HostCall = serde_json::from_str(
            r#"{"op":"settle","session":"67e55044-10b1-426f-9247-bb680e5fe0c8","tracker":4,"disposition":"release"}"#,
        )
        .unwrap();
        assert!(matches!(
            call,
            HostCall::Settle {
                disposition: Some(Disposition::Release),
                ..
            }
        ));
    }

    #[test]
    fn test_binary_body_is_base64() {
        let host = HostMessage::binary(&[0, 159, 146, 150]);
        let json = serde_json::to_string(&host).unwrap();
        assert!(json.contains(r#""kind":"binary""#));

        let msg = Message::try_from(host).unwrap();
        assert_eq!(msg.body, Body::Binary(vec![0u8, 159, 146, 150].into()));
    }

    #[test]
    fn test_bad_base64_is_invalid_message() {
        let host = HostMessage::with_body(HostBody::Binary("***".into()));
        let err = Message::try_from(host).unwrap_err();
        assert_eq!(err.kind(), "INVALID_MESSAGE");
    }

    #[test]
    fn test_error_reply() {
        let reply = HostReply::from(BindingError::UnknownSession(Uuid::nil()));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "UNKNOWN_SESSION");
    }
}
