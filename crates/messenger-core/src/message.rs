//! Application messages and their encoded form.

use std::{collections::BTreeMap, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Content type that marks a text body as JSON.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Message encoding error.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("text body declared application/json is not valid JSON: {0}")]
    MalformedJson(serde_json::Error),
    #[error("encoded message is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("encoding failed: {0}")]
    Encode(serde_json::Error),
    #[error("decoding failed: {0}")]
    Decode(String),
}

/// Message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// UTF-8 text.
    Text(String),
    /// Opaque bytes.
    Binary(Bytes),
    /// Structured JSON value.
    Json(Value),
}

/// An application message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Payload.
    pub body: Body,
    /// MIME content type.
    pub content_type: Option<String>,
    /// Time to live.
    pub ttl: Option<Duration>,
    /// Correlation identifier.
    pub correlation_id: Option<String>,
    /// Application properties.
    pub properties: BTreeMap<String, String>,
}

impl Message {
    /// Create a message with a text body.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self::with_body(Body::Text(body.into()))
    }

    /// Create a message with a binary body.
    #[must_use]
    pub fn binary(body: impl Into<Bytes>) -> Self {
        Self::with_body(Body::Binary(body.into()))
    }

    /// Create a message with a JSON body.
    #[must_use]
    pub fn json(body: Value) -> Self {
        Self {
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            ..Self::with_body(Body::Json(body))
        }
    }

    fn with_body(body: Body) -> Self {
        Self {
            body,
            content_type: None,
            ttl: None,
            correlation_id: None,
            properties: BTreeMap::new(),
        }
    }

    /// Set the content type.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the time to live.
    #[must_use]
    pub const fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the correlation id.
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Add an application property.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Encode for transfer, enforcing `limit` on the encoded size.
    ///
    /// # Errors
    /// Returns error if a JSON-typed text body does not parse, serialization
    /// fails, or the result exceeds `limit`.
    pub fn encode(&self, limit: usize) -> Result<Bytes, MessageError> {
        let content_type = self.content_type.as_deref();
        if let (Body::Text(text), Some(JSON_CONTENT_TYPE)) = (&self.body, content_type) {
            serde_json::from_str::<Value>(text).map_err(MessageError::MalformedJson)?;
        }

        let wire = WireMessage::from(self);
        let encoded = serde_json::to_vec(&wire).map_err(MessageError::Encode)?;
        if encoded.len() > limit {
            return Err(MessageError::TooLarge {
                size: encoded.len(),
                limit,
            });
        }
        Ok(Bytes::from(encoded))
    }

    /// Decode a transferred payload.
    ///
    /// # Errors
    /// Returns error if the payload is not a well-formed encoded message.
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let wire: WireMessage =
            serde_json::from_slice(payload).map_err(|e| MessageError::Decode(e.to_string()))?;
        wire.try_into()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
enum WireBody {
    Text(String),
    Binary(String),
    Json(Value),
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    body: WireBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        let body = match &msg.body {
            Body::Text(s) => WireBody::Text(s.clone()),
            Body::Binary(b) => WireBody::Binary(BASE64.encode(b)),
            Body::Json(v) => WireBody::Json(v.clone()),
        };
        Self {
            body,
            content_type: msg.content_type.clone(),
            ttl_ms: msg
                .ttl
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            correlation_id: msg.correlation_id.clone(),
            properties: msg.properties.clone(),
        }
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = MessageError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let body = match wire.body {
            WireBody::Text(s) => Body::Text(s),
            WireBody::Binary(b) => Body::Binary(Bytes::from(
                BASE64
                    .decode(b)
                    .map_err(|e| MessageError::Decode(e.to_string()))?,
            )),
            WireBody::Json(v) => Body::Json(v),
        };
        Ok(Self {
            body,
            content_type: wire.content_type,
            ttl: wire.ttl_ms.map(Duration::from_millis),
            correlation_id: wire.correlation_id,
            properties: wire.properties,
        })
    }
}
