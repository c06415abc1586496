//! Messenger configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{diagnostics::DEFAULT_TRACE_CAPACITY, tracker::DEFAULT_SETTLED_GRACE};

/// Default credit granted when subscribing.
pub const DEFAULT_CREDIT: u32 = 1024;
/// Default limit on an encoded message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;
/// Default slice `send` hands to the engine per poll.
pub const DEFAULT_SEND_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration recognized at construction and connect time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// Session identity. The engine may canonicalize it at connect.
    pub name: String,
    /// SASL user; non-blank means the connection must authenticate.
    pub username: Option<String>,
    /// Password for `username`.
    pub password: Option<String>,
    /// Keep-alive interval advertised to the peer.
    #[serde(with = "millis_opt")]
    pub idle_timeout: Option<Duration>,
    /// Capture transport trace lines.
    pub trace_enabled: bool,
    /// Trace lines retained in the diagnostics ring.
    pub trace_capacity: usize,
    /// Credit granted by `subscribe`.
    pub default_credit: u32,
    /// How long settled ids keep answering `Settled`.
    #[serde(with = "millis")]
    pub settled_grace: Duration,
    /// Upper bound on an encoded message.
    pub max_message_size: usize,
    /// Engine work slice used while `send` blocks.
    #[serde(with = "millis")]
    pub send_poll_interval: Duration,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            username: None,
            password: None,
            idle_timeout: None,
            trace_enabled: false,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
            default_credit: DEFAULT_CREDIT,
            settled_grace: DEFAULT_SETTLED_GRACE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            send_poll_interval: DEFAULT_SEND_POLL_INTERVAL,
        }
    }
}

impl MessengerConfig {
    /// Create a config with identity and credentials.
    ///
    /// Blank credentials are treated as absent.
    #[must_use]
    pub fn new(name: impl Into<String>, username: &str, password: &str) -> Self {
        Self {
            name: name.into(),
            username: non_blank(username),
            password: non_blank(password),
            ..Self::default()
        }
    }

    /// Read overrides from `MESSENGER_*` environment variables on top of defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(name) = env("MESSENGER_NAME") {
            config.name = name;
        }
        config.username = env("MESSENGER_USERNAME").and_then(|v| non_blank(&v));
        config.password = env("MESSENGER_PASSWORD").and_then(|v| non_blank(&v));
        config.idle_timeout = env("MESSENGER_IDLE_TIMEOUT_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis);
        config.trace_enabled = env("MESSENGER_TRACE")
            .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"));
        if let Some(credit) = env("MESSENGER_CREDIT").and_then(|v| v.parse().ok()) {
            config.default_credit = credit;
        }
        config
    }

    /// Set the idle timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Enable or disable trace capture.
    #[must_use]
    pub const fn with_trace(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }

    /// Set the default subscribe credit.
    #[must_use]
    pub const fn with_default_credit(mut self, credit: u32) -> Self {
        self.default_credit = credit;
        self
    }

    /// Set the settled grace window.
    #[must_use]
    pub const fn with_settled_grace(mut self, grace: Duration) -> Self {
        self.settled_grace = grace;
        self
    }

    /// Set the encoded message size limit.
    #[must_use]
    pub const fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Whether connecting requires authentication.
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

fn non_blank(value: &str) -> Option<String> {
    Some(value.to_string()).filter(|v| !v.trim().is_empty())
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_millis))
    }
}
