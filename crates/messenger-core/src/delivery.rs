//! Delivery identifiers and states.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Opaque correlation handle for a single delivery attempt.
///
/// Issued by the engine; unique per outstanding delivery until settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackerId(u64);

impl TrackerId {
    /// Wrap a raw engine tracker value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw engine value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TrackerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Which side originated a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Sent by this session.
    Outgoing,
    /// Received by this session.
    Incoming,
}

/// Delivery status.
///
/// Statuses move forward only: `Pending`, then one outcome, then `Settled`.
/// `Unknown` is never stored; it answers queries for ids that are not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Not tracked (never seen, or settled and collected).
    Unknown,
    /// Awaiting an outcome.
    Pending,
    /// Peer (or this session) accepted the message.
    Accepted,
    /// Peer (or this session) rejected the message.
    Rejected,
    /// Released without being processed; may be redelivered.
    Released,
    /// Released with modified delivery annotations.
    Modified,
    /// Final disposition agreed by both sides.
    Settled,
}

impl DeliveryStatus {
    /// Position in the forward-only lattice, `None` for `Unknown`.
    #[must_use]
    pub const fn rank(self) -> Option<u8> {
        match self {
            Self::Unknown => None,
            Self::Pending => Some(0),
            Self::Accepted | Self::Rejected | Self::Released | Self::Modified => Some(1),
            Self::Settled => Some(2),
        }
    }

    /// Whether this is one of the four terminal outcomes.
    #[must_use]
    pub const fn is_outcome(self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::Rejected | Self::Released | Self::Modified
        )
    }

    /// Upper-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Released => "RELEASED",
            Self::Modified => "MODIFIED",
            Self::Settled => "SETTLED",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local disposition applied to a delivery when settling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Processed successfully.
    Accept,
    /// Processed and refused.
    Reject,
    /// Not processed; the peer may redeliver.
    Release,
    /// Not processed, with modified annotations.
    Modify,
}

impl Disposition {
    /// The outcome status this disposition produces.
    #[must_use]
    pub const fn status(self) -> DeliveryStatus {
        match self {
            Self::Accept => DeliveryStatus::Accepted,
            Self::Reject => DeliveryStatus::Rejected,
            Self::Release => DeliveryStatus::Released,
            Self::Modify => DeliveryStatus::Modified,
        }
    }
}
