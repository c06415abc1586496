//! Delivery tracking.
//!
//! Correlates tracker ids with their delivery status and enforces the
//! forward-only lattice `Pending -> outcome -> Settled`. Settled ids linger
//! for a grace window so late status polls still read `Settled`, then they
//! are collected and read `Unknown`.
//!
//! Time is passed in rather than read, so the grace window is testable
//! without sleeping.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use crate::{
    delivery::{DeliveryStatus, Direction, TrackerId},
    error::{MessengerError, Result},
};

/// Default time settled ids stay queryable.
pub const DEFAULT_SETTLED_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct Entry {
    direction: Direction,
    status: DeliveryStatus,
    outcome: Option<DeliveryStatus>,
    settled_at: Option<Instant>,
}

/// Tracks the status of every outstanding delivery of one session.
#[derive(Debug)]
pub struct DeliveryTracker {
    entries: HashMap<TrackerId, Entry>,
    settled: VecDeque<(TrackerId, Instant)>,
    grace: Duration,
}

impl Default for DeliveryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLED_GRACE)
    }
}

impl DeliveryTracker {
    /// Create a tracker with the given settled grace window.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            settled: VecDeque::new(),
            grace,
        }
    }

    /// Register a new pending delivery.
    ///
    /// # Errors
    /// Returns `LogicError` if the id is already tracked.
    pub fn track(&mut self, id: TrackerId, direction: Direction, now: Instant) -> Result<()> {
        self.collect(now);
        if self.entries.contains_key(&id) {
            return Err(MessengerError::LogicError(format!(
                "tracker {id} is already tracked"
            )));
        }
        self.entries.insert(
            id,
            Entry {
                direction,
                status: DeliveryStatus::Pending,
                outcome: None,
                settled_at: None,
            },
        );
        Ok(())
    }

    /// Move a delivery forward to `status`.
    ///
    /// Returns `false` when the delivery already has that status.
    ///
    /// # Errors
    /// Returns `UnknownTracker` if the id is not tracked, or
    /// `InvalidTransition` if the move would regress or swap one outcome for
    /// another. State is unchanged on error.
    pub fn update_status(
        &mut self,
        id: TrackerId,
        status: DeliveryStatus,
        now: Instant,
    ) -> Result<bool> {
        if status == DeliveryStatus::Settled {
            return self.settle(id, now);
        }
        self.collect(now);
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(MessengerError::UnknownTracker(id))?;

        if entry.status == status {
            return Ok(false);
        }
        if status.rank() <= entry.status.rank() {
            return Err(MessengerError::InvalidTransition {
                tracker: id,
                from: entry.status,
                to: status,
            });
        }

        tracing::debug!(tracker = %id, from = %entry.status, to = %status, "delivery status");
        entry.status = status;
        entry.outcome = Some(status);
        Ok(true)
    }

    /// Settle a delivery.
    ///
    /// Returns `false` if it was already settled.
    ///
    /// # Errors
    /// Returns `UnknownTracker` if the id is not tracked.
    pub fn settle(&mut self, id: TrackerId, now: Instant) -> Result<bool> {
        self.collect(now);
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(MessengerError::UnknownTracker(id))?;

        if entry.status == DeliveryStatus::Settled {
            return Ok(false);
        }

        tracing::debug!(tracker = %id, from = %entry.status, "delivery settled");
        entry.status = DeliveryStatus::Settled;
        entry.settled_at = Some(now);
        self.settled.push_back((id, now));
        Ok(true)
    }

    /// Schedule a delivery for collection without changing its status.
    ///
    /// Used once the peer has settled its side: the recorded outcome keeps
    /// answering queries for the grace window, then reads `Unknown`.
    /// Returns `false` if it was already settled or retired.
    ///
    /// # Errors
    /// Returns `UnknownTracker` if the id is not tracked.
    pub fn retire(&mut self, id: TrackerId, now: Instant) -> Result<bool> {
        self.collect(now);
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(MessengerError::UnknownTracker(id))?;
        if entry.settled_at.is_some() {
            return Ok(false);
        }
        entry.settled_at = Some(now);
        self.settled.push_back((id, now));
        Ok(true)
    }

    /// Current status, `Unknown` for ids never seen or already collected.
    #[must_use]
    pub fn query(&self, id: TrackerId, now: Instant) -> DeliveryStatus {
        match self.entries.get(&id) {
            Some(Entry {
                settled_at: Some(at),
                ..
            }) if self.expired(*at, now) => DeliveryStatus::Unknown,
            Some(entry) => entry.status,
            None => DeliveryStatus::Unknown,
        }
    }

    /// Outcome recorded before settlement, if any.
    #[must_use]
    pub fn outcome(&self, id: TrackerId) -> Option<DeliveryStatus> {
        self.entries.get(&id).and_then(|e| e.outcome)
    }

    /// Direction of a tracked delivery.
    #[must_use]
    pub fn direction(&self, id: TrackerId) -> Option<Direction> {
        self.entries.get(&id).map(|e| e.direction)
    }

    /// Ids neither settled nor retired, in id order.
    #[must_use]
    pub fn unsettled(&self) -> Vec<TrackerId> {
        let mut ids: Vec<TrackerId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.settled_at.is_none())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of entries held, including settled ones inside the grace window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop settled entries whose grace window has passed.
    pub fn collect(&mut self, now: Instant) {
        while let Some(&(id, at)) = self.settled.front() {
            if !self.expired(at, now) {
                break;
            }
            self.settled.pop_front();
            // a retired id settled later is queued again under the newer time
            if self.entries.get(&id).is_some_and(|e| e.settled_at == Some(at)) {
                self.entries.remove(&id);
            }
        }
    }

    fn expired(&self, settled_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(settled_at) >= self.grace
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn id(n: u64) -> TrackerId {
        TrackerId::new(n)
    }

    #[test]
    fn test_forward_lifecycle() {
        let t0 = Instant::now();
        let mut tracker = DeliveryTracker::default();

        tracker.track(id(1), Direction::Outgoing, t0).unwrap();
        assert_eq!(tracker.query(id(1), t0), DeliveryStatus::Pending);

        assert!(tracker.update_status(id(1), DeliveryStatus::Accepted, t0).unwrap());
        assert!(!tracker.update_status(id(1), DeliveryStatus::Accepted, t0).unwrap());
        assert!(tracker.settle(id(1), t0).unwrap());
        assert!(!tracker.settle(id(1), t0).unwrap());

        assert_eq!(tracker.query(id(1), t0), DeliveryStatus::Settled);
        assert_eq!(tracker.outcome(id(1)), Some(DeliveryStatus::Accepted));
    }

    #[test]
    fn test_regression_rejected() {
        let t0 = Instant::now();
        let mut tracker = DeliveryTracker::default();
        tracker.track(id(7), Direction::Incoming, t0).unwrap();
        tracker.update_status(id(7), DeliveryStatus::Rejected, t0).unwrap();

        let err = tracker
            .update_status(id(7), DeliveryStatus::Pending, t0)
            .unwrap_err();
        assert!(matches!(
            err,
            MessengerError::InvalidTransition {
                from: DeliveryStatus::Rejected,
                to: DeliveryStatus::Pending,
                ..
            }
        ));

        // outcomes are final
        assert!(tracker
            .update_status(id(7), DeliveryStatus::Accepted, t0)
            .is_err());
        assert_eq!(tracker.query(id(7), t0), DeliveryStatus::Rejected);
    }

    #[test]
    fn test_duplicate_track_is_logic_error() {
        let t0 = Instant::now();
        let mut tracker = DeliveryTracker::default();
        tracker.track(id(3), Direction::Outgoing, t0).unwrap();
        assert!(matches!(
            tracker.track(id(3), Direction::Outgoing, t0),
            Err(MessengerError::LogicError(_))
        ));
    }

    #[test]
    fn test_unknown_ids() {
        let t0 = Instant::now();
        let mut tracker = DeliveryTracker::default();
        assert_eq!(tracker.query(id(99), t0), DeliveryStatus::Unknown);
        assert!(matches!(
            tracker.settle(id(99), t0),
            Err(MessengerError::UnknownTracker(_))
        ));
    }

    #[test]
    fn test_grace_window() {
        let t0 = Instant::now();
        let mut tracker = DeliveryTracker::new(Duration::from_secs(5));
        tracker.track(id(1), Direction::Outgoing, t0).unwrap();
        tracker.settle(id(1), t0).unwrap();

        let t1 = t0 + Duration::from_secs(4);
        assert_eq!(tracker.query(id(1), t1), DeliveryStatus::Settled);

        let t2 = t0 + Duration::from_secs(5);
        assert_eq!(tracker.query(id(1), t2), DeliveryStatus::Unknown);
        assert_eq!(tracker.len(), 1);
        tracker.collect(t2);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_retired_outcome_is_collected() {
        let t0 = Instant::now();
        let grace = Duration::from_millis(10);
        let mut tracker = DeliveryTracker::new(grace);
        for n in 1..=100 {
            tracker.track(id(n), Direction::Outgoing, t0).unwrap();
            tracker.update_status(id(n), DeliveryStatus::Accepted, t0).unwrap();
            assert!(tracker.retire(id(n), t0).unwrap());
        }
        assert!(!tracker.retire(id(1), t0).unwrap());
        assert_eq!(tracker.query(id(1), t0), DeliveryStatus::Accepted);

        tracker.collect(t0 + grace);
        assert!(tracker.is_empty());
        assert_eq!(tracker.query(id(1), t0 + grace), DeliveryStatus::Unknown);
    }

    #[test]
    fn test_settle_after_retire_restarts_grace() {
        let t0 = Instant::now();
        let mut tracker = DeliveryTracker::new(Duration::from_secs(5));
        tracker.track(id(1), Direction::Outgoing, t0).unwrap();
        tracker.update_status(id(1), DeliveryStatus::Released, t0).unwrap();
        tracker.retire(id(1), t0).unwrap();

        let t1 = t0 + Duration::from_secs(3);
        tracker.settle(id(1), t1).unwrap();
        tracker.collect(t0 + Duration::from_secs(5));
        assert_eq!(
            tracker.query(id(1), t0 + Duration::from_secs(5)),
            DeliveryStatus::Settled
        );
        tracker.collect(t1 + Duration::from_secs(5));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_unsettled_skips_settled_and_retired() {
        let t0 = Instant::now();
        let mut tracker = DeliveryTracker::default();
        tracker.track(id(2), Direction::Outgoing, t0).unwrap();
        tracker.track(id(1), Direction::Outgoing, t0).unwrap();
        tracker.track(id(5), Direction::Incoming, t0).unwrap();
        tracker.track(id(6), Direction::Incoming, t0).unwrap();
        tracker.update_status(id(2), DeliveryStatus::Released, t0).unwrap();
        tracker.retire(id(2), t0).unwrap();
        tracker.update_status(id(6), DeliveryStatus::Accepted, t0).unwrap();
        tracker.settle(id(5), t0).unwrap();

        assert_eq!(tracker.unsettled(), vec![id(1), id(6)]);
    }

    fn any_status() -> impl Strategy<Value = DeliveryStatus> {
        prop_oneof![
            Just(DeliveryStatus::Unknown),
            Just(DeliveryStatus::Pending),
            Just(DeliveryStatus::Accepted),
            Just(DeliveryStatus::Rejected),
            Just(DeliveryStatus::Released),
            Just(DeliveryStatus::Modified),
            Just(DeliveryStatus::Settled),
        ]
    }

    proptest! {
        #[test]
        fn status_never_regresses(updates in proptest::collection::vec(any_status(), 0..20)) {
            let t0 = Instant::now();
            let mut tracker = DeliveryTracker::default();
            tracker.track(id(1), Direction::Outgoing, t0).unwrap();

            for next in updates {
                let before = tracker.query(id(1), t0);
                match tracker.update_status(id(1), next, t0) {
                    Ok(_) => prop_assert!(tracker.query(id(1), t0).rank() >= before.rank()),
                    Err(_) => prop_assert_eq!(tracker.query(id(1), t0), before),
                }
            }
        }
    }
}
