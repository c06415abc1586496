//! Per-subscription link credit.
//!
//! The controller only does the accounting. Every change that the peer must
//! hear about comes back as a [`Flow`] for the caller to hand to the engine.

use std::collections::HashMap;

use crate::error::{MessengerError, Result};

/// Replenish once outstanding credit falls below this share of the window.
pub const LOW_WATER_PERCENT: u32 = 50;

/// A credit grant to issue on the link for `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    pub source: String,
    pub credit: u32,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    /// Credit granted at subscribe time.
    window: u32,
    /// Credit not yet consumed by receives.
    outstanding: u32,
}

impl Link {
    const fn below_low_water(self) -> bool {
        (self.outstanding as u64) * 100 < (self.window as u64) * (LOW_WATER_PERCENT as u64)
    }
}

/// Credit accounting for every subscription of one session.
#[derive(Debug, Default)]
pub struct CreditController {
    links: HashMap<String, Link>,
}

impl CreditController {
    /// Create an empty controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accounting for `source` with an initial grant of `window`.
    ///
    /// Returns the initial flow, or `None` if `source` is already open.
    pub fn open(&mut self, source: &str, window: u32) -> Option<Flow> {
        if self.links.contains_key(source) {
            return None;
        }
        self.links.insert(
            source.to_string(),
            Link {
                window,
                outstanding: window,
            },
        );
        Some(Flow {
            source: source.to_string(),
            credit: window,
        })
    }

    /// Stop accounting for `source`.
    pub fn close(&mut self, source: &str) -> bool {
        self.links.remove(source).is_some()
    }

    /// Forget every subscription.
    pub fn clear(&mut self) {
        self.links.clear();
    }

    /// Increase outstanding credit for `source` by `amount`.
    ///
    /// # Errors
    /// Returns `InvalidAddress` if `source` has no subscription.
    pub fn grant(&mut self, source: &str, amount: u32) -> Result<Flow> {
        let link = self.link_mut(source)?;
        link.outstanding = link.outstanding.saturating_add(amount);
        Ok(Flow {
            source: source.to_string(),
            credit: amount,
        })
    }

    /// Consume `count` credits for delivered messages.
    ///
    /// Returns a replenishing flow when the link drops below the low-water
    /// mark; the replenishment tops outstanding credit back up to the window.
    ///
    /// # Errors
    /// Returns `CreditUnderflow` if `count` exceeds outstanding credit, with
    /// no change to state; `InvalidAddress` if `source` has no subscription.
    pub fn consume(&mut self, source: &str, count: u32) -> Result<Option<Flow>> {
        let link = self.link_mut(source)?;
        if count > link.outstanding {
            return Err(MessengerError::CreditUnderflow {
                source_address: source.to_string(),
                requested: count,
                outstanding: link.outstanding,
            });
        }
        link.outstanding -= count;

        if link.below_low_water() && link.outstanding < link.window {
            let credit = link.window - link.outstanding;
            link.outstanding = link.window;
            tracing::debug!(source, credit, "replenishing link credit");
            return Ok(Some(Flow {
                source: source.to_string(),
                credit,
            }));
        }
        Ok(None)
    }

    /// Outstanding credit for `source`, `None` if not subscribed.
    #[must_use]
    pub fn outstanding(&self, source: &str) -> Option<u32> {
        self.links.get(source).map(|l| l.outstanding)
    }

    /// Subscribed sources, sorted.
    #[must_use]
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.links.keys().cloned().collect();
        sources.sort();
        sources
    }

    fn link_mut(&mut self, source: &str) -> Result<&mut Link> {
        self.links
            .get_mut(source)
            .ok_or_else(|| MessengerError::InvalidAddress(format!("not subscribed to {source}")))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_open_issues_initial_grant() {
        let mut credit = CreditController::new();
        let flow = credit.open("queue://a", 10).unwrap();
        assert_eq!(flow.credit, 10);
        assert_eq!(credit.outstanding("queue://a"), Some(10));
        assert!(credit.open("queue://a", 20).is_none());
    }

    #[test]
    fn test_consume_above_low_water() {
        let mut credit = CreditController::new();
        credit.open("queue://a", 10);
        assert_eq!(credit.consume("queue://a", 3).unwrap(), None);
        assert_eq!(credit.outstanding("queue://a"), Some(7));
        assert_eq!(credit.consume("queue://a", 2).unwrap(), None);
        assert_eq!(credit.outstanding("queue://a"), Some(5));
    }

    #[test]
    fn test_replenish_below_low_water() {
        let mut credit = CreditController::new();
        credit.open("queue://a", 10);
        let flow = credit.consume("queue://a", 6).unwrap().unwrap();
        assert_eq!(flow.credit, 6);
        assert_eq!(credit.outstanding("queue://a"), Some(10));
    }

    #[test]
    fn test_underflow_leaves_state() {
        let mut credit = CreditController::new();
        credit.open("queue://a", 4);
        let err = credit.consume("queue://a", 5).unwrap_err();
        assert!(matches!(
            err,
            MessengerError::CreditUnderflow {
                requested: 5,
                outstanding: 4,
                ..
            }
        ));
        assert_eq!(credit.outstanding("queue://a"), Some(4));
    }

    #[test]
    fn test_grant_tops_up() {
        let mut credit = CreditController::new();
        credit.open("topic/#", 2);
        credit.grant("topic/#", 3).unwrap();
        assert_eq!(credit.outstanding("topic/#"), Some(5));
        assert!(matches!(
            credit.grant("other", 1),
            Err(MessengerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_zero_window_never_replenishes() {
        let mut credit = CreditController::new();
        credit.open("queue://idle", 0);
        assert_eq!(credit.consume("queue://idle", 0).unwrap(), None);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Grant(u32),
        Consume(u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0u32..50).prop_map(Op::Grant), (0u32..80).prop_map(Op::Consume)]
    }

    proptest! {
        #[test]
        fn underflow_never_mutates(window in 0u32..64, ops in proptest::collection::vec(op(), 0..40)) {
            let mut credit = CreditController::new();
            credit.open("s", window);

            for op in ops {
                let before = credit.outstanding("s").unwrap();
                match op {
                    Op::Grant(n) => {
                        credit.grant("s", n).unwrap();
                        prop_assert_eq!(credit.outstanding("s").unwrap(), before + n);
                    }
                    Op::Consume(n) => match credit.consume("s", n) {
                        Ok(_) => prop_assert!(n <= before),
                        Err(_) => {
                            prop_assert!(n > before);
                            prop_assert_eq!(credit.outstanding("s").unwrap(), before);
                        }
                    },
                }
            }
        }
    }
}
