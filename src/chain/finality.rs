//! Confirmation and staleness judgments for submitted transactions
//!
//! A submitted transaction is either:
//! - Sighted deep enough: confirmed
//! - Sighted but shallow: keep waiting
//! - Not sighted for longer than the stale depth: lost, resubmit
//! - Not sighted yet: keep waiting

use crate::config::TrackerConfig;
use crate::ledger::BlockIdentifier;

/// Outcome of evaluating a submitted transaction against the chain tip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Judgment {
    Confirmed { depth: u64 },
    Sighted { depth: u64 },
    Stale { age: u64 },
    Unsighted { age: u64 },
}

/// Depth thresholds for a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalityPolicy {
    /// Required blocks between sighting and tip
    confirmation_depth: u64,
    /// Blocks after submission before an unsighted transaction is stale
    stale_depth: u64,
}

impl FinalityPolicy {
    pub fn new(confirmation_depth: u64, stale_depth: u64) -> Self {
        Self {
            confirmation_depth,
            stale_depth,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.confirmation_depth, config.stale_depth)
    }

    pub fn confirmation_depth(&self) -> u64 {
        self.confirmation_depth
    }

    pub fn stale_depth(&self) -> u64 {
        self.stale_depth
    }

    /// Judge a transaction last submitted at `last_broadcast`, optionally
    /// sighted at `sighting`, against the chain `tip`
    pub fn judge(
        &self,
        last_broadcast: &BlockIdentifier,
        sighting: Option<&BlockIdentifier>,
        tip: &BlockIdentifier,
    ) -> Judgment {
        match sighting {
            Some(block) => {
                let depth = block.depth_at(tip);
                if depth >= self.confirmation_depth {
                    Judgment::Confirmed { depth }
                } else {
                    Judgment::Sighted { depth }
                }
            }
            None => {
                let age = last_broadcast.depth_at(tip);
                if age > self.stale_depth {
                    Judgment::Stale { age }
                } else {
                    Judgment::Unsighted { age }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(index: u64) -> BlockIdentifier {
        BlockIdentifier::new(index, format!("b{}", index))
    }

    #[test]
    fn test_confirmation_boundary() {
        let policy = FinalityPolicy::new(3, 5);
        let submitted = block(100);

        assert_eq!(
            policy.judge(&submitted, Some(&block(101)), &block(103)),
            Judgment::Sighted { depth: 2 }
        );
        assert_eq!(
            policy.judge(&submitted, Some(&block(101)), &block(104)),
            Judgment::Confirmed { depth: 3 }
        );
    }

    #[test]
    fn test_stale_boundary_is_exclusive() {
        let policy = FinalityPolicy::new(3, 5);
        let submitted = block(100);

        assert_eq!(
            policy.judge(&submitted, None, &block(105)),
            Judgment::Unsighted { age: 5 }
        );
        assert_eq!(
            policy.judge(&submitted, None, &block(106)),
            Judgment::Stale { age: 6 }
        );
    }

    #[test]
    fn test_sighting_takes_precedence_over_age() {
        let policy = FinalityPolicy::new(3, 5);
        assert_eq!(
            policy.judge(&block(100), Some(&block(109)), &block(110)),
            Judgment::Sighted { depth: 1 }
        );
    }

    #[test]
    fn test_tip_below_submission() {
        // After a rollback the tip can sit below the submission block
        let policy = FinalityPolicy::new(3, 5);
        assert_eq!(
            policy.judge(&block(100), None, &block(98)),
            Judgment::Unsighted { age: 0 }
        );
    }
}
