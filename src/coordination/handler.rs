//! Outcome notification capability

use crate::error::BroadcastResult;
use crate::ledger::{BlockIdentifier, Operation, Transaction, TransactionIdentifier};

use async_trait::async_trait;

/// Informed when a tracked broadcast reaches an outcome.
///
/// A failing callback leaves the record untouched, so the same outcome is
/// delivered again on the next block pass.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutcomeHandler: Send + Sync {
    /// The transaction was sighted in `block` and is now buried at least
    /// `confirmation_depth` blocks deep. `intent` is what the caller asked
    /// for, to be checked against the on-chain operations.
    async fn transaction_confirmed(
        &self,
        block: &BlockIdentifier,
        transaction: &Transaction,
        intent: &[Operation],
    ) -> BroadcastResult<()>;

    /// The transaction was not sighted within `stale_depth` blocks of its
    /// last submission. It will be resubmitted on the next pass.
    async fn transaction_stale(&self, identifier: &TransactionIdentifier) -> BroadcastResult<()>;
}
