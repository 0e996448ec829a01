//! Chain module - the tracker's view of the ledger
//!
//! This module provides:
//! - The chain access capability implemented per target ledger
//! - Confirmation and staleness judgments from block depths

pub mod finality;

pub use finality::{FinalityPolicy, Judgment};

use crate::error::BroadcastResult;
use crate::ledger::{BlockIdentifier, Transaction, TransactionIdentifier};

use async_trait::async_trait;

/// The most recent sighting of a transaction in a processed block
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionSighting {
    pub block: BlockIdentifier,
    /// Depth reported by the chain adapter at lookup time
    pub depth: u64,
    pub transaction: Transaction,
}

/// Chain I/O the broadcast coordinator depends on.
///
/// Implementations map their transport failures to
/// `BroadcastError::ChainAccess`; the coordinator bounds every call with
/// its own deadline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainAccess: Send + Sync {
    /// Current chain tip, used to measure confirmation and staleness depth
    async fn current_block_identifier(&self) -> BroadcastResult<BlockIdentifier>;

    /// Look up the most recent sighting of a transaction
    async fn find_transaction(
        &self,
        identifier: &TransactionIdentifier,
    ) -> BroadcastResult<Option<TransactionSighting>>;

    /// Submit a signed payload and return the identifier the ledger assigned
    async fn broadcast_transaction(&self, payload: &str) -> BroadcastResult<TransactionIdentifier>;
}
