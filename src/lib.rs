//! Broadcast Tracker - block-driven lifecycle tracking for ledger transactions
//!
//! Callers hand the coordinator signed transactions. On every block the
//! syncer ingests, pending transactions are submitted and submitted ones are
//! confirmed once buried deep enough, or resubmitted once they go stale.
//! While a transaction is in flight its sender is locked.

pub mod api;
pub mod chain;
pub mod config;
pub mod coordination;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod state;
pub mod tx;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{ChainAccess, TransactionSighting};
pub use coordination::{
    BlockWorker, BroadcastCoordinator, CommitWorker, OutcomeHandler, PassSummary,
};
pub use error::{BroadcastError, BroadcastResult};
