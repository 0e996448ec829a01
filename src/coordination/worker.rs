//! Block ingestion hook called by the syncer

use crate::error::BroadcastResult;
use crate::ledger::Block;
use crate::state::DatabaseTransaction;

use async_trait::async_trait;
use futures::future::BoxFuture;

/// Deferred work returned by a hook. The syncer awaits it after the block's
/// transaction commits and before it ingests the next block.
pub type CommitWorker = BoxFuture<'static, BroadcastResult<()>>;

/// Called by the syncer inside the durability transaction that persists
/// (or removes) each block
#[async_trait]
pub trait BlockWorker: Send + Sync {
    async fn adding_block(
        &self,
        block: &Block,
        txn: &mut dyn DatabaseTransaction,
    ) -> BroadcastResult<Option<CommitWorker>>;

    async fn removing_block(
        &self,
        block: &Block,
        txn: &mut dyn DatabaseTransaction,
    ) -> BroadcastResult<Option<CommitWorker>>;
}
