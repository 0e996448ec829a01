//! Broadcast lifecycle coordinator

use super::handler::OutcomeHandler;
use super::worker::{BlockWorker, CommitWorker};
use crate::chain::{ChainAccess, FinalityPolicy, Judgment, TransactionSighting};
use crate::config::TrackerConfig;
use crate::error::{BroadcastError, BroadcastResult, RecordFailure};
use crate::ledger::{Block, BlockIdentifier, Operation, TransactionIdentifier};
use crate::metrics;
use crate::state::DatabaseTransaction;
use crate::tx::{AccountLockView, BroadcastRecord, BroadcastStore};

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Drives tracked broadcasts through pending -> submitted -> confirmed/stale.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BroadcastCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: BroadcastStore,
    locks: AccountLockView,
    policy: FinalityPolicy,
    chain_timeout: Duration,
    notification_timeout: Duration,
    confirmation_retention: u64,
    /// Injected after construction via `initialize`
    capabilities: RwLock<Option<Capabilities>>,
    /// Last block a pass completed for; held for the whole pass so passes
    /// never interleave
    last_pass: Mutex<Option<BlockIdentifier>>,
}

#[derive(Clone)]
struct Capabilities {
    chain: Arc<dyn ChainAccess>,
    handler: Arc<dyn OutcomeHandler>,
}

/// What one block pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub submitted: usize,
    pub confirmed: usize,
    pub stale: usize,
    pub waiting: usize,
    /// Records changed by someone else between snapshot and write
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Submitted,
    Confirmed,
    Stale,
    Waiting,
    Skipped,
}

impl PassSummary {
    fn count(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Submitted => self.submitted += 1,
            RecordOutcome::Confirmed => self.confirmed += 1,
            RecordOutcome::Stale => self.stale += 1,
            RecordOutcome::Waiting => self.waiting += 1,
            RecordOutcome::Skipped => self.skipped += 1,
        }
    }
}

impl BroadcastCoordinator {
    /// Create a coordinator. `initialize` must be called before syncing.
    pub fn new(store: BroadcastStore, config: &TrackerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                locks: AccountLockView::new(store.clone()),
                store,
                policy: FinalityPolicy::from_config(config),
                chain_timeout: config.chain_timeout(),
                notification_timeout: config.notification_timeout(),
                confirmation_retention: config.confirmation_retention,
                capabilities: RwLock::new(None),
                last_pass: Mutex::new(None),
            }),
        }
    }

    /// Inject the chain access and outcome handler capabilities
    pub async fn initialize(&self, chain: Arc<dyn ChainAccess>, handler: Arc<dyn OutcomeHandler>) {
        *self.inner.capabilities.write().await = Some(Capabilities { chain, handler });
        info!(
            "Broadcast coordinator initialized (confirmation depth {}, stale depth {})",
            self.inner.policy.confirmation_depth(),
            self.inner.policy.stale_depth()
        );
    }

    pub fn store(&self) -> &BroadcastStore {
        &self.inner.store
    }

    pub fn policy(&self) -> FinalityPolicy {
        self.inner.policy
    }

    /// Start tracking a transaction. Submission happens on the next block
    /// pass, not here.
    ///
    /// Callers should first check `locked_addresses` for `sender`; use
    /// `broadcast_exclusive` when that check must be authoritative.
    pub async fn broadcast(
        &self,
        sender: impl Into<String>,
        intent: Vec<Operation>,
        identifier: TransactionIdentifier,
        payload: impl Into<String>,
    ) -> BroadcastResult<()> {
        let record = BroadcastRecord::new(sender, intent, identifier, payload);
        self.inner.store.put(&record).await?;

        metrics::record_broadcast_created();
        info!("Tracking broadcast {} from {}", record.identifier, record.sender);
        Ok(())
    }

    /// Like `broadcast`, but fails with `AccountLocked` if the sender already
    /// has a record, checked in the same transaction as the write
    pub async fn broadcast_exclusive(
        &self,
        sender: impl Into<String>,
        intent: Vec<Operation>,
        identifier: TransactionIdentifier,
        payload: impl Into<String>,
    ) -> BroadcastResult<()> {
        let record = BroadcastRecord::new(sender, intent, identifier, payload);
        self.inner.store.put_exclusive(&record).await?;

        metrics::record_broadcast_created();
        info!("Tracking exclusive broadcast {} from {}", record.identifier, record.sender);
        Ok(())
    }

    /// Senders that currently have a broadcast in flight
    pub async fn locked_addresses(&self) -> BroadcastResult<BTreeSet<String>> {
        self.inner.locks.locked_addresses().await
    }

    /// Run the block pass for `block`: submit pending records and judge
    /// submitted ones. Every record is attempted; per-record failures are
    /// returned together as `PassFailed`.
    pub async fn reconcile(&self, block: &BlockIdentifier) -> BroadcastResult<PassSummary> {
        let started = Instant::now();
        let result = self.run_pass(block).await;
        metrics::record_pass_latency(result.is_ok(), started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            if e.should_alert() {
                error!("Broadcast pass for block {} failed: {}", block.index, e);
            } else {
                warn!("Broadcast pass for block {} failed: {}", block.index, e);
            }
        }
        result
    }

    async fn run_pass(&self, block: &BlockIdentifier) -> BroadcastResult<PassSummary> {
        let caps = self.capabilities().await?;

        let mut last_pass = self.inner.last_pass.lock().await;
        if let Some(last) = last_pass.as_ref() {
            if block.index <= last.index {
                return Err(BroadcastError::OutOfOrderBlock {
                    index: block.index,
                    last: last.index,
                });
            }
        }

        // Without a tip no depth can be judged, so this fails the pass
        let tip = self
            .bounded("current block identifier", caps.chain.current_block_identifier())
            .await?;
        metrics::record_chain_height(tip.index);

        let records = self.inner.store.get_all().await?;
        debug!(
            "Block {} pass over {} records (tip {})",
            block.index,
            records.len(),
            tip.index
        );

        let mut summary = PassSummary::default();
        let mut failures = Vec::new();
        for record in &records {
            match self.process_record(&caps, record, block, &tip).await {
                Ok(outcome) => summary.count(outcome),
                Err(error) => {
                    metrics::record_failure(error.kind());
                    failures.push(RecordFailure {
                        hash: record.identifier.hash.clone(),
                        error,
                    });
                }
            }
        }

        *last_pass = Some(block.clone());

        let pending_before = records.iter().filter(|r| r.is_pending()).count();
        let submitted_before = records.len() - pending_before;
        metrics::record_tracked(
            (pending_before + summary.stale).saturating_sub(summary.submitted),
            (submitted_before + summary.submitted)
                .saturating_sub(summary.stale + summary.confirmed),
        );

        if summary.submitted + summary.confirmed + summary.stale > 0 {
            info!(
                "Block {}: {} submitted, {} confirmed, {} stale, {} waiting",
                block.index, summary.submitted, summary.confirmed, summary.stale, summary.waiting
            );
        }

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(BroadcastError::PassFailed {
                block_index: block.index,
                failures,
            })
        }
    }

    async fn process_record(
        &self,
        caps: &Capabilities,
        record: &BroadcastRecord,
        block: &BlockIdentifier,
        tip: &BlockIdentifier,
    ) -> BroadcastResult<RecordOutcome> {
        match &record.last_broadcast {
            None => self.submit(caps, record, block).await,
            Some(last_broadcast) => self.evaluate(caps, record, last_broadcast, tip).await,
        }
    }

    /// Submit a pending record's payload
    async fn submit(
        &self,
        caps: &Capabilities,
        record: &BroadcastRecord,
        block: &BlockIdentifier,
    ) -> BroadcastResult<RecordOutcome> {
        let returned = self
            .bounded(
                "broadcast transaction",
                caps.chain.broadcast_transaction(&record.payload),
            )
            .await?;

        // Tracking the wrong hash would never confirm and never release the sender
        if returned != record.identifier {
            return Err(BroadcastError::IdentifierMismatch {
                expected: record.identifier.hash.clone(),
                returned: returned.hash,
            });
        }

        if !self.inner.store.mark_submitted(&record.identifier, block).await? {
            debug!("Broadcast {} changed during pass, not marking submitted", record.identifier);
            return Ok(RecordOutcome::Skipped);
        }

        metrics::record_submitted();
        info!("Broadcast transaction {} at block {}", record.identifier, block.index);
        Ok(RecordOutcome::Submitted)
    }

    /// Judge a submitted record against the chain tip
    async fn evaluate(
        &self,
        caps: &Capabilities,
        record: &BroadcastRecord,
        last_broadcast: &BlockIdentifier,
        tip: &BlockIdentifier,
    ) -> BroadcastResult<RecordOutcome> {
        let sighting = self
            .bounded(
                "find transaction",
                caps.chain.find_transaction(&record.identifier),
            )
            .await?;

        match sighting {
            Some(sighting) => {
                match self.inner.policy.judge(last_broadcast, Some(&sighting.block), tip) {
                    Judgment::Confirmed { depth } => {
                        self.confirm(caps, record, &sighting, tip, depth).await
                    }
                    judgment => {
                        debug!(
                            "Transaction {} sighted in block {}: {:?} (chain reports depth {})",
                            record.identifier, sighting.block.index, judgment, sighting.depth
                        );
                        Ok(RecordOutcome::Waiting)
                    }
                }
            }
            None => match self.inner.policy.judge(last_broadcast, None, tip) {
                Judgment::Stale { age } => self.expire(caps, record, last_broadcast, age).await,
                judgment => {
                    debug!("Transaction {} not yet sighted: {:?}", record.identifier, judgment);
                    Ok(RecordOutcome::Waiting)
                }
            },
        }
    }

    async fn confirm(
        &self,
        caps: &Capabilities,
        record: &BroadcastRecord,
        sighting: &TransactionSighting,
        tip: &BlockIdentifier,
        depth: u64,
    ) -> BroadcastResult<RecordOutcome> {
        self.notify(
            &record.identifier,
            caps.handler
                .transaction_confirmed(&sighting.block, &sighting.transaction, &record.intent),
        )
        .await?;

        if !self.inner.store.confirm(record, &sighting.block, tip).await? {
            debug!("Broadcast {} changed during pass, not removing", record.identifier);
            return Ok(RecordOutcome::Skipped);
        }

        metrics::record_confirmed();
        info!(
            "Transaction {} confirmed in block {} ({} confirmations)",
            record.identifier, sighting.block.index, depth
        );
        Ok(RecordOutcome::Confirmed)
    }

    async fn expire(
        &self,
        caps: &Capabilities,
        record: &BroadcastRecord,
        last_broadcast: &BlockIdentifier,
        age: u64,
    ) -> BroadcastResult<RecordOutcome> {
        self.notify(&record.identifier, caps.handler.transaction_stale(&record.identifier))
            .await?;

        if !self
            .inner
            .store
            .reset_pending(&record.identifier, last_broadcast)
            .await?
        {
            debug!("Broadcast {} changed during pass, not resetting", record.identifier);
            return Ok(RecordOutcome::Skipped);
        }

        metrics::record_stale();
        warn!(
            "Transaction {} not sighted {} blocks after broadcast at {}, will rebroadcast",
            record.identifier, age, last_broadcast.index
        );
        Ok(RecordOutcome::Stale)
    }

    async fn capabilities(&self) -> BroadcastResult<Capabilities> {
        self.inner
            .capabilities
            .read()
            .await
            .clone()
            .ok_or(BroadcastError::NotInitialized)
    }

    /// Bound an outcome callback by the configured deadline. A failed or
    /// timed-out callback leaves the record for the next pass.
    async fn notify(
        &self,
        identifier: &TransactionIdentifier,
        call: impl Future<Output = BroadcastResult<()>>,
    ) -> BroadcastResult<()> {
        match timeout(self.inner.notification_timeout, call).await {
            Ok(result) => result.map_err(|e| notification_error(identifier, e)),
            Err(_) => Err(BroadcastError::Notification {
                hash: identifier.hash.clone(),
                message: format!(
                    "no response within {}ms",
                    self.inner.notification_timeout.as_millis()
                ),
            }),
        }
    }

    /// Bound a chain call by the configured deadline
    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = BroadcastResult<T>>,
    ) -> BroadcastResult<T> {
        match timeout(self.inner.chain_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BroadcastError::Timeout {
                operation: operation.to_string(),
            }),
        }
    }
}

fn notification_error(identifier: &TransactionIdentifier, error: BroadcastError) -> BroadcastError {
    match error {
        e @ BroadcastError::Notification { .. } => e,
        e => BroadcastError::Notification {
            hash: identifier.hash.clone(),
            message: e.to_string(),
        },
    }
}

#[async_trait]
impl BlockWorker for BroadcastCoordinator {
    async fn adding_block(
        &self,
        block: &Block,
        txn: &mut dyn DatabaseTransaction,
    ) -> BroadcastResult<Option<CommitWorker>> {
        // Refuse to sync without capabilities rather than silently skip passes
        self.capabilities().await?;

        self.inner
            .store
            .prune_confirmations(txn, &block.block_identifier, self.inner.confirmation_retention)
            .await?;

        // Chain calls run after the block commits, never inside its transaction
        let coordinator = self.clone();
        let block_identifier = block.block_identifier.clone();
        Ok(Some(Box::pin(async move {
            coordinator.reconcile(&block_identifier).await.map(|_| ())
        })))
    }

    async fn removing_block(
        &self,
        block: &Block,
        txn: &mut dyn DatabaseTransaction,
    ) -> BroadcastResult<Option<CommitWorker>> {
        let reverted = self
            .inner
            .store
            .confirmations_in_block(txn, &block.block_identifier)
            .await?;

        if let Some(first) = reverted.first() {
            for marker in &reverted {
                metrics::record_reorg_alert();
                error!(
                    "Removing block {} reverts confirmed transaction {} from {}",
                    block.block_identifier, marker.identifier, marker.sender
                );
            }
            return Err(BroadcastError::ReorgBeyondConfirmation {
                hash: first.identifier.hash.clone(),
                block_index: block.block_identifier.index,
                block_hash: block.block_identifier.hash.clone(),
            });
        }

        // Allow the replacement block at this height to be processed
        let mut last_pass = self.inner.last_pass.lock().await;
        if matches!(last_pass.as_ref(), Some(last) if last.index >= block.block_identifier.index) {
            *last_pass = Some(block.parent_block_identifier.clone());
        }

        debug!("Rewound broadcast tracking past block {}", block.block_identifier);
        Ok(None)
    }
}
