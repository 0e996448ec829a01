//! Shared fakes for unit tests

use crate::chain::{ChainAccess, TransactionSighting};
use crate::coordination::OutcomeHandler;
use crate::error::{BroadcastError, BroadcastResult};
use crate::ledger::{
    AccountIdentifier, Amount, Block, BlockIdentifier, Currency, Operation, OperationIdentifier,
    Transaction, TransactionIdentifier,
};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn block(index: u64) -> BlockIdentifier {
    BlockIdentifier::new(index, format!("block-{}", index))
}

pub fn make_block(index: u64) -> Block {
    Block {
        block_identifier: block(index),
        parent_block_identifier: block(index.saturating_sub(1)),
        timestamp: 1_700_000_000_000 + index as i64 * 1_000,
        transactions: Vec::new(),
    }
}

pub fn transfer(address: &str, value: &str) -> Operation {
    Operation {
        operation_identifier: OperationIdentifier {
            index: 0,
            network_index: None,
        },
        related_operations: Vec::new(),
        kind: "transfer".to_string(),
        status: None,
        account: Some(AccountIdentifier {
            address: address.to_string(),
            metadata: None,
        }),
        amount: Some(Amount {
            value: value.to_string(),
            currency: Currency {
                symbol: "TKN".to_string(),
                decimals: 8,
            },
        }),
        metadata: None,
    }
}

#[derive(Default)]
struct ChainState {
    tip: u64,
    sightings: HashMap<String, u64>,
    broadcasts: Vec<String>,
    failing: HashSet<String>,
    fail_tip: bool,
    hang_lookups: bool,
}

/// Scriptable ledger. Payloads built with `payload_for` broadcast as the
/// named hash; anything else comes back under a different hash.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn payload_for(hash: &str) -> String {
        format!("signed:{}", hash)
    }

    pub fn set_tip(&self, index: u64) {
        self.state.lock().unwrap().tip = index;
    }

    pub fn sight(&self, hash: &str, index: u64) {
        self.state
            .lock()
            .unwrap()
            .sightings
            .insert(hash.to_string(), index);
    }

    pub fn fail_broadcast_of(&self, hash: &str) {
        self.state.lock().unwrap().failing.insert(hash.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    pub fn fail_tip(&self, fail: bool) {
        self.state.lock().unwrap().fail_tip = fail;
    }

    pub fn hang_lookups(&self, hang: bool) {
        self.state.lock().unwrap().hang_lookups = hang;
    }

    /// Hashes successfully broadcast, in order
    pub fn broadcasts(&self) -> Vec<String> {
        self.state.lock().unwrap().broadcasts.clone()
    }
}

#[async_trait]
impl ChainAccess for FakeChain {
    async fn current_block_identifier(&self) -> BroadcastResult<BlockIdentifier> {
        let state = self.state.lock().unwrap();
        if state.fail_tip {
            return Err(BroadcastError::ChainAccess("tip unavailable".to_string()));
        }
        Ok(block(state.tip))
    }

    async fn find_transaction(
        &self,
        identifier: &TransactionIdentifier,
    ) -> BroadcastResult<Option<TransactionSighting>> {
        let hang = self.state.lock().unwrap().hang_lookups;
        if hang {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }

        let state = self.state.lock().unwrap();
        Ok(state.sightings.get(&identifier.hash).map(|index| TransactionSighting {
            block: block(*index),
            depth: state.tip.saturating_sub(*index),
            transaction: Transaction {
                transaction_identifier: identifier.clone(),
                operations: Vec::new(),
                metadata: None,
            },
        }))
    }

    async fn broadcast_transaction(&self, payload: &str) -> BroadcastResult<TransactionIdentifier> {
        let mut state = self.state.lock().unwrap();
        match payload.strip_prefix("signed:") {
            Some(hash) if state.failing.contains(hash) => Err(BroadcastError::ChainAccess(
                format!("node rejected {}", hash),
            )),
            Some(hash) => {
                state.broadcasts.push(hash.to_string());
                Ok(TransactionIdentifier::new(hash))
            }
            None => Ok(TransactionIdentifier::new(format!("unknown-{}", payload))),
        }
    }
}

/// Records every callback; `fail_next` makes the next one fail and
/// `hang_next` makes it never return
#[derive(Default)]
pub struct RecordingHandler {
    confirmed: Mutex<Vec<(BlockIdentifier, Transaction, Vec<Operation>)>>,
    stale: Mutex<Vec<TransactionIdentifier>>,
    fail_next: AtomicBool,
    hang_next: AtomicBool,
}

impl RecordingHandler {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn hang_next(&self) {
        self.hang_next.store(true, Ordering::SeqCst);
    }

    pub fn confirmed(&self) -> Vec<(BlockIdentifier, Transaction, Vec<Operation>)> {
        self.confirmed.lock().unwrap().clone()
    }

    pub fn stale(&self) -> Vec<TransactionIdentifier> {
        self.stale.lock().unwrap().clone()
    }

    async fn check_failure(&self) -> BroadcastResult<()> {
        if self.hang_next.swap(false, Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BroadcastError::Internal("downstream unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OutcomeHandler for RecordingHandler {
    async fn transaction_confirmed(
        &self,
        block: &BlockIdentifier,
        transaction: &Transaction,
        intent: &[Operation],
    ) -> BroadcastResult<()> {
        self.check_failure().await?;
        self.confirmed
            .lock()
            .unwrap()
            .push((block.clone(), transaction.clone(), intent.to_vec()));
        Ok(())
    }

    async fn transaction_stale(&self, identifier: &TransactionIdentifier) -> BroadcastResult<()> {
        self.check_failure().await?;
        self.stale.lock().unwrap().push(identifier.clone());
        Ok(())
    }
}
