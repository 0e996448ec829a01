//! Ledger data types shared between the tracker and its chain adapters
//!
//! Mirrors the shape of the ledger's block/transaction/operation objects
//! closely enough that chain adapters can convert without loss.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Uniquely identifies a block on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockIdentifier {
    pub index: u64,
    pub hash: String,
}

impl BlockIdentifier {
    pub fn new(index: u64, hash: impl Into<String>) -> Self {
        Self {
            index,
            hash: hash.into(),
        }
    }

    /// Number of blocks `tip` is above this block (zero if not above)
    pub fn depth_at(&self, tip: &BlockIdentifier) -> u64 {
        tip.index.saturating_sub(self.index)
    }
}

impl fmt::Display for BlockIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.hash)
    }
}

/// Ledger-assigned transaction hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionIdentifier {
    pub hash: String,
}

impl TransactionIdentifier {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
}

impl fmt::Display for TransactionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentifier {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub symbol: String,
    pub decimals: u32,
}

/// Signed decimal amount in the currency's smallest unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub value: String,
    pub currency: Currency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationIdentifier {
    pub index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_index: Option<u64>,
}

/// A single balance-affecting effect of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operation_identifier: OperationIdentifier,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_operations: Vec<OperationIdentifier>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Operation {
    /// Whether an observed operation carries out this intended one.
    ///
    /// Identifiers and status are assigned by the ledger, so only the type,
    /// account and amount are compared.
    pub fn fulfilled_by(&self, observed: &Operation) -> bool {
        self.kind == observed.kind
            && self.account.as_ref().map(|a| &a.address)
                == observed.account.as_ref().map(|a| &a.address)
            && self.amount == observed.amount
    }
}

/// Check that every intended operation is carried out by a distinct
/// observed operation, and nothing else was observed.
pub fn intent_matches(intent: &[Operation], observed: &[Operation]) -> bool {
    if intent.len() != observed.len() {
        return false;
    }

    let mut used = vec![false; observed.len()];
    intent.iter().all(|wanted| {
        let hit = observed
            .iter()
            .enumerate()
            .find(|(i, op)| !used[*i] && wanted.fulfilled_by(op))
            .map(|(i, _)| i);
        match hit {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_identifier: TransactionIdentifier,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_identifier: BlockIdentifier,
    pub parent_block_identifier: BlockIdentifier,
    /// Milliseconds since the unix epoch
    pub timestamp: i64,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}
