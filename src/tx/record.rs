//! Persisted broadcast records and confirmation markers

use crate::error::BroadcastResult;
use crate::ledger::{BlockIdentifier, Operation, TransactionIdentifier};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Namespace for in-flight broadcasts
pub const BROADCAST_NAMESPACE: &str = "transaction-broadcast";

/// Namespace for recently confirmed broadcasts kept for reorg detection
pub const CONFIRMED_NAMESPACE: &str = "transaction-confirmed";

pub fn broadcast_key(identifier: &TransactionIdentifier) -> Vec<u8> {
    format!("{}/{}", BROADCAST_NAMESPACE, identifier.hash).into_bytes()
}

pub fn broadcast_prefix() -> Vec<u8> {
    format!("{}/", BROADCAST_NAMESPACE).into_bytes()
}

pub fn confirmed_key(identifier: &TransactionIdentifier) -> Vec<u8> {
    format!("{}/{}", CONFIRMED_NAMESPACE, identifier.hash).into_bytes()
}

pub fn confirmed_prefix() -> Vec<u8> {
    format!("{}/", CONFIRMED_NAMESPACE).into_bytes()
}

/// A transaction the tracker is responsible for getting on-chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastRecord {
    pub identifier: TransactionIdentifier,
    pub sender: String,
    pub intent: Vec<Operation>,
    /// Signed transaction, submitted verbatim
    pub payload: String,
    /// Block at which the payload was last submitted; `None` while pending
    #[serde(rename = "broadcast_at")]
    pub last_broadcast: Option<BlockIdentifier>,
}

/// Lifecycle state derived from a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastState {
    Pending,
    Submitted,
}

impl BroadcastRecord {
    pub fn new(
        sender: impl Into<String>,
        intent: Vec<Operation>,
        identifier: TransactionIdentifier,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            identifier,
            sender: sender.into(),
            intent,
            payload: payload.into(),
            last_broadcast: None,
        }
    }

    pub fn state(&self) -> BroadcastState {
        match self.last_broadcast {
            None => BroadcastState::Pending,
            Some(_) => BroadcastState::Submitted,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.last_broadcast.is_none()
    }

    pub fn key(&self) -> Vec<u8> {
        broadcast_key(&self.identifier)
    }

    pub fn encode(&self) -> BroadcastResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> BroadcastResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Left behind when a record is removed on confirmation, so that a later
/// removal of the sighting block can be detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedBroadcast {
    pub identifier: TransactionIdentifier,
    pub sender: String,
    pub sighting_block: BlockIdentifier,
    /// Chain tip at the time of confirmation
    pub confirmed_at_block: BlockIdentifier,
    pub confirmed_at: DateTime<Utc>,
}

impl ConfirmedBroadcast {
    pub fn key(&self) -> Vec<u8> {
        confirmed_key(&self.identifier)
    }

    pub fn encode(&self) -> BroadcastResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> BroadcastResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
