//! Broadcast record store over the transactional key-value engine

use super::record::{
    broadcast_key, broadcast_prefix, confirmed_key, confirmed_prefix, BroadcastRecord,
    ConfirmedBroadcast,
};
use crate::error::{BroadcastError, BroadcastResult};
use crate::ledger::{BlockIdentifier, TransactionIdentifier};
use crate::state::{Database, DatabaseTransaction, KeyValue};

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Durable keyed storage of broadcast records.
///
/// Every mutation is a check-then-write inside one write transaction.
#[derive(Clone)]
pub struct BroadcastStore {
    db: Arc<dyn Database>,
}

impl BroadcastStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Persist a new record, failing if the identifier is already tracked
    /// or was recently confirmed
    pub async fn put(&self, record: &BroadcastRecord) -> BroadcastResult<()> {
        let mut txn = self.db.transaction(true).await?;

        let key = record.key();
        if txn.get(&key).await?.is_some() {
            return Err(BroadcastError::AlreadyTracked {
                hash: record.identifier.hash.clone(),
            });
        }
        ensure_unconfirmed(txn.as_mut(), record).await?;

        txn.set(&key, record.encode()?).await?;
        txn.commit().await?;

        debug!("Stored broadcast {} for {}", record.identifier, record.sender);
        Ok(())
    }

    /// Persist a new record only if its sender has nothing in flight.
    ///
    /// The lock check and the write share one transaction, so two callers
    /// racing for the same sender cannot both succeed.
    pub async fn put_exclusive(&self, record: &BroadcastRecord) -> BroadcastResult<()> {
        let mut txn = self.db.transaction(true).await?;

        ensure_unconfirmed(txn.as_mut(), record).await?;
        for existing in records_in(txn.as_mut()).await? {
            if existing.identifier == record.identifier {
                return Err(BroadcastError::AlreadyTracked {
                    hash: record.identifier.hash.clone(),
                });
            }
            if existing.sender == record.sender {
                return Err(BroadcastError::AccountLocked {
                    sender: record.sender.clone(),
                });
            }
        }

        txn.set(&record.key(), record.encode()?).await?;
        txn.commit().await?;

        debug!("Stored exclusive broadcast {} for {}", record.identifier, record.sender);
        Ok(())
    }

    /// Get a record by identifier
    pub async fn get(
        &self,
        identifier: &TransactionIdentifier,
    ) -> BroadcastResult<Option<BroadcastRecord>> {
        let mut txn = self.db.transaction(false).await?;
        txn.get(&broadcast_key(identifier))
            .await?
            .map(|bytes| BroadcastRecord::decode(&bytes))
            .transpose()
    }

    /// Get every tracked record. Any undecodable entry fails the whole read.
    pub async fn get_all(&self) -> BroadcastResult<Vec<BroadcastRecord>> {
        let raw = self.db.scan(&broadcast_prefix()).await?;
        decode_all(raw, BroadcastRecord::decode)
    }

    /// Remove a record; removing an untracked identifier is not an error
    pub async fn remove(&self, identifier: &TransactionIdentifier) -> BroadcastResult<()> {
        let mut txn = self.db.transaction(true).await?;
        txn.delete(&broadcast_key(identifier)).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Move a pending record to submitted at `block`.
    ///
    /// Returns false (and writes nothing) if the record is gone or no
    /// longer pending.
    pub async fn mark_submitted(
        &self,
        identifier: &TransactionIdentifier,
        block: &BlockIdentifier,
    ) -> BroadcastResult<bool> {
        self.update(identifier, |mut record| {
            if !record.is_pending() {
                return None;
            }
            record.last_broadcast = Some(block.clone());
            Some(record)
        })
        .await
    }

    /// Move a submitted record back to pending, provided it was last
    /// submitted at `expected`.
    pub async fn reset_pending(
        &self,
        identifier: &TransactionIdentifier,
        expected: &BlockIdentifier,
    ) -> BroadcastResult<bool> {
        self.update(identifier, |mut record| {
            if record.last_broadcast.as_ref() != Some(expected) {
                return None;
            }
            record.last_broadcast = None;
            Some(record)
        })
        .await
    }

    /// Remove a confirmed record and leave a confirmation marker behind.
    ///
    /// Returns false if the stored record no longer matches the one the
    /// confirmation was judged on.
    pub async fn confirm(
        &self,
        record: &BroadcastRecord,
        sighting_block: &BlockIdentifier,
        tip: &BlockIdentifier,
    ) -> BroadcastResult<bool> {
        let mut txn = self.db.transaction(true).await?;

        let key = record.key();
        let current = match txn.get(&key).await? {
            Some(bytes) => BroadcastRecord::decode(&bytes)?,
            None => return Ok(false),
        };
        if current.last_broadcast != record.last_broadcast {
            return Ok(false);
        }

        let marker = ConfirmedBroadcast {
            identifier: record.identifier.clone(),
            sender: record.sender.clone(),
            sighting_block: sighting_block.clone(),
            confirmed_at_block: tip.clone(),
            confirmed_at: Utc::now(),
        };

        txn.delete(&key).await?;
        txn.set(&marker.key(), marker.encode()?).await?;
        txn.commit().await?;

        Ok(true)
    }

    /// Recently confirmed broadcasts
    pub async fn confirmations(&self) -> BroadcastResult<Vec<ConfirmedBroadcast>> {
        let raw = self.db.scan(&confirmed_prefix()).await?;
        decode_all(raw, ConfirmedBroadcast::decode)
    }

    /// Confirmation markers whose sighting was in `block`, read through
    /// the caller's transaction
    pub async fn confirmations_in_block(
        &self,
        txn: &mut dyn DatabaseTransaction,
        block: &BlockIdentifier,
    ) -> BroadcastResult<Vec<ConfirmedBroadcast>> {
        let raw = txn.scan(&confirmed_prefix()).await?;
        Ok(decode_all(raw, ConfirmedBroadcast::decode)?
            .into_iter()
            .filter(|marker| &marker.sighting_block == block)
            .collect())
    }

    /// Drop confirmation markers more than `retention` blocks below `tip`
    pub async fn prune_confirmations(
        &self,
        txn: &mut dyn DatabaseTransaction,
        tip: &BlockIdentifier,
        retention: u64,
    ) -> BroadcastResult<usize> {
        let raw = txn.scan(&confirmed_prefix()).await?;
        let mut pruned = 0;

        for marker in decode_all(raw, ConfirmedBroadcast::decode)? {
            if marker.confirmed_at_block.depth_at(tip) > retention {
                txn.delete(&marker.key()).await?;
                pruned += 1;
            }
        }

        if pruned > 0 {
            info!("Pruned {} confirmation markers at block {}", pruned, tip.index);
        }
        Ok(pruned)
    }

    async fn update<F>(&self, identifier: &TransactionIdentifier, f: F) -> BroadcastResult<bool>
    where
        F: FnOnce(BroadcastRecord) -> Option<BroadcastRecord> + Send,
    {
        let mut txn = self.db.transaction(true).await?;

        let key = broadcast_key(identifier);
        let record = match txn.get(&key).await? {
            Some(bytes) => BroadcastRecord::decode(&bytes)?,
            None => return Ok(false),
        };

        match f(record) {
            Some(updated) => {
                txn.set(&key, updated.encode()?).await?;
                txn.commit().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Read every record through an open transaction
pub async fn records_in(
    txn: &mut dyn DatabaseTransaction,
) -> BroadcastResult<Vec<BroadcastRecord>> {
    let raw = txn.scan(&broadcast_prefix()).await?;
    decode_all(raw, BroadcastRecord::decode)
}

/// A confirmed identifier stays final while its marker is retained
async fn ensure_unconfirmed(
    txn: &mut dyn DatabaseTransaction,
    record: &BroadcastRecord,
) -> BroadcastResult<()> {
    if txn.get(&confirmed_key(&record.identifier)).await?.is_some() {
        return Err(BroadcastError::AlreadyConfirmed {
            hash: record.identifier.hash.clone(),
        });
    }
    Ok(())
}

fn decode_all<T>(
    raw: Vec<KeyValue>,
    decode: impl Fn(&[u8]) -> BroadcastResult<T>,
) -> BroadcastResult<Vec<T>> {
    raw.into_iter()
        .map(|(key, value)| {
            decode(&value).map_err(|e| {
                BroadcastError::Storage(format!(
                    "unable to decode {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ))
            })
        })
        .collect()
}
