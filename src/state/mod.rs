//! Transactional key-value persistence
//!
//! Handles:
//! - Scoped read/write transactions (dropping an uncommitted one discards it)
//! - Byte-keyed get/set/delete and prefix scans
//! - PostgreSQL storage for production, in-memory storage for tests

mod memory;
mod postgres;

pub use memory::MemoryDatabase;
pub use postgres::PgDatabase;

use crate::error::BroadcastResult;

use async_trait::async_trait;

/// A raw stored entry
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Key-value engine that hands out scoped transactions
#[async_trait]
pub trait Database: Send + Sync {
    /// Open a transaction; writes are rejected unless `writable`
    async fn transaction(&self, writable: bool) -> BroadcastResult<Box<dyn DatabaseTransaction>>;

    /// Scan all entries under `prefix` in a throwaway read transaction
    async fn scan(&self, prefix: &[u8]) -> BroadcastResult<Vec<KeyValue>> {
        let mut txn = self.transaction(false).await?;
        txn.scan(prefix).await
    }

    /// Health check
    async fn health_check(&self) -> BroadcastResult<()>;
}

/// An open transaction. Nothing is visible to other transactions until
/// `commit`; dropping without committing discards all writes.
#[async_trait]
pub trait DatabaseTransaction: Send {
    async fn get(&mut self, key: &[u8]) -> BroadcastResult<Option<Vec<u8>>>;

    async fn set(&mut self, key: &[u8], value: Vec<u8>) -> BroadcastResult<()>;

    async fn delete(&mut self, key: &[u8]) -> BroadcastResult<()>;

    /// Entries under `prefix` in key order, including this transaction's own writes
    async fn scan(&mut self, prefix: &[u8]) -> BroadcastResult<Vec<KeyValue>>;

    async fn commit(self: Box<Self>) -> BroadcastResult<()>;
}

/// Compute the exclusive end key for a prefix scan.
///
/// Returns `None` if the prefix is all `0xFF` bytes (no exclusive upper bound).
pub fn next_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.pop() {
        if last < u8::MAX {
            next.push(last + 1);
            return Some(next);
        }
    }
    None
}
