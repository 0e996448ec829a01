//! In-memory key-value store

use super::{Database, DatabaseTransaction, KeyValue};
use crate::error::{BroadcastError, BroadcastResult};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory database used by tests and embedded callers.
///
/// A write transaction holds the write lock until it is committed or dropped,
/// so writers are serialized and readers see only committed state.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    entries: Arc<RwLock<Entries>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn transaction(&self, writable: bool) -> BroadcastResult<Box<dyn DatabaseTransaction>> {
        let guard = if writable {
            Guard::Write(self.entries.clone().write_owned().await)
        } else {
            Guard::Read(self.entries.clone().read_owned().await)
        };

        Ok(Box::new(MemoryTransaction {
            guard,
            staged: BTreeMap::new(),
        }))
    }

    async fn health_check(&self) -> BroadcastResult<()> {
        Ok(())
    }
}

enum Guard {
    Read(OwnedRwLockReadGuard<Entries>),
    Write(OwnedRwLockWriteGuard<Entries>),
}

impl Guard {
    fn entries(&self) -> &Entries {
        match self {
            Guard::Read(g) => &**g,
            Guard::Write(g) => &**g,
        }
    }
}

struct MemoryTransaction {
    guard: Guard,
    /// Pending writes; `None` marks a delete
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl MemoryTransaction {
    fn ensure_writable(&self) -> BroadcastResult<()> {
        match self.guard {
            Guard::Write(_) => Ok(()),
            Guard::Read(_) => Err(BroadcastError::Storage(
                "write attempted in read-only transaction".to_string(),
            )),
        }
    }
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn get(&mut self, key: &[u8]) -> BroadcastResult<Option<Vec<u8>>> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.clone());
        }
        Ok(self.guard.entries().get(key).cloned())
    }

    async fn set(&mut self, key: &[u8], value: Vec<u8>) -> BroadcastResult<()> {
        self.ensure_writable()?;
        self.staged.insert(key.to_vec(), Some(value));
        Ok(())
    }

    async fn delete(&mut self, key: &[u8]) -> BroadcastResult<()> {
        self.ensure_writable()?;
        self.staged.insert(key.to_vec(), None);
        Ok(())
    }

    async fn scan(&mut self, prefix: &[u8]) -> BroadcastResult<Vec<KeyValue>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .guard
            .entries()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (key, value) in self
            .staged
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match value {
                Some(v) => merged.insert(key.clone(), v.clone()),
                None => merged.remove(key),
            };
        }

        Ok(merged.into_iter().collect())
    }

    async fn commit(self: Box<Self>) -> BroadcastResult<()> {
        let MemoryTransaction { guard, staged } = *self;
        if let Guard::Write(mut entries) = guard {
            for (key, value) in staged {
                match value {
                    Some(v) => entries.insert(key, v),
                    None => entries.remove(&key),
                };
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let db = MemoryDatabase::new();

        let mut txn = db.transaction(true).await.unwrap();
        txn.set(b"a/1", b"one".to_vec()).await.unwrap();
        assert_eq!(txn.get(b"a/1").await.unwrap(), Some(b"one".to_vec()));
        drop(txn);

        assert!(db.is_empty().await);
    }

    #[tokio::test]
    async fn test_commit_and_scan_prefix() {
        let db = MemoryDatabase::new();

        let mut txn = db.transaction(true).await.unwrap();
        txn.set(b"a/1", b"one".to_vec()).await.unwrap();
        txn.set(b"a/2", b"two".to_vec()).await.unwrap();
        txn.set(b"ab/3", b"three".to_vec()).await.unwrap();
        txn.set(b"b/1", b"other".to_vec()).await.unwrap();
        assert_ok!(txn.commit().await);

        let entries = db.scan(b"a/").await.unwrap();
        assert_eq!(
            entries,
            vec![
                (b"a/1".to_vec(), b"one".to_vec()),
                (b"a/2".to_vec(), b"two".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_scan_sees_own_writes_and_deletes() {
        let db = MemoryDatabase::new();

        let mut txn = db.transaction(true).await.unwrap();
        txn.set(b"a/1", b"one".to_vec()).await.unwrap();
        txn.set(b"a/2", b"two".to_vec()).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = db.transaction(true).await.unwrap();
        txn.delete(b"a/1").await.unwrap();
        txn.set(b"a/3", b"three".to_vec()).await.unwrap();
        let keys: Vec<_> = txn.scan(b"a/").await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a/2".to_vec(), b"a/3".to_vec()]);
        txn.commit().await.unwrap();

        assert_eq!(db.len().await, 2);
    }

    #[tokio::test]
    async fn test_read_only_transaction_rejects_writes() {
        let db = MemoryDatabase::new();
        let mut txn = db.transaction(false).await.unwrap();
        assert_err!(txn.set(b"k", b"v".to_vec()).await);
        assert_err!(txn.delete(b"k").await);
    }
}
