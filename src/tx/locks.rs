//! Which funding accounts currently have a broadcast in flight

use super::store::BroadcastStore;
use crate::error::BroadcastResult;

use std::collections::BTreeSet;

/// Read-only projection of the record store.
///
/// This is a point-in-time read, not a mutex: a caller that needs the lock
/// to be authoritative must use `BroadcastStore::put_exclusive`.
#[derive(Clone)]
pub struct AccountLockView {
    store: BroadcastStore,
}

impl AccountLockView {
    pub fn new(store: BroadcastStore) -> Self {
        Self { store }
    }

    /// Distinct senders with at least one tracked record
    pub async fn locked_addresses(&self) -> BroadcastResult<BTreeSet<String>> {
        Ok(self
            .store
            .get_all()
            .await?
            .into_iter()
            .map(|record| record.sender)
            .collect())
    }

    pub async fn is_locked(&self, sender: &str) -> BroadcastResult<bool> {
        Ok(self
            .store
            .get_all()
            .await?
            .iter()
            .any(|record| record.sender == sender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BlockIdentifier, TransactionIdentifier};
    use crate::state::MemoryDatabase;
    use crate::tx::BroadcastRecord;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_locked_addresses_are_distinct() {
        let store = BroadcastStore::new(Arc::new(MemoryDatabase::new()));
        let view = AccountLockView::new(store.clone());
        assert!(view.locked_addresses().await.unwrap().is_empty());

        for (hash, sender) in [("tx1", "alice"), ("tx2", "alice"), ("tx3", "bob")] {
            let record =
                BroadcastRecord::new(sender, Vec::new(), TransactionIdentifier::new(hash), "p");
            store.put(&record).await.unwrap();
        }

        let locked = view.locked_addresses().await.unwrap();
        assert_eq!(locked.into_iter().collect::<Vec<_>>(), vec!["alice", "bob"]);
        assert!(view.is_locked("bob").await.unwrap());
        assert!(!view.is_locked("carol").await.unwrap());
    }

    #[tokio::test]
    async fn test_confirmed_transactions_release_lock() {
        let store = BroadcastStore::new(Arc::new(MemoryDatabase::new()));
        let view = AccountLockView::new(store.clone());
        let id = TransactionIdentifier::new("tx1");

        store
            .put(&BroadcastRecord::new("alice", Vec::new(), id.clone(), "p"))
            .await
            .unwrap();
        store
            .mark_submitted(&id, &BlockIdentifier::new(1, "b1"))
            .await
            .unwrap();
        let record = store.get(&id).await.unwrap().unwrap();
        store
            .confirm(&record, &BlockIdentifier::new(2, "b2"), &BlockIdentifier::new(5, "b5"))
            .await
            .unwrap();

        // The confirmation marker is not a lock
        assert!(!view.is_locked("alice").await.unwrap());
    }
}
