//! Inventory ledger behaviour against a memory store, including contention
//! injected at commit time.

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use erp_flow::inventory::{Caller, ErrorKind, InventoryLedger, NewItem, NewTransaction, TransactionType};
use erp_flow::retry::{RetryConfig, RetryPolicy};
use erp_flow::store::{collections, Filter, MemoryStore, RecordStore, StoreError, StoredDocument, WriteBatch};

/// Memory store whose next `conflicts` commits fail as concurrent writes.
struct ContendedStore {
    inner: MemoryStore,
    conflicts: AtomicU32,
    commits: AtomicU32,
}

impl ContendedStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            conflicts: AtomicU32::new(0),
            commits: AtomicU32::new(0),
        }
    }

    fn inject(&self, conflicts: u32) {
        self.conflicts.store(conflicts, Ordering::SeqCst);
        self.commits.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for ContendedStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        self.inner.set(collection, id, data).await
    }

    async fn merge(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        self.inner.merge(collection, id, patch).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.inner.delete(collection, id).await
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredDocument>, StoreError> {
        self.inner.query(collection, filters).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Conflict {
                collection: collections::INVENTORY.to_string(),
                id: "contended".to_string(),
            });
        }
        self.inner.commit(batch).await
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        jitter: false,
    })
}

fn caller() -> Caller {
    Caller::new("u-store")
}

fn steel(stock: f64) -> NewItem {
    NewItem {
        name: "Steel rod 10mm".to_string(),
        code: "STL-10".to_string(),
        category_id: "raw".to_string(),
        unit: "pcs".to_string(),
        stock_quantity: Some(stock),
        ..NewItem::default()
    }
}

#[tokio::test]
async fn test_commit_retried_through_conflicts() {
    let store = Arc::new(ContendedStore::new());
    let ledger = InventoryLedger::new(store.clone(), fast_retry(4));
    let item = ledger.create_item(Some(&caller()), steel(100.0)).await.unwrap();

    store.inject(2);
    let receipt = ledger
        .create_transaction(Some(&caller()), NewTransaction::new(TransactionType::Out, &item, 30.0))
        .await
        .unwrap();

    assert_eq!(receipt.new_quantity, 70.0);
    assert_eq!(store.commits.load(Ordering::SeqCst), 3);
    assert_eq!(ledger.transactions_for_item(&item).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_exhausted_retries_are_internal_and_write_nothing() {
    let store = Arc::new(ContendedStore::new());
    let ledger = InventoryLedger::new(store.clone(), fast_retry(3));
    let item = ledger.create_item(Some(&caller()), steel(100.0)).await.unwrap();

    store.inject(10);
    let err = ledger
        .create_transaction(Some(&caller()), NewTransaction::new(TransactionType::In, &item, 5.0))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(store.commits.load(Ordering::SeqCst), 3);
    assert_eq!(ledger.get_item(&item).await.unwrap().stock_quantity, 100.0);
    assert_eq!(ledger.transactions_for_item(&item).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_overdraw_leaves_ledger_untouched() {
    let store = Arc::new(MemoryStore::new());
    let ledger = InventoryLedger::new(store.clone(), RetryPolicy::default());
    let item = ledger.create_item(Some(&caller()), steel(10.0)).await.unwrap();

    let err = ledger
        .create_transaction(Some(&caller()), NewTransaction::new(TransactionType::Out, &item, 11.0))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    let stored = ledger.get_item(&item).await.unwrap();
    assert_eq!(stored.stock_quantity, 10.0);
    assert_eq!(stored.transaction_count, 1);
    assert_eq!(store.count(collections::INVENTORY_TRANSACTIONS).await, 1);
}

#[tokio::test]
async fn test_duplicate_code_rejected_without_writes() {
    let store = Arc::new(MemoryStore::new());
    let ledger = InventoryLedger::new(store.clone(), RetryPolicy::default());
    ledger.create_item(Some(&caller()), steel(10.0)).await.unwrap();

    let mut twin = steel(5.0);
    twin.name = "Steel rod (duplicate)".to_string();
    let err = ledger.create_item(Some(&caller()), twin).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(store.count(collections::INVENTORY).await, 1);
    assert_eq!(store.count(collections::INVENTORY_TRANSACTIONS).await, 1);
}

#[tokio::test]
async fn test_missing_caller_is_unauthenticated() {
    let ledger = InventoryLedger::new(Arc::new(MemoryStore::new()), RetryPolicy::default());
    let err = ledger.create_item(None, steel(1.0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[derive(Debug, Clone)]
enum Movement {
    In(u32),
    Out(u32),
    Adjust(u32),
}

fn movement() -> impl Strategy<Value = Movement> {
    prop_oneof![
        (1u32..50).prop_map(Movement::In),
        (1u32..50).prop_map(Movement::Out),
        (0u32..80).prop_map(Movement::Adjust),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_replayed_log_matches_stock(initial in 0u32..40, moves in prop::collection::vec(movement(), 1..15)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let ledger = InventoryLedger::new(Arc::new(MemoryStore::new()), RetryPolicy::default());
            let item = ledger.create_item(Some(&caller()), steel(f64::from(initial))).await.unwrap();
            let mut expected = f64::from(initial);

            for step in moves {
                let (kind, quantity) = match step {
                    Movement::In(q) => (TransactionType::In, f64::from(q)),
                    Movement::Out(q) => (TransactionType::Out, f64::from(q)),
                    Movement::Adjust(q) => (TransactionType::Adjust, f64::from(q)),
                };
                let result = ledger
                    .create_transaction(Some(&caller()), NewTransaction::new(kind, &item, quantity))
                    .await;
                match kind {
                    TransactionType::Out if quantity > expected => {
                        assert_eq!(result.unwrap_err().kind(), ErrorKind::FailedPrecondition);
                    }
                    TransactionType::In => expected += quantity,
                    TransactionType::Out => expected -= quantity,
                    _ => expected = quantity,
                }
            }

            let check = ledger.verify_item(&item).await.unwrap();
            assert_eq!(check.recorded, expected);
            assert!(check.is_consistent(), "replay {} != recorded {}", check.replayed, check.recorded);

            let log = ledger.transactions_for_item(&item).await.unwrap();
            let sequences: Vec<u64> = log.iter().map(|t| t.sequence).collect();
            let numbered: Vec<u64> = (1..=log.len() as u64).collect();
            assert_eq!(sequences, numbered);
        });
    }
}
