//! Overlapping deliveries of the same change. The store yields to the
//! scheduler before every call so the two handlers interleave their reads
//! and commits instead of running back to back.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use erp_flow::config::ErpFlowConfig;
use erp_flow::inventory::{
    Caller, CompletionDeduction, DeductionOutcome, InventoryLedger, NewItem, StoreQuotationSource, TransactionType,
};
use erp_flow::retry::RetryPolicy;
use erp_flow::store::{collections, Filter, MemoryStore, RecordStore, StoreError, StoredDocument, WriteBatch};
use erp_flow::workflows::{Outcome, SideEffectKind};
use erp_flow::{ProjectChangeEvent, Services};

mod fixtures;
use fixtures::{users_fixture, RecordingDispatcher};

struct YieldingStore {
    inner: MemoryStore,
}

impl YieldingStore {
    fn seeded(fixture: Value) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::from_fixture(&fixture).unwrap(),
        })
    }
}

#[async_trait]
impl RecordStore for YieldingStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.get(collection, id).await
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.set(collection, id, data).await
    }

    async fn merge(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.merge(collection, id, patch).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.delete(collection, id).await
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredDocument>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.query(collection, filters).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.commit(batch).await
    }
}

fn steel() -> NewItem {
    NewItem {
        name: "Steel rod 10mm".to_string(),
        code: "STL-10".to_string(),
        category_id: "raw".to_string(),
        unit: "pcs".to_string(),
        stock_quantity: Some(70.0),
        ..NewItem::default()
    }
}

#[tokio::test]
async fn test_overlapping_completion_runs_book_materials_once() {
    let store = YieldingStore::seeded(json!({
        "quotations": {
            "q1": {"projectId": "p1", "status": "approved", "createdAt": "2024-04-01T00:00:00Z", "materials": [
                {"code": "STL-10", "name": "Steel rod 10mm", "quantity": 5}
            ]}
        }
    }));
    let ledger = Arc::new(InventoryLedger::new(store.clone(), RetryPolicy::default()));
    let item = ledger.create_item(Some(&Caller::new("u-store")), steel()).await.unwrap();
    let deduction = CompletionDeduction::new(
        ledger.clone(),
        Arc::new(StoreQuotationSource::new(store.clone())),
        "system",
    );

    let (first, second) = tokio::join!(deduction.run("p1", "Gate"), deduction.run("p1", "Gate"));
    let outcomes = [first.unwrap().lines.remove(0).outcome, second.unwrap().lines.remove(0).outcome];

    let deducted = outcomes
        .iter()
        .filter(|o| matches!(o, DeductionOutcome::Deducted { .. }))
        .count();
    assert_eq!(deducted, 1, "outcomes: {outcomes:?}");
    assert!(outcomes.contains(&DeductionOutcome::AlreadyDeducted { item_id: item.clone() }));

    assert_eq!(ledger.get_item(&item).await.unwrap().stock_quantity, 65.0);
    let log = ledger.transactions_for_item(&item).await.unwrap();
    let outs: Vec<_> = log.iter().filter(|t| t.kind == TransactionType::Out).collect();
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].quantity, 5.0);
    assert!(ledger.verify_item(&item).await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_overlapping_redelivery_notifies_each_group_once() {
    let before = json!({"name": "Gate", "status": "pending"});
    let after = json!({"name": "Gate", "status": "in-progress"});
    let store = YieldingStore::seeded(json!({"users": users_fixture(), "projects": {"p1": after.clone()}}));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let services = Services::with_dispatcher(store.clone(), &ErpFlowConfig::default(), dispatcher.clone());

    let delivery = || ProjectChangeEvent {
        project_id: "p1".to_string(),
        event_id: Some("evt-1".to_string()),
        before: Some(before.clone()),
        after: Some(after.clone()),
    };
    let (first, second) = tokio::join!(services.engine.handle(delivery()), services.engine.handle(delivery()));
    let (first, second) = (first.unwrap(), second.unwrap());

    let skipped = [&first, &second]
        .iter()
        .filter(|report| {
            report
                .effects_of(SideEffectKind::ProjectUpdate)
                .all(|e| matches!(e.outcome, Outcome::Skipped(_)))
        })
        .count();
    assert_eq!(skipped, 1);

    let purchasing = dispatcher.titled("Purchasing started");
    assert_eq!(purchasing.len(), 1);
    assert_eq!(purchasing[0].recipients, vec!["s1", "s2"]);
    assert_eq!(dispatcher.titled("Material cutting").len(), 1);

    let project = store.get(collections::PROJECTS, "p1").await.unwrap().unwrap().data;
    assert_eq!(project["tasks"]["purchasing"]["assignedTo"], "s1");
    assert_eq!(project["tasks"]["material_cutting"]["assignedTo"], "c1");
    assert!(store.get(collections::WORKFLOW_EVENTS, "evt-1").await.unwrap().is_some());
}
