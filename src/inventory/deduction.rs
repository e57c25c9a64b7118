//! Stock deduction when a project completes.
//!
//! The materials of the project's latest approved quotation are booked out
//! of inventory, one ledger OUT per resolvable line. Each line succeeds or
//! fails on its own; a line that cannot be matched to an item is skipped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::errors::{ErrorKind, LedgerError};
use super::ledger::InventoryLedger;
use super::types::{sources, Caller, NewTransaction, TransactionType};
use crate::store::{collections, Filter, RecordStore, StoreError};

pub const APPROVED: &str = "approved";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialLine {
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quotation {
    #[serde(default)]
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub materials: Vec<MaterialLine>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait QuotationSource: Send + Sync {
    /// Most recently created approved quotation for the project.
    async fn latest_approved(&self, project_id: &str) -> Result<Option<Quotation>, StoreError>;
}

pub struct StoreQuotationSource {
    store: Arc<dyn RecordStore>,
}

impl StoreQuotationSource {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl QuotationSource for StoreQuotationSource {
    async fn latest_approved(&self, project_id: &str) -> Result<Option<Quotation>, StoreError> {
        let documents = self
            .store
            .query(
                collections::QUOTATIONS,
                &[Filter::eq("projectId", project_id), Filter::eq("status", APPROVED)],
            )
            .await?;

        let mut quotations = Vec::with_capacity(documents.len());
        for document in &documents {
            let mut quotation: Quotation = document.decode()?;
            quotation.id = document.id.clone();
            quotations.push(quotation);
        }
        // ties on createdAt resolve to the greater id
        Ok(quotations
            .into_iter()
            .max_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id))))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeductionOutcome {
    Deducted { item_id: String, new_quantity: f64 },
    SkippedUnmatched,
    SkippedNonPositive,
    AlreadyDeducted { item_id: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeductionLine {
    pub material: String,
    pub quantity: f64,
    #[serde(flatten)]
    pub outcome: DeductionOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeductionReport {
    pub quotation_id: Option<String>,
    pub lines: Vec<DeductionLine>,
}

impl DeductionReport {
    pub fn deducted(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l.outcome, DeductionOutcome::Deducted { .. }))
            .count()
    }

    pub fn failures(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l.outcome, DeductionOutcome::Failed { .. }))
            .count()
    }
}

pub struct CompletionDeduction {
    ledger: Arc<InventoryLedger>,
    quotations: Arc<dyn QuotationSource>,
    system_user: Caller,
}

impl CompletionDeduction {
    pub fn new(ledger: Arc<InventoryLedger>, quotations: Arc<dyn QuotationSource>, system_user_id: &str) -> Self {
        Self {
            ledger,
            quotations,
            system_user: Caller::new(system_user_id),
        }
    }

    /// Book out the materials of the project's latest approved quotation.
    /// Only a failed quotation lookup is an error; per-line problems end up
    /// in the report.
    pub async fn run(&self, project_id: &str, project_name: &str) -> Result<DeductionReport, LedgerError> {
        let Some(quotation) = self.quotations.latest_approved(project_id).await? else {
            info!(project_id = %project_id, "No approved quotation, nothing to deduct");
            return Ok(DeductionReport::default());
        };

        let already = self.previously_deducted(project_id).await?;
        let note = format!("Project completed: {project_name}");
        let mut report = DeductionReport {
            quotation_id: Some(quotation.id.clone()),
            lines: Vec::with_capacity(quotation.materials.len()),
        };

        for material in &quotation.materials {
            let outcome = self.deduct_line(project_id, material, &note, &already).await;
            if let DeductionOutcome::Failed { error } = &outcome {
                warn!(project_id = %project_id, material = %material.name, error = %error, "Material deduction failed");
            }
            report.lines.push(DeductionLine {
                material: material.name.clone(),
                quantity: material.quantity,
                outcome,
            });
        }

        info!(
            project_id = %project_id,
            quotation_id = %quotation.id,
            deducted = report.deducted(),
            failed = report.failures(),
            "Completion deduction finished"
        );
        Ok(report)
    }

    async fn deduct_line(
        &self,
        project_id: &str,
        material: &MaterialLine,
        note: &str,
        already: &HashSet<String>,
    ) -> DeductionOutcome {
        if !material.quantity.is_finite() || material.quantity <= 0.0 {
            return DeductionOutcome::SkippedNonPositive;
        }

        let item = match self.ledger.find_item(material.code.as_deref(), &material.name).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                warn!(project_id = %project_id, material = %material.name, "Material not found in inventory, skipping");
                return DeductionOutcome::SkippedUnmatched;
            }
            Err(e) => return DeductionOutcome::Failed { error: e.to_string() },
        };
        if already.contains(&item.id) {
            return DeductionOutcome::AlreadyDeducted { item_id: item.id };
        }

        // One key per project and item: a concurrent run that lost the race
        // finds this id booked and reports the line as already deducted.
        let input = NewTransaction::new(TransactionType::Out, &item.id, material.quantity)
            .with_id(format!("completion_{project_id}_{}", item.id))
            .for_project(project_id)
            .with_source(sources::PROJECT_COMPLETION)
            .with_note(note);
        match self.ledger.create_transaction(Some(&self.system_user), input).await {
            Ok(receipt) => DeductionOutcome::Deducted {
                item_id: item.id,
                new_quantity: receipt.new_quantity,
            },
            Err(e) if e.kind() == ErrorKind::AlreadyExists => DeductionOutcome::AlreadyDeducted { item_id: item.id },
            Err(e) => DeductionOutcome::Failed { error: e.to_string() },
        }
    }

    /// Items already booked out for this project's completion.
    async fn previously_deducted(&self, project_id: &str) -> Result<HashSet<String>, LedgerError> {
        let entries = self
            .ledger
            .transactions(&[
                Filter::eq("projectId", project_id),
                Filter::eq("source", sources::PROJECT_COMPLETION),
            ])
            .await?;
        Ok(entries.into_iter().map(|tx| tx.item_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::NewItem;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn setup() -> (Arc<MemoryStore>, Arc<InventoryLedger>, String) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(InventoryLedger::new(store.clone(), RetryPolicy::default()));
        let steel = ledger
            .create_item(
                Some(&Caller::new("u-store")),
                NewItem {
                    name: "Steel rod 10mm".to_string(),
                    code: "STL-10".to_string(),
                    category_id: "raw".to_string(),
                    unit: "pcs".to_string(),
                    stock_quantity: Some(70.0),
                    ..NewItem::default()
                },
            )
            .await
            .unwrap();
        (store, ledger, steel)
    }

    fn quotation(materials: Vec<MaterialLine>) -> Quotation {
        Quotation {
            id: "q1".to_string(),
            project_id: "p1".to_string(),
            status: APPROVED.to_string(),
            created_at: None,
            materials,
        }
    }

    fn material(name: &str, code: Option<&str>, quantity: f64) -> MaterialLine {
        MaterialLine {
            name: name.to_string(),
            code: code.map(str::to_string),
            quantity,
        }
    }

    #[tokio::test]
    async fn test_deduction_scenario() {
        let (_store, ledger, steel) = setup().await;
        let mut source = MockQuotationSource::new();
        source.expect_latest_approved().returning(|_| {
            Ok(Some(quotation(vec![
                material("Steel rod 10mm", Some("STL-10"), 5.0),
                material("Unknown Part", None, 2.0),
            ])))
        });

        let deduction = CompletionDeduction::new(ledger.clone(), Arc::new(source), "system");
        let report = deduction.run("p1", "Gate").await.unwrap();

        assert_eq!(ledger.get_item(&steel).await.unwrap().stock_quantity, 65.0);
        assert_eq!(report.deducted(), 1);
        assert_eq!(report.lines[1].outcome, DeductionOutcome::SkippedUnmatched);

        let log = ledger.transactions_for_item(&steel).await.unwrap();
        let out = log.iter().find(|t| t.kind == TransactionType::Out).unwrap();
        assert_eq!(out.project_id.as_deref(), Some("p1"));
        assert_eq!(out.note.as_deref(), Some("Project completed: Gate"));
        assert_eq!(out.user_id, "system");
    }

    #[tokio::test]
    async fn test_redelivery_does_not_deduct_twice() {
        let (_store, ledger, steel) = setup().await;
        let mut source = MockQuotationSource::new();
        source
            .expect_latest_approved()
            .times(2)
            .returning(|_| Ok(Some(quotation(vec![material("Steel rod 10mm", Some("STL-10"), 5.0)]))));

        let deduction = CompletionDeduction::new(ledger.clone(), Arc::new(source), "system");
        deduction.run("p1", "Gate").await.unwrap();
        let second = deduction.run("p1", "Gate").await.unwrap();

        assert_eq!(
            second.lines[0].outcome,
            DeductionOutcome::AlreadyDeducted { item_id: steel.clone() }
        );
        assert_eq!(ledger.get_item(&steel).await.unwrap().stock_quantity, 65.0);
    }

    #[tokio::test]
    async fn test_booked_completion_key_reads_as_already_deducted() {
        let (_store, ledger, steel) = setup().await;
        // Booked by a run that read the ledger before this one's scan.
        ledger
            .create_transaction(
                Some(&Caller::new("system")),
                NewTransaction::new(TransactionType::Out, &steel, 5.0).with_id(format!("completion_p1_{steel}")),
            )
            .await
            .unwrap();

        let deduction = CompletionDeduction::new(ledger.clone(), Arc::new(MockQuotationSource::new()), "system");
        let line = material("Steel rod 10mm", Some("STL-10"), 5.0);
        let outcome = deduction.deduct_line("p1", &line, "Project completed: Gate", &HashSet::new()).await;

        assert_eq!(outcome, DeductionOutcome::AlreadyDeducted { item_id: steel.clone() });
        assert_eq!(ledger.get_item(&steel).await.unwrap().stock_quantity, 65.0);
    }

    #[tokio::test]
    async fn test_insufficient_stock_is_recorded_per_line() {
        let (_store, ledger, steel) = setup().await;
        let mut source = MockQuotationSource::new();
        source.expect_latest_approved().returning(|_| {
            Ok(Some(quotation(vec![
                material("Steel rod 10mm", Some("STL-10"), 500.0),
                material("Steel rod 10mm", Some("STL-10"), -1.0),
            ])))
        });

        let report = CompletionDeduction::new(ledger.clone(), Arc::new(source), "system")
            .run("p1", "Gate")
            .await
            .unwrap();

        assert_eq!(report.failures(), 1);
        assert_eq!(report.lines[1].outcome, DeductionOutcome::SkippedNonPositive);
        assert_eq!(ledger.get_item(&steel).await.unwrap().stock_quantity, 70.0);
    }

    #[tokio::test]
    async fn test_store_source_picks_latest_approved() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                collections::QUOTATIONS,
                "q-old",
                json!({"projectId": "p1", "status": "approved", "createdAt": "2024-01-01T00:00:00Z", "materials": []}),
            )
            .await
            .unwrap();
        store
            .set(
                collections::QUOTATIONS,
                "q-new",
                json!({"projectId": "p1", "status": "approved", "createdAt": "2024-03-01T00:00:00Z",
                       "materials": [{"name": "Primer", "quantity": 2}]}),
            )
            .await
            .unwrap();
        store
            .set(
                collections::QUOTATIONS,
                "q-draft",
                json!({"projectId": "p1", "status": "draft", "createdAt": "2024-05-01T00:00:00Z"}),
            )
            .await
            .unwrap();

        let latest = StoreQuotationSource::new(store).latest_approved("p1").await.unwrap().unwrap();
        assert_eq!(latest.id, "q-new");
        assert_eq!(latest.materials[0].quantity, 2.0);
    }
}
