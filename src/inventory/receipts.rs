use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::errors::LedgerError;
use super::ledger::InventoryLedger;
use super::types::{sources, Caller, NewItem, NewTransaction, TransactionType};

/// Category given to items created implicitly by a receipt.
pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLine {
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    pub quantity: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

/// Goods delivered by a supplier, confirmed at the warehouse.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    #[serde(default)]
    pub supplier_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub lines: Vec<ReceiptLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LineOutcome {
    Received { item_id: String, new_quantity: f64 },
    Created { item_id: String },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptLineResult {
    pub name: String,
    #[serde(flatten)]
    pub outcome: LineOutcome,
}

pub struct ReceiptProcessor {
    ledger: Arc<InventoryLedger>,
}

impl ReceiptProcessor {
    pub fn new(ledger: Arc<InventoryLedger>) -> Self {
        Self { ledger }
    }

    /// Book every line of a receipt. Lines are independent: one failing
    /// line is reported and the rest still go through.
    pub async fn confirm(&self, caller: Option<&Caller>, receipt: &Receipt) -> Result<Vec<ReceiptLineResult>, LedgerError> {
        let caller = match caller {
            Some(caller) if !caller.user_id.trim().is_empty() => caller,
            _ => return Err(LedgerError::Unauthenticated),
        };

        let mut results = Vec::with_capacity(receipt.lines.len());
        for line in &receipt.lines {
            let outcome = match self.confirm_line(caller, receipt, line).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(line = %line.name, error = %e, "Receipt line failed");
                    LineOutcome::Failed { error: e.to_string() }
                }
            };
            results.push(ReceiptLineResult {
                name: line.name.clone(),
                outcome,
            });
        }

        info!(
            supplier_id = ?receipt.supplier_id,
            lines = results.len(),
            "Receipt confirmed"
        );
        Ok(results)
    }

    async fn confirm_line(&self, caller: &Caller, receipt: &Receipt, line: &ReceiptLine) -> Result<LineOutcome, LedgerError> {
        if !line.quantity.is_finite() || line.quantity <= 0.0 {
            return Ok(LineOutcome::Skipped {
                reason: format!("non-positive quantity {}", line.quantity),
            });
        }

        match self.ledger.find_item(line.code.as_deref(), &line.name).await? {
            Some(item) => {
                let mut input = NewTransaction::new(TransactionType::In, &item.id, line.quantity)
                    .from_supplier(receipt.supplier_id.clone())
                    .with_source(sources::RECEIPT)
                    .with_note("goods receipt");
                if let Some(project_id) = &receipt.project_id {
                    input = input.for_project(project_id.clone());
                }
                let booked = self.ledger.create_transaction(Some(caller), input).await?;
                Ok(LineOutcome::Received {
                    item_id: item.id,
                    new_quantity: booked.new_quantity,
                })
            }
            None => {
                let code = line
                    .code
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(generated_code);
                let item_id = self
                    .ledger
                    .create_item(
                        Some(caller),
                        NewItem {
                            name: line.name.clone(),
                            code,
                            category_id: UNCATEGORIZED.to_string(),
                            unit: line.unit.clone().unwrap_or_else(|| "pcs".to_string()),
                            location_id: None,
                            stock_quantity: Some(line.quantity),
                            min_quantity: None,
                            price: line.price,
                        },
                    )
                    .await?;
                Ok(LineOutcome::Created { item_id })
            }
        }
    }
}

fn generated_code() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("AUTO-{}", suffix[..8].to_ascii_uppercase())
}
