use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stock-bearing catalogue entry. `stock_quantity` only moves through the
/// ledger; `transaction_count` numbers the ledger entries written for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    #[serde(default)]
    pub id: String,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub stock_quantity: f64,
    #[serde(default)]
    pub min_quantity: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub transaction_count: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl InventoryItem {
    pub fn is_below_minimum(&self) -> bool {
        self.stock_quantity < self.min_quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    In,
    Out,
    Adjust,
    Transfer,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransactionType::In => "IN",
            TransactionType::Out => "OUT",
            TransactionType::Adjust => "ADJUST",
            TransactionType::Transfer => "TRANSFER",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(TransactionType::In),
            "OUT" => Ok(TransactionType::Out),
            "ADJUST" => Ok(TransactionType::Adjust),
            "TRANSFER" => Ok(TransactionType::Transfer),
            other => Err(format!("unknown transaction type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Cancelled,
}

/// Where a ledger entry came from.
pub mod sources {
    pub const MANUAL: &str = "manual";
    pub const INITIAL_STOCK: &str = "initial_stock";
    pub const RECEIPT: &str = "receipt";
    pub const PROJECT_COMPLETION: &str = "project_completion";
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryTransaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub item_id: String,
    pub quantity: f64,
    #[serde(default)]
    pub previous_quantity: f64,
    #[serde(default)]
    pub new_quantity: f64,
    #[serde(default)]
    pub sequence: u64,
    pub date: DateTime<Utc>,
    pub user_id: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub supplier_id: Option<String>,
    #[serde(default)]
    pub destination_location_id: Option<String>,
}

/// Identity of whoever asks the ledger to move stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
}

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub name: String,
    pub code: String,
    pub category_id: String,
    pub unit: String,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub stock_quantity: Option<f64>,
    #[serde(default)]
    pub min_quantity: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub item_id: String,
    pub quantity: f64,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub supplier_id: Option<String>,
    #[serde(default)]
    pub destination_location_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    /// Caller-chosen transaction id. Booking the same id twice fails with
    /// `AlreadyExists` instead of moving stock again.
    #[serde(default)]
    pub transaction_id: Option<String>,
}

impl NewTransaction {
    pub fn new(kind: TransactionType, item_id: impl Into<String>, quantity: f64) -> Self {
        Self {
            kind,
            item_id: item_id.into(),
            quantity,
            note: None,
            project_id: None,
            supplier_id: None,
            destination_location_id: None,
            source: None,
            transaction_id: None,
        }
    }

    pub fn with_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn for_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn from_supplier(mut self, supplier_id: Option<String>) -> Self {
        self.supplier_id = supplier_id;
        self
    }

    pub fn to_location(mut self, location_id: impl Into<String>) -> Self {
        self.destination_location_id = Some(location_id.into());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_id: String,
    pub new_quantity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub category_id: Option<String>,
    pub location_id: Option<String>,
    pub below_minimum: bool,
}

/// Result of replaying an item's ledger against its recorded stock.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayCheck {
    pub item_id: String,
    pub recorded: f64,
    pub replayed: f64,
    pub entries: usize,
}

impl ReplayCheck {
    pub fn is_consistent(&self) -> bool {
        self.recorded == self.replayed
    }
}

/// Apply ledger entries in sequence order starting from zero stock.
pub fn replay(transactions: &[InventoryTransaction]) -> f64 {
    let mut ordered: Vec<&InventoryTransaction> = transactions
        .iter()
        .filter(|tx| tx.status == TransactionStatus::Completed)
        .collect();
    ordered.sort_by_key(|tx| tx.sequence);

    ordered.into_iter().fold(0.0, |stock, tx| match tx.kind {
        TransactionType::In => stock + tx.quantity,
        TransactionType::Out | TransactionType::Transfer => stock - tx.quantity,
        TransactionType::Adjust => tx.quantity,
    })
}
