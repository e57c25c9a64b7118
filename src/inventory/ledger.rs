use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use super::errors::LedgerError;
use super::types::{
    replay, sources, Caller, InventoryItem, InventoryTransaction, NewItem, NewTransaction,
    ReplayCheck, ReportFilter, TransactionReceipt, TransactionStatus, TransactionType,
};
use crate::observability::workflow_metrics;
use crate::retry::RetryPolicy;
use crate::store::{collections, Filter, Precondition, RecordStore, StoredDocument, WriteBatch};
use crate::telemetry::create_ledger_span;

/// Fields `update_item` never lets through; stock moves via transactions only.
const PROTECTED_FIELDS: &[&str] = &["stockQuantity", "transactionCount", "id", "createdAt"];

/// Owner of item stock levels and the append-only transaction log.
///
/// Every operation is one atomic unit against the store: read the current
/// item, validate, stage a [`WriteBatch`] guarded by the item version, and
/// commit. Domain failures abort before anything is written; write
/// conflicts re-run the whole unit under the [`RetryPolicy`].
pub struct InventoryLedger {
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
}

fn require_caller(caller: Option<&Caller>) -> Result<&Caller, LedgerError> {
    match caller {
        Some(caller) if !caller.user_id.trim().is_empty() => Ok(caller),
        _ => Err(LedgerError::Unauthenticated),
    }
}

fn require_text(value: &str, field: &str) -> Result<(), LedgerError> {
    if value.trim().is_empty() {
        return Err(LedgerError::InvalidArgument(format!("'{field}' is required")));
    }
    Ok(())
}

fn decode_item(document: &StoredDocument) -> Result<InventoryItem, LedgerError> {
    let mut item: InventoryItem = document.decode()?;
    item.id = document.id.clone();
    Ok(item)
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn RecordStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Create an item, reserving its code. A positive initial stock is
    /// booked as an IN entry in the same commit.
    pub async fn create_item(&self, caller: Option<&Caller>, input: NewItem) -> Result<String, LedgerError> {
        let caller = require_caller(caller)?;
        require_text(&input.name, "name")?;
        require_text(&input.code, "code")?;
        require_text(&input.category_id, "categoryId")?;
        require_text(&input.unit, "unit")?;

        let initial = input.stock_quantity.unwrap_or(0.0);
        if !initial.is_finite() || initial < 0.0 {
            return Err(LedgerError::InvalidArgument(format!(
                "initial stockQuantity must be a non-negative number, got {initial}"
            )));
        }

        let item_id = Uuid::new_v4().to_string();
        let span = create_ledger_span("create_item", Some(item_id.as_str()));
        self.retry
            .execute_with_retry("create_item", || self.attempt_create_item(caller, &input, &item_id, initial))
            .instrument(span)
            .await?;

        info!(item_id = %item_id, code = %input.code.trim(), initial_stock = initial, "Inventory item created");
        Ok(item_id)
    }

    async fn attempt_create_item(
        &self,
        caller: &Caller,
        input: &NewItem,
        item_id: &str,
        initial: f64,
    ) -> Result<(), LedgerError> {
        let code = input.code.trim();
        self.ensure_code_free(code, None).await?;

        let now = Utc::now();
        let item = InventoryItem {
            id: item_id.to_string(),
            code: code.to_string(),
            name: input.name.trim().to_string(),
            category_id: input.category_id.trim().to_string(),
            location_id: input.location_id.clone(),
            unit: input.unit.trim().to_string(),
            stock_quantity: initial,
            min_quantity: input.min_quantity.unwrap_or(0.0),
            price: input.price.unwrap_or(0.0),
            transaction_count: u64::from(initial > 0.0),
            created_at: Some(now),
            updated_at: Some(now),
        };

        let mut batch = WriteBatch::new()
            .require(collections::INVENTORY_CODES, code, Precondition::Missing)
            .require(collections::INVENTORY, item_id, Precondition::Missing)
            .set(collections::INVENTORY_CODES, code, json!({ "itemId": item_id }))
            .set(collections::INVENTORY, item_id, serde_json::to_value(&item)?);

        if initial > 0.0 {
            let entry = InventoryTransaction {
                id: Uuid::new_v4().to_string(),
                kind: TransactionType::In,
                item_id: item_id.to_string(),
                quantity: initial,
                previous_quantity: 0.0,
                new_quantity: initial,
                sequence: 1,
                date: now,
                user_id: caller.user_id.clone(),
                status: TransactionStatus::Completed,
                source: Some(sources::INITIAL_STOCK.to_string()),
                note: Some("initial stock".to_string()),
                project_id: None,
                supplier_id: None,
                destination_location_id: None,
            };
            batch = batch
                .require(collections::INVENTORY_TRANSACTIONS, &entry.id, Precondition::Missing)
                .set(collections::INVENTORY_TRANSACTIONS, &entry.id, serde_json::to_value(&entry)?);
        }

        self.store.commit(batch).await?;
        workflow_metrics().record_ledger_commit();
        Ok(())
    }

    /// Fails `AlreadyExists` when `code` is reserved or used by an item
    /// other than `owner`.
    async fn ensure_code_free(&self, code: &str, owner: Option<&str>) -> Result<(), LedgerError> {
        if let Some(reservation) = self.store.get(collections::INVENTORY_CODES, code).await? {
            let holder = reservation.data.get("itemId").and_then(Value::as_str);
            if holder != owner || owner.is_none() {
                return Err(LedgerError::AlreadyExists(format!("item code '{code}' is already in use")));
            }
        }

        let holders = self
            .store
            .query(collections::INVENTORY, &[Filter::eq("code", code)])
            .await?;
        if holders.iter().any(|doc| Some(doc.id.as_str()) != owner) {
            return Err(LedgerError::AlreadyExists(format!("item code '{code}' is already in use")));
        }
        Ok(())
    }

    /// Update item metadata. Stock fields are stripped silently.
    pub async fn update_item(&self, caller: Option<&Caller>, item_id: &str, patch: Value) -> Result<(), LedgerError> {
        require_caller(caller)?;
        let Value::Object(mut patch) = patch else {
            return Err(LedgerError::InvalidArgument("item patch must be an object".to_string()));
        };

        for field in PROTECTED_FIELDS {
            if patch.remove(*field).is_some() {
                debug!(item_id = %item_id, field = %field, "Stripped protected field from item update");
            }
        }
        for field in ["name", "code", "categoryId", "unit"] {
            if let Some(value) = patch.get(field) {
                let valid = value.as_str().is_some_and(|s| !s.trim().is_empty());
                if !valid {
                    return Err(LedgerError::InvalidArgument(format!("'{field}' must be a non-empty string")));
                }
            }
        }
        if patch.is_empty() {
            return Ok(());
        }

        let span = create_ledger_span("update_item", Some(item_id));
        self.retry
            .execute_with_retry("update_item", || self.attempt_update_item(item_id, &patch))
            .instrument(span)
            .await
    }

    async fn attempt_update_item(&self, item_id: &str, patch: &Map<String, Value>) -> Result<(), LedgerError> {
        let document = self
            .store
            .get(collections::INVENTORY, item_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("inventory item '{item_id}'")))?;
        let current = decode_item(&document)?;

        let mut patch = patch.clone();
        patch.insert("updatedAt".to_string(), json!(Utc::now()));

        let mut batch = WriteBatch::new().require(
            collections::INVENTORY,
            item_id,
            Precondition::Version(document.version),
        );

        let new_code = patch
            .get("code")
            .and_then(Value::as_str)
            .map(|code| code.trim().to_string());
        if let Some(new_code) = new_code.filter(|code| *code != current.code) {
            self.ensure_code_free(&new_code, Some(item_id)).await?;
            patch.insert("code".to_string(), json!(new_code));
            batch = batch
                .require(collections::INVENTORY_CODES, &new_code, Precondition::Missing)
                .delete(collections::INVENTORY_CODES, &current.code)
                .set(collections::INVENTORY_CODES, &new_code, json!({ "itemId": item_id }));
        }

        batch = batch.merge(collections::INVENTORY, item_id, Value::Object(patch));
        self.store.commit(batch).await?;
        workflow_metrics().record_ledger_commit();
        Ok(())
    }

    /// Book a stock movement and return the resulting quantity.
    pub async fn create_transaction(
        &self,
        caller: Option<&Caller>,
        input: NewTransaction,
    ) -> Result<TransactionReceipt, LedgerError> {
        let caller = require_caller(caller)?;
        require_text(&input.item_id, "itemId")?;
        if let Some(id) = &input.transaction_id {
            require_text(id, "transactionId")?;
        }

        if !input.quantity.is_finite() {
            return Err(LedgerError::InvalidArgument("quantity must be a finite number".to_string()));
        }
        match input.kind {
            TransactionType::Adjust if input.quantity < 0.0 => {
                return Err(LedgerError::InvalidArgument(
                    "ADJUST quantity is the new absolute stock and cannot be negative".to_string(),
                ));
            }
            TransactionType::In | TransactionType::Out | TransactionType::Transfer if input.quantity <= 0.0 => {
                return Err(LedgerError::InvalidArgument(format!(
                    "{} quantity must be greater than zero",
                    input.kind
                )));
            }
            _ => {}
        }
        if input.kind == TransactionType::Transfer
            && input.destination_location_id.as_deref().map_or(true, |d| d.trim().is_empty())
        {
            return Err(LedgerError::InvalidArgument(
                "TRANSFER requires 'destinationLocationId'".to_string(),
            ));
        }

        let span = create_ledger_span("create_transaction", Some(input.item_id.as_str()));
        let receipt = self
            .retry
            .execute_with_retry("create_transaction", || self.attempt_transaction(caller, &input))
            .instrument(span)
            .await?;

        info!(
            item_id = %input.item_id,
            kind = %input.kind,
            quantity = input.quantity,
            new_quantity = receipt.new_quantity,
            transaction_id = %receipt.transaction_id,
            "Inventory transaction recorded"
        );
        Ok(receipt)
    }

    async fn attempt_transaction(&self, caller: &Caller, input: &NewTransaction) -> Result<TransactionReceipt, LedgerError> {
        // Checked on every attempt: after a conflict the competing commit
        // may be the one that booked this id.
        if let Some(id) = &input.transaction_id {
            if self.store.get(collections::INVENTORY_TRANSACTIONS, id).await?.is_some() {
                return Err(LedgerError::AlreadyExists(format!("transaction '{id}' is already booked")));
            }
        }

        let document = self
            .store
            .get(collections::INVENTORY, &input.item_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("inventory item '{}'", input.item_id)))?;
        let item = decode_item(&document)?;
        let current = item.stock_quantity;

        let new_quantity = match input.kind {
            TransactionType::In => current + input.quantity,
            TransactionType::Out => {
                if input.quantity > current {
                    return Err(LedgerError::FailedPrecondition(format!(
                        "insufficient stock for '{}': requested {}, available {}",
                        item.code, input.quantity, current
                    )));
                }
                current - input.quantity
            }
            TransactionType::Adjust => input.quantity,
            TransactionType::Transfer => {
                if input.quantity > current {
                    return Err(LedgerError::FailedPrecondition(format!(
                        "insufficient stock for '{}' to transfer: requested {}, available {}",
                        item.code, input.quantity, current
                    )));
                }
                // Per-location stock is not modelled; moving only the source
                // side would break the replay invariant.
                return Err(LedgerError::FailedPrecondition(
                    "TRANSFER is not supported until destination stock is tracked per location".to_string(),
                ));
            }
        };

        let sequence = item.transaction_count + 1;
        let now = Utc::now();
        let entry = InventoryTransaction {
            id: input
                .transaction_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind: input.kind,
            item_id: item.id.clone(),
            quantity: input.quantity,
            previous_quantity: current,
            new_quantity,
            sequence,
            date: now,
            user_id: caller.user_id.clone(),
            status: TransactionStatus::Completed,
            source: Some(input.source.clone().unwrap_or_else(|| sources::MANUAL.to_string())),
            note: input.note.clone(),
            project_id: input.project_id.clone(),
            supplier_id: input.supplier_id.clone(),
            destination_location_id: input.destination_location_id.clone(),
        };

        let batch = WriteBatch::new()
            .require(collections::INVENTORY, &item.id, Precondition::Version(document.version))
            .require(collections::INVENTORY_TRANSACTIONS, &entry.id, Precondition::Missing)
            .merge(
                collections::INVENTORY,
                &item.id,
                json!({
                    "stockQuantity": new_quantity,
                    "transactionCount": sequence,
                    "updatedAt": now,
                }),
            )
            .set(collections::INVENTORY_TRANSACTIONS, &entry.id, serde_json::to_value(&entry)?);

        self.store.commit(batch).await?;
        workflow_metrics().record_ledger_commit();

        Ok(TransactionReceipt {
            transaction_id: entry.id,
            new_quantity,
        })
    }

    /// Items matching the filter, ordered by code.
    pub async fn report(&self, filter: &ReportFilter) -> Result<Vec<InventoryItem>, LedgerError> {
        let mut filters = Vec::new();
        if let Some(category) = &filter.category_id {
            filters.push(Filter::eq("categoryId", category.as_str()));
        }
        if let Some(location) = &filter.location_id {
            filters.push(Filter::eq("locationId", location.as_str()));
        }

        let mut items = self
            .store
            .query(collections::INVENTORY, &filters)
            .await?
            .iter()
            .map(decode_item)
            .collect::<Result<Vec<_>, _>>()?;

        if filter.below_minimum {
            items.retain(InventoryItem::is_below_minimum);
        }
        items.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(items)
    }

    pub async fn get_item(&self, item_id: &str) -> Result<InventoryItem, LedgerError> {
        let document = self
            .store
            .get(collections::INVENTORY, item_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("inventory item '{item_id}'")))?;
        decode_item(&document)
    }

    /// Resolve a material to an item: by code first, then by exact name.
    pub async fn find_item(&self, code: Option<&str>, name: &str) -> Result<Option<InventoryItem>, LedgerError> {
        if let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) {
            let by_code = self
                .store
                .query(collections::INVENTORY, &[Filter::eq("code", code)])
                .await?;
            if let Some(document) = by_code.first() {
                return Ok(Some(decode_item(document)?));
            }
        }

        if name.trim().is_empty() {
            return Ok(None);
        }
        let by_name = self
            .store
            .query(collections::INVENTORY, &[Filter::eq("name", name)])
            .await?;
        by_name.first().map(decode_item).transpose()
    }

    /// Ledger entries matching all filters, in booking order.
    pub async fn transactions(&self, filters: &[Filter]) -> Result<Vec<InventoryTransaction>, LedgerError> {
        let mut entries = self
            .store
            .query(collections::INVENTORY_TRANSACTIONS, filters)
            .await?
            .iter()
            .map(|doc| doc.decode::<InventoryTransaction>())
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| (a.item_id.as_str(), a.sequence).cmp(&(b.item_id.as_str(), b.sequence)));
        Ok(entries)
    }

    pub async fn transactions_for_item(&self, item_id: &str) -> Result<Vec<InventoryTransaction>, LedgerError> {
        self.transactions(&[Filter::eq("itemId", item_id)]).await
    }

    /// Compare an item's recorded stock with the replay of its log.
    pub async fn verify_item(&self, item_id: &str) -> Result<ReplayCheck, LedgerError> {
        let item = self.get_item(item_id).await?;
        let log = self.transactions_for_item(item_id).await?;
        Ok(ReplayCheck {
            item_id: item.id,
            recorded: item.stock_quantity,
            replayed: replay(&log),
            entries: log.len(),
        })
    }
}
