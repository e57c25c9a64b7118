//! Inventory ledger
//!
//! Items carry a stock level that only changes through ledger transactions.
//! Every movement is written together with the stock update in one atomic
//! commit, so replaying an item's log from zero always reproduces its
//! recorded stock.

pub mod deduction;
pub mod errors;
pub mod ledger;
pub mod receipts;
pub mod types;

pub use deduction::{
    CompletionDeduction, DeductionLine, DeductionOutcome, DeductionReport, MaterialLine, Quotation, QuotationSource,
    StoreQuotationSource,
};
pub use errors::{ErrorKind, LedgerError};
pub use ledger::InventoryLedger;
pub use receipts::{LineOutcome, Receipt, ReceiptLine, ReceiptLineResult, ReceiptProcessor};
pub use types::{
    replay, sources, Caller, InventoryItem, InventoryTransaction, NewItem, NewTransaction, ReplayCheck, ReportFilter,
    TransactionReceipt, TransactionStatus, TransactionType,
};
