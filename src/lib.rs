// erp-flow Library - Project workflow orchestration and inventory ledger
// This exposes the core components for testing and integration

pub mod config;
pub mod directory;
pub mod inventory;
pub mod notify;
pub mod observability;
pub mod retry;
pub mod services;
pub mod store;
pub mod tasks;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use config::{config, ErpFlowConfig};
pub use directory::{CachedUserLookup, RoleResolver, StoreRoleResolver, UserLookup, UserRef};
pub use inventory::{
    Caller, CompletionDeduction, ErrorKind, InventoryItem, InventoryLedger, InventoryTransaction, LedgerError,
    NewItem, NewTransaction, ReceiptProcessor, ReportFilter, TransactionReceipt, TransactionType,
};
pub use notify::{DispatchReport, LoggingTransport, NotificationDispatcher, NotifyError, PushDispatcher, PushTransport};
pub use observability::{workflow_metrics, OperationTimer, WorkflowMetrics};
pub use retry::{RetryConfig, RetryPolicy};
pub use services::Services;
pub use store::{MemoryStore, RecordStore, StoreError};
#[cfg(feature = "database")]
pub use store::SqliteStore;
pub use tasks::TaskDenormalizer;
pub use telemetry::{generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use workflows::{ApplyReport, ProjectChangeEvent, WorkflowEngine, WorkflowError};
