//! Component wiring.
//!
//! Everything receives the same `Arc<dyn RecordStore>`; nothing reaches for
//! a global store handle.

use std::sync::Arc;

use crate::config::ErpFlowConfig;
use crate::directory::{CachedUserLookup, StoreRoleResolver};
use crate::inventory::{CompletionDeduction, InventoryLedger, ReceiptProcessor, StoreQuotationSource};
use crate::notify::{LoggingTransport, NotificationDispatcher, PushDispatcher};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::store::RecordStore;
use crate::tasks::TaskDenormalizer;
use crate::workflows::WorkflowEngine;

pub struct Services {
    pub store: Arc<dyn RecordStore>,
    pub ledger: Arc<InventoryLedger>,
    pub receipts: ReceiptProcessor,
    pub engine: WorkflowEngine,
}

impl Services {
    /// Wire every component with push delivery going to the log.
    pub fn new(store: Arc<dyn RecordStore>, config: &ErpFlowConfig) -> Self {
        let dispatcher = Arc::new(PushDispatcher::new(LoggingTransport, &config.notifications));
        Self::with_dispatcher(store, config, dispatcher)
    }

    pub fn with_dispatcher(
        store: Arc<dyn RecordStore>,
        config: &ErpFlowConfig,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let retry = RetryPolicy::new(RetryConfig::from(&config.ledger));

        let ledger = Arc::new(InventoryLedger::new(Arc::clone(&store), retry.clone()));
        let deduction = Arc::new(CompletionDeduction::new(
            Arc::clone(&ledger),
            Arc::new(StoreQuotationSource::new(Arc::clone(&store))),
            &config.ledger.system_user_id,
        ));

        let resolver = Arc::new(StoreRoleResolver::new(Arc::clone(&store), &config.directory));
        let users = Arc::new(CachedUserLookup::new(Arc::clone(&store), &config.directory));
        let denormalizer = Arc::new(TaskDenormalizer::new(Arc::clone(&store), users));

        let engine = WorkflowEngine::new(Arc::clone(&store), resolver, dispatcher, denormalizer, retry)
            .with_deduction(deduction);

        Self {
            receipts: ReceiptProcessor::new(Arc::clone(&ledger)),
            store,
            ledger,
            engine,
        }
    }
}
