use thiserror::Error;

use crate::observability::WorkflowMetrics;
use crate::retry::Retryable;
use crate::store::StoreError;

/// Caller-facing failure categories of the ledger API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthenticated,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Internal,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Unauthenticated: a caller identity is required")]
    Unauthenticated,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Store(StoreError::from(e))
    }
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Unauthenticated => ErrorKind::Unauthenticated,
            LedgerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            LedgerError::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            LedgerError::Internal(_) | LedgerError::Store(_) => ErrorKind::Internal,
        }
    }
}

impl Retryable for LedgerError {
    fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Store(e) if e.is_conflict())
    }

    fn exhausted(operation: &str, attempts: u32) -> Self {
        LedgerError::Internal(format!(
            "{operation} gave up after {attempts} attempts due to concurrent writes"
        ))
    }

    fn record_conflict(metrics: &WorkflowMetrics) {
        metrics.record_ledger_conflict();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflicts_are_retryable_internal_errors() {
        let conflict = LedgerError::from(StoreError::Conflict {
            collection: "inventory".to_string(),
            id: "i1".to_string(),
        });
        assert!(conflict.is_retryable());
        assert_eq!(conflict.kind(), ErrorKind::Internal);

        let backend = LedgerError::from(StoreError::Backend("disk full".to_string()));
        assert!(!backend.is_retryable());

        assert!(!LedgerError::FailedPrecondition("x".to_string()).is_retryable());
    }

    #[test]
    fn test_exhausted_maps_to_internal() {
        let err = LedgerError::exhausted("create_transaction", 5);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("5 attempts"));
    }

    #[test]
    fn test_conflicts_count_as_ledger_conflicts() {
        let metrics = WorkflowMetrics::new();
        LedgerError::record_conflict(&metrics);
        let stats = metrics.get_stats();
        assert_eq!(stats.ledger_conflicts, 1);
        assert_eq!(stats.workflow_conflicts, 0);
    }
}
