//! Reactive project workflow
//!
//! A project change event is validated into typed snapshots, diffed against
//! the trigger catalogue, and applied: role assignments are merged into one
//! project update, notifications and task denormalizations fan out, and a
//! completed project hands over to stock deduction.

pub mod engine;
pub mod report;
pub mod snapshot;
pub mod triggers;

pub use engine::WorkflowEngine;
pub use report::{ApplyReport, Outcome, SideEffect, SideEffectKind};
pub use snapshot::{
    ChangeKind, ProjectChange, ProjectChangeEvent, ProjectSnapshot, ProjectStatus, Stage, StageIndex, StageStatus,
    TaskState, TaskStatus, WorkStatus,
};
pub use triggers::{evaluate, AssignmentTarget, FiredTrigger, Recipients, TriggerKind};

use thiserror::Error;

use crate::observability::WorkflowMetrics;
use crate::retry::Retryable;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Invalid change event: {0}")]
    InvalidEvent(String),

    #[error("Project {0} no longer exists")]
    ProjectMissing(String),

    #[error("Project store error: {0}")]
    Store(#[from] StoreError),

    #[error("{operation} gave up after {attempts} attempts due to concurrent writes")]
    Contention { operation: String, attempts: u32 },
}

impl Retryable for WorkflowError {
    fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Store(e) if e.is_conflict())
    }

    fn exhausted(operation: &str, attempts: u32) -> Self {
        WorkflowError::Contention {
            operation: operation.to_string(),
            attempts,
        }
    }

    fn record_conflict(metrics: &WorkflowMetrics) {
        metrics.record_workflow_conflict();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_update_conflicts_stay_out_of_ledger_counter() {
        let conflict = WorkflowError::from(StoreError::Conflict {
            collection: "projects".to_string(),
            id: "p1".to_string(),
        });
        assert!(conflict.is_retryable());

        let metrics = WorkflowMetrics::new();
        WorkflowError::record_conflict(&metrics);
        let stats = metrics.get_stats();
        assert_eq!(stats.workflow_conflicts, 1);
        assert_eq!(stats.ledger_conflicts, 0);
    }
}
