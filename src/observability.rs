use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Process-wide counters for the workflow engine and the ledger
#[derive(Debug, Default)]
pub struct WorkflowMetrics {
    pub events_handled: AtomicU64,
    pub self_writes_skipped: AtomicU64,
    pub triggers_fired: AtomicU64,
    pub trigger_failures: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notification_failures: AtomicU64,
    pub denormalizations: AtomicU64,
    pub ledger_commits: AtomicU64,
    pub ledger_conflicts: AtomicU64,
    pub workflow_conflicts: AtomicU64,
}

impl WorkflowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self) {
        self.events_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_self_write_skipped(&self) {
        self.self_writes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trigger_fired(&self) {
        self.triggers_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trigger_failure(&self) {
        self.trigger_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failure(&self) {
        self.notification_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denormalization(&self) {
        self.denormalizations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ledger_commit(&self) {
        self.ledger_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ledger_conflict(&self) {
        self.ledger_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_workflow_conflict(&self) {
        self.workflow_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> WorkflowStats {
        WorkflowStats {
            events_handled: self.events_handled.load(Ordering::Relaxed),
            self_writes_skipped: self.self_writes_skipped.load(Ordering::Relaxed),
            triggers_fired: self.triggers_fired.load(Ordering::Relaxed),
            trigger_failures: self.trigger_failures.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
            denormalizations: self.denormalizations.load(Ordering::Relaxed),
            ledger_commits: self.ledger_commits.load(Ordering::Relaxed),
            ledger_conflicts: self.ledger_conflicts.load(Ordering::Relaxed),
            workflow_conflicts: self.workflow_conflicts.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Workflow metrics: events={}, self_writes_skipped={}, triggers={}, trigger_failures={}, notifications={}, notification_failures={}, denormalizations={}, ledger_commits={}, ledger_conflicts={}, workflow_conflicts={}",
            stats.events_handled,
            stats.self_writes_skipped,
            stats.triggers_fired,
            stats.trigger_failures,
            stats.notifications_sent,
            stats.notification_failures,
            stats.denormalizations,
            stats.ledger_commits,
            stats.ledger_conflicts,
            stats.workflow_conflicts
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStats {
    pub events_handled: u64,
    pub self_writes_skipped: u64,
    pub triggers_fired: u64,
    pub trigger_failures: u64,
    pub notifications_sent: u64,
    pub notification_failures: u64,
    pub denormalizations: u64,
    pub ledger_commits: u64,
    pub ledger_conflicts: u64,
    pub workflow_conflicts: u64,
}

/// Global metrics instance
static WORKFLOW_METRICS: std::sync::LazyLock<WorkflowMetrics> =
    std::sync::LazyLock::new(WorkflowMetrics::new);

pub fn workflow_metrics() -> &'static WorkflowMetrics {
    &WORKFLOW_METRICS
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
