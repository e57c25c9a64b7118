use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

use super::report::{ApplyReport, Outcome, SideEffect, SideEffectKind};
use super::snapshot::{ChangeKind, ProjectChange, ProjectChangeEvent, ProjectSnapshot, StageIndex};
use super::triggers::{changed_tasks, evaluate, AssignmentTarget, FiredTrigger, Recipients, TriggerKind};
use super::WorkflowError;
use crate::directory::{resolve_one, DirectoryError, RoleResolver, UserRef};
use crate::inventory::CompletionDeduction;
use crate::notify::NotificationDispatcher;
use crate::observability::{workflow_metrics, OperationTimer};
use crate::retry::RetryPolicy;
use crate::store::{collections, Precondition, RecordStore, StoreError, WriteBatch};
use crate::tasks::TaskDenormalizer;
use crate::telemetry::{create_workflow_span, generate_correlation_id};

/// A fired trigger with its people attached.
#[derive(Debug, Clone)]
struct ResolvedTrigger {
    trigger: FiredTrigger,
    assignee: Option<UserRef>,
    recipients: Vec<UserRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateOutcome {
    Applied,
    AlreadyApplied,
}

/// Reacts to project change events.
///
/// Side effects of one event are isolated from each other: a failed role
/// resolution drops only its trigger, and the project update, notifications,
/// denormalizations and stock deduction each land in the [`ApplyReport`]
/// with their own outcome.
pub struct WorkflowEngine {
    store: Arc<dyn RecordStore>,
    resolver: Arc<dyn RoleResolver>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    denormalizer: Arc<TaskDenormalizer>,
    deduction: Option<Arc<CompletionDeduction>>,
    retry: RetryPolicy,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: Arc<dyn RoleResolver>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        denormalizer: Arc<TaskDenormalizer>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            resolver,
            dispatcher,
            denormalizer,
            deduction: None,
            retry,
        }
    }

    pub fn with_deduction(mut self, deduction: Arc<CompletionDeduction>) -> Self {
        self.deduction = Some(deduction);
        self
    }

    /// Handle one change event. Only a malformed event is an error; every
    /// downstream failure is reported in the returned [`ApplyReport`].
    pub async fn handle(&self, event: ProjectChangeEvent) -> Result<ApplyReport, WorkflowError> {
        let change = ProjectChange::try_from(event)?;
        let correlation_id = generate_correlation_id();
        let span = create_workflow_span("project_change", &change.project_id, &correlation_id);
        Ok(self.apply(change).instrument(span).await)
    }

    async fn apply(&self, change: ProjectChange) -> ApplyReport {
        let timer = OperationTimer::new("project_change");
        workflow_metrics().record_event();
        let mut report = ApplyReport::new(&change.project_id, change.event_id.as_deref());

        match &change.kind {
            ChangeKind::Deleted { .. } => self.cleanup(&change.project_id, &mut report).await,
            ChangeKind::Created { after } => self.react(&change, None, after, &mut report).await,
            ChangeKind::Updated { before, after } => self.react(&change, Some(before), after, &mut report).await,
        }

        let failures = report.failures().count();
        if failures > 0 {
            warn!(
                project_id = %change.project_id,
                failures,
                effects = report.effects.len(),
                "Project change handled with failures"
            );
        } else {
            info!(
                project_id = %change.project_id,
                triggers = report.triggers.len(),
                effects = report.effects.len(),
                "Project change handled"
            );
        }
        timer.finish();
        report
    }

    async fn cleanup(&self, project_id: &str, report: &mut ApplyReport) {
        let outcome = match self.denormalizer.delete_for_project(project_id).await {
            Ok(removed) => {
                debug!(project_id = %project_id, removed, "Task cleanup finished");
                Outcome::Ok
            }
            Err(e) => {
                error!(project_id = %project_id, error = %e, "Task cleanup failed");
                Outcome::Failed(e.to_string())
            }
        };
        report.record(SideEffectKind::TaskCleanup, project_id, outcome);
    }

    async fn react(
        &self,
        change: &ProjectChange,
        before: Option<&ProjectSnapshot>,
        after: &ProjectSnapshot,
        report: &mut ApplyReport,
    ) {
        let project_id = change.project_id.as_str();

        // Only the engine writes workflowUpdatedAt, so a new stamp in
        // `after` means this event is our echo. A stamp that disappeared
        // came from someone overwriting the document.
        let self_originated = after.workflow_updated_at.is_some()
            && before.is_some_and(|b| b.workflow_updated_at != after.workflow_updated_at);
        report.self_originated = self_originated;

        let fired = if self_originated {
            workflow_metrics().record_self_write_skipped();
            debug!(project_id = %project_id, "Self-originated write, skipping triggers");
            Vec::new()
        } else {
            evaluate(before, after)
        };
        report.triggers = fired.iter().map(|t| t.kind).collect();

        let resolutions = join_all(fired.into_iter().map(|trigger| async move {
            let kind = trigger.kind;
            (kind, self.resolve_trigger(trigger).await)
        }))
        .await;

        let mut resolved = Vec::new();
        for (kind, result) in resolutions {
            match result {
                Ok(trigger) => {
                    workflow_metrics().record_trigger_fired();
                    resolved.push(trigger);
                }
                Err(e) => {
                    workflow_metrics().record_trigger_failure();
                    warn!(project_id = %project_id, trigger = %kind, error = %e, "Role resolution failed, dropping trigger");
                    report.record(SideEffectKind::RoleResolution, kind.as_str(), Outcome::Failed(e.to_string()));
                }
            }
        }

        let mut assignments = Vec::new();
        for trigger in &resolved {
            if let Some(user) = &trigger.assignee {
                for target in &trigger.trigger.targets {
                    assignments.push((target.clone(), user.id.clone()));
                }
            }
        }

        let mut already_applied = false;
        if !assignments.is_empty() {
            let outcome = match self
                .update_project(project_id, change.event_id.as_deref(), &assignments, &report.triggers)
                .await
            {
                Ok(UpdateOutcome::Applied) => Outcome::Ok,
                Ok(UpdateOutcome::AlreadyApplied) => {
                    already_applied = true;
                    info!(project_id = %project_id, event_id = ?change.event_id, "Event already applied, suppressing notifications");
                    Outcome::Skipped("event already applied".to_string())
                }
                Err(e) => {
                    error!(project_id = %project_id, error = %e, "Merged project update failed");
                    Outcome::Failed(e.to_string())
                }
            };
            report.record(SideEffectKind::ProjectUpdate, project_id, outcome);
        }

        let completed = resolved.iter().any(|t| t.trigger.kind == TriggerKind::ProjectCompleted);

        let notifications = async {
            let pending = resolved.iter().filter(|t| t.trigger.recipients.is_some());
            if already_applied {
                pending
                    .map(|t| SideEffect {
                        kind: SideEffectKind::Notification,
                        target: t.trigger.kind.as_str().to_string(),
                        outcome: Outcome::Skipped("event already applied".to_string()),
                    })
                    .collect::<Vec<_>>()
            } else {
                join_all(pending.map(|t| self.notify(t))).await
            }
        };
        let denormalizations = join_all(
            changed_tasks(before, after)
                .into_iter()
                .map(|key| self.denormalize(project_id, after, key)),
        );
        let deduction = async {
            if completed {
                Some(self.deduct(project_id, &after.name).await)
            } else {
                None
            }
        };

        let (notified, denormalized, deducted) = tokio::join!(notifications, denormalizations, deduction);
        report.effects.extend(notified);
        report.effects.extend(denormalized);
        report.effects.extend(deducted);
    }

    async fn resolve_trigger(&self, trigger: FiredTrigger) -> Result<ResolvedTrigger, DirectoryError> {
        let assignee = match trigger.assignee_role {
            Some(role) => Some(resolve_one(self.resolver.as_ref(), role).await?),
            None => None,
        };

        let recipients = match &trigger.recipients {
            None => Vec::new(),
            Some(Recipients::Assignee) => assignee.iter().cloned().collect(),
            Some(Recipients::Roles(roles)) => {
                let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
                self.resolver.resolve(&roles).await?
            }
        };

        Ok(ResolvedTrigger {
            trigger,
            assignee,
            recipients,
        })
    }

    async fn update_project(
        &self,
        project_id: &str,
        event_id: Option<&str>,
        assignments: &[(AssignmentTarget, String)],
        triggers: &[TriggerKind],
    ) -> Result<UpdateOutcome, WorkflowError> {
        self.retry
            .execute_with_retry("project_update", || {
                self.attempt_project_update(project_id, event_id, assignments, triggers)
            })
            .await
    }

    /// Read the current project, apply every assignment, stamp it, and
    /// commit together with the processed-event marker.
    async fn attempt_project_update(
        &self,
        project_id: &str,
        event_id: Option<&str>,
        assignments: &[(AssignmentTarget, String)],
        triggers: &[TriggerKind],
    ) -> Result<UpdateOutcome, WorkflowError> {
        if let Some(event_id) = event_id {
            if self.store.get(collections::WORKFLOW_EVENTS, event_id).await?.is_some() {
                return Ok(UpdateOutcome::AlreadyApplied);
            }
        }

        let document = self
            .store
            .get(collections::PROJECTS, project_id)
            .await?
            .ok_or_else(|| WorkflowError::ProjectMissing(project_id.to_string()))?;

        let touches_stages = assignments
            .iter()
            .any(|(target, _)| matches!(target, AssignmentTarget::Stage(_)));
        let mut stages = if touches_stages {
            let raw = document.data.get("workflowStages").cloned().unwrap_or(Value::Array(Vec::new()));
            Some(serde_json::from_value::<StageIndex>(raw).map_err(StoreError::from)?)
        } else {
            None
        };

        let mut tasks = Map::new();
        for (target, user_id) in assignments {
            match target {
                AssignmentTarget::Task(key) => {
                    tasks.insert(key.to_string(), json!({ "assignedTo": user_id }));
                }
                AssignmentTarget::Stage(stage_id) => {
                    let assigned = stages.as_mut().is_some_and(|index| index.assign(stage_id, user_id));
                    if !assigned {
                        warn!(project_id = %project_id, stage_id = %stage_id, "Stage not assignable in current project, skipping");
                    }
                }
            }
        }

        let stamp = Utc::now().to_rfc3339();
        let mut patch = Map::new();
        patch.insert("workflowUpdatedAt".to_string(), json!(stamp));
        if !tasks.is_empty() {
            patch.insert("tasks".to_string(), Value::Object(tasks));
        }
        if let Some(index) = &stages {
            patch.insert("workflowStages".to_string(), serde_json::to_value(index).map_err(StoreError::from)?);
        }

        let mut batch = WriteBatch::new()
            .require(collections::PROJECTS, project_id, Precondition::Version(document.version))
            .merge(collections::PROJECTS, project_id, Value::Object(patch));
        if let Some(event_id) = event_id {
            batch = batch
                .require(collections::WORKFLOW_EVENTS, event_id, Precondition::Missing)
                .set(
                    collections::WORKFLOW_EVENTS,
                    event_id,
                    json!({ "projectId": project_id, "triggers": triggers, "processedAt": stamp }),
                );
        }

        self.store.commit(batch).await?;
        debug!(project_id = %project_id, assignments = assignments.len(), "Merged project update committed");
        Ok(UpdateOutcome::Applied)
    }

    async fn notify(&self, trigger: &ResolvedTrigger) -> SideEffect {
        let target = trigger.trigger.kind.as_str().to_string();
        let outcome = match self
            .dispatcher
            .send(&trigger.recipients, &trigger.trigger.title, &trigger.trigger.body)
            .await
        {
            Ok(dispatch) if dispatch.attempted == 0 => Outcome::Skipped("no recipient with a push token".to_string()),
            Ok(dispatch) => {
                debug!(trigger = %target, delivered = dispatch.delivered, failed = dispatch.failed, "Notification batch sent");
                Outcome::Ok
            }
            Err(e) => {
                warn!(trigger = %target, error = %e, "Notification batch failed");
                Outcome::Failed(e.to_string())
            }
        };
        SideEffect {
            kind: SideEffectKind::Notification,
            target,
            outcome,
        }
    }

    async fn denormalize(&self, project_id: &str, after: &ProjectSnapshot, key: &str) -> SideEffect {
        let outcome = match after.task(key) {
            Some(task) => match self
                .denormalizer
                .denormalize(project_id, &after.name, after.status.as_ref(), key, task)
                .await
            {
                Ok(_) => Outcome::Ok,
                Err(e) => {
                    warn!(project_id = %project_id, task_key = %key, error = %e, "Task denormalization failed");
                    Outcome::Failed(e.to_string())
                }
            },
            None => Outcome::Skipped("task not present".to_string()),
        };
        SideEffect {
            kind: SideEffectKind::Denormalization,
            target: key.to_string(),
            outcome,
        }
    }

    async fn deduct(&self, project_id: &str, project_name: &str) -> SideEffect {
        let outcome = match &self.deduction {
            None => Outcome::Skipped("stock deduction not configured".to_string()),
            Some(deduction) => match deduction.run(project_id, project_name).await {
                Ok(run) if run.failures() == 0 => Outcome::Ok,
                Ok(run) => Outcome::Failed(format!(
                    "{} of {} material lines failed",
                    run.failures(),
                    run.lines.len()
                )),
                Err(e) => {
                    error!(project_id = %project_id, error = %e, "Completion deduction failed");
                    Outcome::Failed(e.to_string())
                }
            },
        };
        SideEffect {
            kind: SideEffectKind::Deduction,
            target: project_id.to_string(),
            outcome,
        }
    }
}
