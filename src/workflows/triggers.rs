//! Trigger catalogue.
//!
//! Every trigger is a pure predicate over `(before, after)`. Transitions are
//! edge-triggered: "enters completed" means completed in `after` and not
//! completed in `before`, so re-saving an already completed project fires
//! nothing.

use serde::Serialize;
use std::fmt;

use super::snapshot::{ProjectSnapshot, StageStatus, WorkStatus};
use crate::directory::roles;

pub mod task_keys {
    pub const MATERIAL_SEPARATION: &str = "material_separation";
    pub const PURCHASING: &str = "purchasing";
    pub const MATERIAL_CUTTING: &str = "material_cutting";
    pub const ASSEMBLY: &str = "assembly";
    pub const PAINTING: &str = "painting";
    pub const SHIPPING: &str = "shipping";
}

pub mod process_keys {
    pub const MATERIAL_SEPARATION: &str = "material_separation";
    pub const QUOTATION: &str = "quotation";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    ProjectCreated,
    QuotationCascade,
    PurchasingStarted,
    CuttingStarted,
    CuttingCompleted,
    FinishingCompleted,
    ProjectCompleted,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::ProjectCreated => "project_created",
            TriggerKind::QuotationCascade => "quotation_cascade",
            TriggerKind::PurchasingStarted => "purchasing_started",
            TriggerKind::CuttingStarted => "cutting_started",
            TriggerKind::CuttingCompleted => "cutting_completed",
            TriggerKind::FinishingCompleted => "finishing_completed",
            TriggerKind::ProjectCompleted => "project_completed",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an assignee is written on the project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentTarget {
    Task(&'static str),
    Stage(String),
}

impl fmt::Display for AssignmentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentTarget::Task(key) => write!(f, "tasks.{key}"),
            AssignmentTarget::Stage(id) => write!(f, "workflowStages[{id}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    /// Only the user picked as assignee.
    Assignee,
    /// Every holder of these roles.
    Roles(Vec<&'static str>),
}

/// A trigger that fired, before any role has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTrigger {
    pub kind: TriggerKind,
    /// Role the single assignee is picked from.
    pub assignee_role: Option<&'static str>,
    pub targets: Vec<AssignmentTarget>,
    pub recipients: Option<Recipients>,
    pub title: String,
    pub body: String,
}

impl FiredTrigger {
    fn assign(kind: TriggerKind, role: &'static str, targets: Vec<AssignmentTarget>, recipients: Recipients) -> Self {
        Self {
            kind,
            assignee_role: Some(role),
            targets,
            recipients: Some(recipients),
            title: String::new(),
            body: String::new(),
        }
    }

    fn message(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.title = title.into();
        self.body = body.into();
        self
    }
}

fn status_entered(before: Option<&ProjectSnapshot>, after: &ProjectSnapshot, target: &WorkStatus) -> bool {
    let was = before.and_then(|b| b.status.as_ref());
    after.status.as_ref() == Some(target) && was != Some(target)
}

fn task_completed(snapshot: Option<&ProjectSnapshot>, key: &str) -> bool {
    snapshot
        .and_then(|s| s.task(key))
        .is_some_and(|task| task.is_completed())
}

/// `tasks.{key}.status` moved into completed.
pub fn task_entered_completed(before: Option<&ProjectSnapshot>, after: &ProjectSnapshot, key: &str) -> bool {
    task_completed(Some(after), key) && !task_completed(before, key)
}

fn project_label(after: &ProjectSnapshot) -> &str {
    if after.name.trim().is_empty() {
        "(unnamed project)"
    } else {
        &after.name
    }
}

/// All triggers fired by one change, in catalogue order.
pub fn evaluate(before: Option<&ProjectSnapshot>, after: &ProjectSnapshot) -> Vec<FiredTrigger> {
    let name = project_label(after);
    let mut fired = Vec::new();

    if before.is_none() {
        fired.push(
            FiredTrigger::assign(
                TriggerKind::ProjectCreated,
                roles::ENGINEER,
                vec![AssignmentTarget::Task(task_keys::MATERIAL_SEPARATION)],
                Recipients::Assignee,
            )
            .message("New project", format!("You have been assigned material separation for project {name}")),
        );
    }

    fired.extend(quotation_cascade(before, after, name));

    let started = before.and_then(|b| b.status.as_ref()) == Some(&WorkStatus::Pending)
        && after.status.as_ref() == Some(&WorkStatus::InProgress);
    if started {
        fired.push(
            FiredTrigger::assign(
                TriggerKind::PurchasingStarted,
                roles::SALES,
                vec![AssignmentTarget::Task(task_keys::PURCHASING)],
                Recipients::Roles(vec![roles::SALES]),
            )
            .message("Purchasing started", format!("Project {name} is in progress: purchasing can begin")),
        );
        fired.push(
            FiredTrigger::assign(
                TriggerKind::CuttingStarted,
                roles::CUTTING_ENGINEER,
                vec![AssignmentTarget::Task(task_keys::MATERIAL_CUTTING)],
                Recipients::Roles(vec![roles::CUTTING_ENGINEER]),
            )
            .message("Material cutting", format!("Project {name} is in progress: material cutting can begin")),
        );
    }

    if task_entered_completed(before, after, task_keys::MATERIAL_CUTTING) {
        fired.push(
            FiredTrigger::assign(
                TriggerKind::CuttingCompleted,
                roles::DEPUTY_DIRECTOR,
                vec![
                    AssignmentTarget::Task(task_keys::ASSEMBLY),
                    AssignmentTarget::Task(task_keys::PAINTING),
                ],
                Recipients::Roles(vec![roles::DEPUTY_DIRECTOR]),
            )
            .message("Cutting completed", format!("Material cutting for project {name} is done: assembly and painting are ready")),
        );
    }

    let finished_now = task_completed(Some(after), task_keys::ASSEMBLY) && task_completed(Some(after), task_keys::PAINTING);
    let finished_before = task_completed(before, task_keys::ASSEMBLY) && task_completed(before, task_keys::PAINTING);
    if finished_now && !finished_before {
        fired.push(
            FiredTrigger::assign(
                TriggerKind::FinishingCompleted,
                roles::ACCOUNTANT,
                vec![AssignmentTarget::Task(task_keys::SHIPPING)],
                Recipients::Roles(vec![roles::ACCOUNTANT, roles::DEPUTY_DIRECTOR]),
            )
            .message("Ready for shipping", format!("Assembly and painting for project {name} are done: shipping can be arranged")),
        );
    }

    if status_entered(before, after, &WorkStatus::Completed) {
        fired.push(FiredTrigger {
            kind: TriggerKind::ProjectCompleted,
            assignee_role: None,
            targets: Vec::new(),
            recipients: None,
            title: String::new(),
            body: String::new(),
        });
    }

    fired
}

fn quotation_cascade(before: Option<&ProjectSnapshot>, after: &ProjectSnapshot, name: &str) -> Vec<FiredTrigger> {
    let mut fired = Vec::new();
    for stage in after.workflow_stages.ordered() {
        if stage.process_key != process_keys::MATERIAL_SEPARATION || stage.status != StageStatus::Completed {
            continue;
        }
        let was_completed = before
            .and_then(|b| b.workflow_stages.get(&stage.stage_id))
            .is_some_and(|prior| prior.status == StageStatus::Completed);
        if was_completed {
            continue;
        }

        let Some(next) = after.workflow_stages.next_after(stage.order) else {
            continue;
        };
        if next.process_key != process_keys::QUOTATION || !next.status.can_assign() {
            continue;
        }
        fired.push(
            FiredTrigger::assign(
                TriggerKind::QuotationCascade,
                roles::SALES,
                vec![AssignmentTarget::Stage(next.stage_id.clone())],
                Recipients::Roles(vec![roles::SALES, roles::DIRECTOR]),
            )
            .message("Quotation needed", format!("Material separation for project {name} is done: prepare the quotation")),
        );
    }
    fired
}

/// Task keys in `after` whose content differs from `before` (absent counts
/// as different).
pub fn changed_tasks<'a>(before: Option<&ProjectSnapshot>, after: &'a ProjectSnapshot) -> Vec<&'a str> {
    after
        .tasks
        .iter()
        .filter(|(key, task)| before.and_then(|b| b.task(key)) != Some(*task))
        .map(|(key, _)| key.as_str())
        .collect()
}
