//! Typed project snapshots and change-event ingestion.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::WorkflowError;

/// Lifecycle status shared by projects and their embedded tasks. Unknown
/// values are kept verbatim so they survive a read/write round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Other(String),
}

pub type ProjectStatus = WorkStatus;
pub type TaskStatus = WorkStatus;

impl WorkStatus {
    pub fn as_str(&self) -> &str {
        match self {
            WorkStatus::Pending => "pending",
            WorkStatus::InProgress => "in-progress",
            WorkStatus::Completed => "completed",
            WorkStatus::Cancelled => "cancelled",
            WorkStatus::Other(other) => other,
        }
    }
}

impl From<String> for WorkStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => WorkStatus::Pending,
            "in-progress" => WorkStatus::InProgress,
            "completed" => WorkStatus::Completed,
            "cancelled" => WorkStatus::Cancelled,
            _ => WorkStatus::Other(value),
        }
    }
}

impl From<WorkStatus> for String {
    fn from(value: WorkStatus) -> Self {
        match value {
            WorkStatus::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage lifecycle: `pending -> assigned -> completed`, with `cancelled`
/// absorbing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StageStatus {
    #[default]
    Pending,
    Assigned,
    Completed,
    Cancelled,
    Other(String),
}

impl StageStatus {
    pub fn as_str(&self) -> &str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Assigned => "assigned",
            StageStatus::Completed => "completed",
            StageStatus::Cancelled => "cancelled",
            StageStatus::Other(other) => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Cancelled)
    }

    pub fn can_assign(&self) -> bool {
        matches!(self, StageStatus::Pending | StageStatus::Assigned)
    }
}

impl From<String> for StageStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => StageStatus::Pending,
            "assigned" => StageStatus::Assigned,
            "completed" => StageStatus::Completed,
            "cancelled" => StageStatus::Cancelled,
            _ => StageStatus::Other(value),
        }
    }
}

impl From<StageStatus> for String {
    fn from(value: StageStatus) -> Self {
        match value {
            StageStatus::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

/// One task embedded in a project. Fields the workflow does not interpret
/// are carried in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskState {
    pub fn is_completed(&self) -> bool {
        self.status == Some(WorkStatus::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub stage_id: String,
    #[serde(default)]
    pub process_key: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub status: StageStatus,
    #[serde(default)]
    pub assigned_to_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Workflow stages keyed by `stageId`. Serializes as the list ordered by
/// `order`, ties broken by `stageId`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Stage>", into = "Vec<Stage>")]
pub struct StageIndex {
    stages: HashMap<String, Stage>,
}

impl TryFrom<Vec<Stage>> for StageIndex {
    type Error = String;

    /// Rejects a repeated `stageId`; writing the index back would otherwise
    /// drop all but one of them.
    fn try_from(list: Vec<Stage>) -> Result<Self, Self::Error> {
        let mut stages = HashMap::with_capacity(list.len());
        for stage in list {
            if let Some(previous) = stages.insert(stage.stage_id.clone(), stage) {
                return Err(format!("duplicate stageId '{}'", previous.stage_id));
            }
        }
        Ok(Self { stages })
    }
}

impl From<StageIndex> for Vec<Stage> {
    fn from(index: StageIndex) -> Self {
        let mut list: Vec<Stage> = index.stages.into_values().collect();
        list.sort_by(|a, b| (a.order, &a.stage_id).cmp(&(b.order, &b.stage_id)));
        list
    }
}

impl StageIndex {
    pub fn get(&self, stage_id: &str) -> Option<&Stage> {
        self.stages.get(stage_id)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn ordered(&self) -> Vec<&Stage> {
        let mut list: Vec<&Stage> = self.stages.values().collect();
        list.sort_by(|a, b| (a.order, &a.stage_id).cmp(&(b.order, &b.stage_id)));
        list
    }

    /// The stage with the smallest `order` strictly greater than `order`.
    pub fn next_after(&self, order: i64) -> Option<&Stage> {
        self.stages
            .values()
            .filter(|s| s.order > order)
            .min_by(|a, b| (a.order, &a.stage_id).cmp(&(b.order, &b.stage_id)))
    }

    /// Assign a stage to a user. Terminal stages are left alone.
    pub fn assign(&mut self, stage_id: &str, user_id: &str) -> bool {
        match self.stages.get_mut(stage_id) {
            Some(stage) if stage.status.can_assign() => {
                stage.assigned_to_id = Some(user_id.to_string());
                stage.status = StageStatus::Assigned;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<ProjectStatus>,
    #[serde(default)]
    pub workflow_stages: StageIndex,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskState>,
    #[serde(default)]
    pub workflow_updated_at: Option<Value>,
}

impl ProjectSnapshot {
    pub fn from_value(value: Value) -> Result<Self, WorkflowError> {
        serde_json::from_value(value).map_err(|e| WorkflowError::InvalidEvent(format!("malformed project snapshot: {e}")))
    }

    pub fn task(&self, key: &str) -> Option<&TaskState> {
        self.tasks.get(key)
    }
}

/// Raw change-feed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectChangeEvent {
    pub project_id: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub before: Option<Value>,
    #[serde(default)]
    pub after: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    Created { after: ProjectSnapshot },
    Updated { before: ProjectSnapshot, after: ProjectSnapshot },
    Deleted { before: ProjectSnapshot },
}

/// A change event after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectChange {
    pub project_id: String,
    pub event_id: Option<String>,
    pub kind: ChangeKind,
}

impl TryFrom<ProjectChangeEvent> for ProjectChange {
    type Error = WorkflowError;

    fn try_from(event: ProjectChangeEvent) -> Result<Self, Self::Error> {
        if event.project_id.trim().is_empty() {
            return Err(WorkflowError::InvalidEvent("projectId is required".to_string()));
        }

        let snapshot = |value: Option<Value>| -> Result<Option<ProjectSnapshot>, WorkflowError> {
            match value {
                None | Some(Value::Null) => Ok(None),
                Some(value) => ProjectSnapshot::from_value(value).map(Some),
            }
        };

        let kind = match (snapshot(event.before)?, snapshot(event.after)?) {
            (None, Some(after)) => ChangeKind::Created { after },
            (Some(before), Some(after)) => ChangeKind::Updated { before, after },
            (Some(before), None) => ChangeKind::Deleted { before },
            (None, None) => {
                return Err(WorkflowError::InvalidEvent(format!(
                    "event for project '{}' has neither before nor after",
                    event.project_id
                )))
            }
        };

        Ok(ProjectChange {
            project_id: event.project_id,
            event_id: event.event_id.filter(|id| !id.trim().is_empty()),
            kind,
        })
    }
}
