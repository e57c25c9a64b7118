//! Task denormalizer
//!
//! Projects each task embedded in a project into `tasks/{projectId}_{taskKey}`
//! so tasks can be queried without loading projects. Writes are merges with
//! every field present (absent values as explicit `null`), which makes
//! repeated calls idempotent and keeps the record derivable from the
//! latest embedded state.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::directory::UserLookup;
use crate::observability::workflow_metrics;
use crate::store::{collections, Filter, RecordStore, StoreError, WriteBatch};
use crate::workflows::{TaskState, WorkStatus};

/// Shown when an assignee id cannot be resolved to a name.
pub const UNKNOWN_USER: &str = "Unknown user";

const TASK_LABELS: &[(&str, &str)] = &[
    ("material_separation", "Material separation"),
    ("quotation", "Quotation"),
    ("purchasing", "Purchasing"),
    ("material_cutting", "Material cutting"),
    ("assembly", "Assembly"),
    ("painting", "Painting"),
    ("shipping", "Shipping"),
];

/// Human label for a task key; unknown keys are title-cased.
pub fn task_label(task_key: &str) -> String {
    if let Some((_, label)) = TASK_LABELS.iter().find(|(key, _)| *key == task_key) {
        return label.to_string();
    }

    let words: Vec<String> = task_key
        .split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    words.join(" ")
}

pub fn task_record_id(project_id: &str, task_key: &str) -> String {
    format!("{project_id}_{task_key}")
}

pub struct TaskDenormalizer {
    store: Arc<dyn RecordStore>,
    users: Arc<dyn UserLookup>,
}

impl TaskDenormalizer {
    pub fn new(store: Arc<dyn RecordStore>, users: Arc<dyn UserLookup>) -> Self {
        Self { store, users }
    }

    async fn assignee_name(&self, user_id: Option<&str>) -> Value {
        let Some(user_id) = user_id.filter(|id| !id.trim().is_empty()) else {
            return Value::Null;
        };
        match self.users.display_name(user_id).await {
            Ok(Some(name)) => Value::String(name),
            Ok(None) => Value::String(UNKNOWN_USER.to_string()),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Assignee lookup failed, using placeholder");
                Value::String(UNKNOWN_USER.to_string())
            }
        }
    }

    /// Upsert the flat record for one embedded task.
    pub async fn denormalize(
        &self,
        project_id: &str,
        project_name: &str,
        project_status: Option<&WorkStatus>,
        task_key: &str,
        task: &TaskState,
    ) -> Result<String, StoreError> {
        let record_id = task_record_id(project_id, task_key);
        let assigned_to_name = self.assignee_name(task.assigned_to.as_deref()).await;

        let record = json!({
            "projectId": project_id,
            "projectName": project_name,
            "projectStatus": project_status.map(WorkStatus::as_str),
            "taskKey": task_key,
            "taskLabel": task_label(task_key),
            "status": task.status.as_ref().map(WorkStatus::as_str),
            "assignedToId": task.assigned_to,
            "assignedToName": assigned_to_name,
            "startDate": task.start_date.clone().unwrap_or(Value::Null),
            "endDate": task.end_date.clone().unwrap_or(Value::Null),
            "updatedAt": Utc::now().to_rfc3339(),
        });

        self.store.merge(collections::TASKS, &record_id, record).await?;
        workflow_metrics().record_denormalization();
        debug!(task_id = %record_id, "Task record denormalized");
        Ok(record_id)
    }

    /// Remove every derived task record of a deleted project.
    pub async fn delete_for_project(&self, project_id: &str) -> Result<usize, StoreError> {
        let records = self
            .store
            .query(collections::TASKS, &[Filter::eq("projectId", project_id)])
            .await?;
        if records.is_empty() {
            return Ok(0);
        }

        let batch = records
            .iter()
            .fold(WriteBatch::new(), |batch, doc| batch.delete(collections::TASKS, &doc.id));
        self.store.commit(batch).await?;

        info!(project_id = %project_id, removed = records.len(), "Removed task records of deleted project");
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryError, MockUserLookup};
    use crate::store::MemoryStore;

    fn task(value: Value) -> TaskState {
        serde_json::from_value(value).unwrap()
    }

    fn lookup_returning(name: Option<&'static str>) -> Arc<MockUserLookup> {
        let mut users = MockUserLookup::new();
        users
            .expect_display_name()
            .returning(move |_| Ok(name.map(str::to_string)));
        Arc::new(users)
    }

    #[test]
    fn test_task_labels() {
        assert_eq!(task_label("material_cutting"), "Material cutting");
        assert_eq!(task_label("quality_check"), "Quality Check");
    }

    #[tokio::test]
    async fn test_denormalize_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let denormalizer = TaskDenormalizer::new(store.clone(), lookup_returning(Some("Ann")));
        let state = task(json!({"status": "in-progress", "assignedTo": "u1", "startDate": "2024-05-01"}));

        for _ in 0..2 {
            denormalizer
                .denormalize("p1", "Gate", Some(&WorkStatus::InProgress), "assembly", &state)
                .await
                .unwrap();
        }

        assert_eq!(store.count(collections::TASKS).await, 1);
        let record = store.get(collections::TASKS, "p1_assembly").await.unwrap().unwrap().data;
        assert_eq!(record["assignedToName"], "Ann");
        assert_eq!(record["taskLabel"], "Assembly");
        assert_eq!(record["projectStatus"], "in-progress");
        assert_eq!(record["startDate"], "2024-05-01");
        assert_eq!(record["endDate"], Value::Null);
    }

    #[tokio::test]
    async fn test_cleared_assignee_does_not_drift() {
        let store = Arc::new(MemoryStore::new());
        let denormalizer = TaskDenormalizer::new(store.clone(), lookup_returning(Some("Ann")));

        denormalizer
            .denormalize("p1", "Gate", None, "painting", &task(json!({"assignedTo": "u1"})))
            .await
            .unwrap();
        denormalizer
            .denormalize("p1", "Gate", None, "painting", &task(json!({"status": "pending"})))
            .await
            .unwrap();

        let record = store.get(collections::TASKS, "p1_painting").await.unwrap().unwrap().data;
        assert_eq!(record["assignedToId"], Value::Null);
        assert_eq!(record["assignedToName"], Value::Null);
        assert_eq!(record["status"], "pending");
    }

    #[tokio::test]
    async fn test_lookup_failure_uses_placeholder() {
        let store = Arc::new(MemoryStore::new());
        let mut users = MockUserLookup::new();
        users.expect_display_name().returning(|_| {
            Err(DirectoryError::Store(StoreError::Backend("offline".to_string())))
        });
        let denormalizer = TaskDenormalizer::new(store.clone(), Arc::new(users));

        denormalizer
            .denormalize("p1", "Gate", None, "shipping", &task(json!({"assignedTo": "ghost"})))
            .await
            .unwrap();

        let record = store.get(collections::TASKS, "p1_shipping").await.unwrap().unwrap().data;
        assert_eq!(record["assignedToName"], UNKNOWN_USER);
    }

    #[tokio::test]
    async fn test_delete_for_project_only_touches_that_project() {
        let store = Arc::new(MemoryStore::new());
        let denormalizer = TaskDenormalizer::new(store.clone(), lookup_returning(None));
        for (project, key) in [("p1", "assembly"), ("p1", "painting"), ("p2", "assembly")] {
            denormalizer
                .denormalize(project, "x", None, key, &TaskState::default())
                .await
                .unwrap();
        }

        assert_eq!(denormalizer.delete_for_project("p1").await.unwrap(), 2);
        assert_eq!(store.count(collections::TASKS).await, 1);
        assert_eq!(denormalizer.delete_for_project("p1").await.unwrap(), 0);
    }
}
