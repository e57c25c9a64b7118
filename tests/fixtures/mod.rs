//! Shared fixtures: a seeded user directory and a dispatcher that records
//! every batch instead of pushing it anywhere.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use erp_flow::config::ErpFlowConfig;
use erp_flow::directory::UserRef;
use erp_flow::notify::{DispatchReport, NotificationDispatcher, NotifyError};
use erp_flow::store::{collections, MemoryStore, RecordStore};
use erp_flow::Services;

/// One user per role, two for sales, everyone with a push token.
pub fn users_fixture() -> Value {
    json!({
        "e1": {"displayName": "Erin Engineer", "role": "engineer", "fcmToken": "tok-e1"},
        "s1": {"displayName": "Sam Sales", "role": "sales", "fcmToken": "tok-s1"},
        "s2": {"displayName": "Sid Sales", "role": "sales", "fcmToken": "tok-s2"},
        "d1": {"displayName": "Dana Director", "role": "director", "fcmToken": "tok-d1"},
        "c1": {"displayName": "Cory Cutter", "role": "cutting-engineer", "fcmToken": "tok-c1"},
        "dd1": {"displayName": "Dee Deputy", "role": "deputy-director", "fcmToken": "tok-dd1"},
        "a1": {"displayName": "Ali Accountant", "role": "accountant", "fcmToken": "tok-a1"}
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentBatch {
    pub title: String,
    pub body: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<SentBatch>>,
}

impl RecordingDispatcher {
    pub fn batches(&self) -> Vec<SentBatch> {
        self.sent.lock().unwrap().clone()
    }

    pub fn titled(&self, title: &str) -> Vec<SentBatch> {
        self.batches().into_iter().filter(|b| b.title == title).collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, recipients: &[UserRef], title: &str, body: &str) -> Result<DispatchReport, NotifyError> {
        let mut ids: Vec<String> = recipients.iter().map(|u| u.id.clone()).collect();
        ids.sort();
        self.sent.lock().unwrap().push(SentBatch {
            title: title.to_string(),
            body: body.to_string(),
            recipients: ids,
        });
        Ok(DispatchReport {
            attempted: recipients.len(),
            delivered: recipients.len(),
            ..DispatchReport::default()
        })
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub services: Services,
}

impl Harness {
    pub async fn project(&self, project_id: &str) -> Value {
        self.store
            .get(collections::PROJECTS, project_id)
            .await
            .unwrap()
            .map(|doc| doc.data)
            .unwrap_or(Value::Null)
    }
}

/// Services over a memory store seeded with the user directory plus
/// `extra` collections.
pub fn harness(extra: Value) -> Harness {
    let mut fixture = json!({ "users": users_fixture() });
    if let (Some(root), Value::Object(more)) = (fixture.as_object_mut(), extra) {
        root.extend(more);
    }

    let store = Arc::new(MemoryStore::from_fixture(&fixture).unwrap());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let services = Services::with_dispatcher(store.clone(), &ErpFlowConfig::default(), dispatcher.clone());
    Harness {
        store,
        dispatcher,
        services,
    }
}
