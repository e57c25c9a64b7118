use serde::Serialize;

use super::triggers::TriggerKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectKind {
    RoleResolution,
    ProjectUpdate,
    Notification,
    Denormalization,
    TaskCleanup,
    Deduction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Failed(String),
    Skipped(String),
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideEffect {
    pub kind: SideEffectKind,
    pub target: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Everything one change event did, one entry per side effect. Entries are
/// recorded independently, so a failed notification and a successful
/// project update both show up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub project_id: String,
    pub event_id: Option<String>,
    pub self_originated: bool,
    pub triggers: Vec<TriggerKind>,
    pub effects: Vec<SideEffect>,
}

impl ApplyReport {
    pub fn new(project_id: &str, event_id: Option<&str>) -> Self {
        Self {
            project_id: project_id.to_string(),
            event_id: event_id.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn record(&mut self, kind: SideEffectKind, target: impl Into<String>, outcome: Outcome) {
        self.effects.push(SideEffect {
            kind,
            target: target.into(),
            outcome,
        });
    }

    pub fn effects_of(&self, kind: SideEffectKind) -> impl Iterator<Item = &SideEffect> {
        self.effects.iter().filter(move |e| e.kind == kind)
    }

    pub fn failures(&self) -> impl Iterator<Item = &SideEffect> {
        self.effects.iter().filter(|e| e.outcome.is_failed())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}
