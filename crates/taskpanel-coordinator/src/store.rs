/*
[INPUT]:  State-update commands produced by every flow
[OUTPUT]: UpdateSink (outbound queue) and StateStore (reference reducer)
[POS]:    State layer - boundary to the externally owned store
[UPDATE]: When adding a new state-update command
*/

use serde::{Deserialize, Serialize};
use taskpanel_session::{FooterInfo, PreviewLock, Task, TaskPreset};
use tokio::sync::mpsc;
use tracing::debug;

/// Structured message that mutates the external state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateUpdate {
    #[serde(rename = "SET_TASKLIST")]
    SetTaskList(Vec<Task>),
    SetTaskDetails(Task),
    SetTaskPresets(Vec<TaskPreset>),
    SetEstimatedCost(f64),
    SetFooterInfo(FooterInfo),
    UpdatePreviewLock(PreviewLock),
    /// Restart was refused for lack of funds; the host prompts the user.
    InsufficientFunds { task_id: String },
}

impl StateUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            StateUpdate::SetTaskList(_) => "SET_TASKLIST",
            StateUpdate::SetTaskDetails(_) => "SET_TASK_DETAILS",
            StateUpdate::SetTaskPresets(_) => "SET_TASK_PRESETS",
            StateUpdate::SetEstimatedCost(_) => "SET_ESTIMATED_COST",
            StateUpdate::SetFooterInfo(_) => "SET_FOOTER_INFO",
            StateUpdate::UpdatePreviewLock(_) => "UPDATE_PREVIEW_LOCK",
            StateUpdate::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
        }
    }
}

/// Sending half of the outbound update queue. Cheap to clone into flows.
#[derive(Debug, Clone)]
pub struct UpdateSink {
    tx: mpsc::UnboundedSender<StateUpdate>,
}

impl UpdateSink {
    pub fn new(tx: mpsc::UnboundedSender<StateUpdate>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StateUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, update: StateUpdate) {
        let kind = update.kind();
        if self.tx.send(update).is_err() {
            debug!(update = kind, "state store gone; update discarded");
        } else {
            debug!(update = kind, "state update issued");
        }
    }
}

/// Minimal store a host (or a test) can fold updates into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateStore {
    pub tasks: Vec<Task>,
    pub task_details: Option<Task>,
    pub presets: Vec<TaskPreset>,
    pub estimated_cost: Option<f64>,
    pub footer: Option<FooterInfo>,
    pub preview_lock: Option<PreviewLock>,
    pub insufficient_funds: Option<String>,
}

impl StateStore {
    pub fn apply(&mut self, update: StateUpdate) {
        match update {
            StateUpdate::SetTaskList(tasks) => self.tasks = tasks,
            StateUpdate::SetTaskDetails(task) => self.task_details = Some(task),
            StateUpdate::SetTaskPresets(presets) => self.presets = presets,
            StateUpdate::SetEstimatedCost(cost) => self.estimated_cost = Some(cost),
            StateUpdate::SetFooterInfo(footer) => self.footer = Some(footer),
            StateUpdate::UpdatePreviewLock(lock) => self.preview_lock = Some(lock),
            StateUpdate::InsufficientFunds { task_id } => self.insufficient_funds = Some(task_id),
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskpanel_session::TaskStatus;

    fn task(id: &str, status: TaskStatus) -> Task {
        serde_json::from_value(json!({"id": id, "status": status})).unwrap()
    }

    #[test]
    fn wire_names_follow_command_convention() {
        let update = StateUpdate::SetTaskList(Vec::new());
        let encoded = serde_json::to_value(&update).unwrap();
        assert_eq!(encoded, json!({"type": "SET_TASKLIST", "payload": []}));

        let prompt = StateUpdate::InsufficientFunds {
            task_id: "t1".to_string(),
        };
        let encoded = serde_json::to_value(&prompt).unwrap();
        assert_eq!(encoded["type"], json!(prompt.kind()));
        assert_eq!(encoded["payload"]["task_id"], json!("t1"));

        let cost = serde_json::to_value(StateUpdate::SetEstimatedCost(1.5)).unwrap();
        assert_eq!(cost["type"], json!("SET_ESTIMATED_COST"));
    }

    #[test]
    fn task_list_overwrites_instead_of_merging() {
        let mut store = StateStore::default();
        store.apply(StateUpdate::SetTaskList(vec![
            task("a", TaskStatus::Computing),
            task("b", TaskStatus::Waiting),
        ]));
        store.apply(StateUpdate::SetTaskList(vec![task("c", TaskStatus::Finished)]));

        assert_eq!(store.tasks.len(), 1);
        assert!(store.task("a").is_none());
        assert_eq!(store.task("c").map(|t| t.status), Some(TaskStatus::Finished));
    }

    #[tokio::test]
    async fn sink_tolerates_dropped_store() {
        let (sink, rx) = UpdateSink::channel();
        drop(rx);
        sink.send(StateUpdate::SetEstimatedCost(2.0));
    }
}
