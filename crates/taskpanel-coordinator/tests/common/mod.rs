/*
[INPUT]:  Test scenarios needing a running coordinator
[OUTPUT]: Shared test utilities: started coordinator over MockSession, update helpers
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new fixtures or wait helpers
*/

//! Common test utilities for taskpanel-coordinator tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use taskpanel_coordinator::{StateUpdate, TaskSessionCoordinator, Topic, UpdateSink};
use taskpanel_session::{MockSession, PreviewLock, Session};
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);
pub const SETTLE: Duration = Duration::from_millis(50);

pub struct Harness {
    pub mock: Arc<MockSession>,
    pub coordinator: TaskSessionCoordinator,
    pub updates: mpsc::UnboundedReceiver<StateUpdate>,
}

/// Start a coordinator and wait until its task-list watch is registered.
pub async fn start() -> Harness {
    let mock = MockSession::new();
    let (sink, updates) = UpdateSink::channel();
    let coordinator = TaskSessionCoordinator::start_with_timeout(
        Session::from_arc(mock.clone()),
        sink,
        Duration::from_secs(5),
    );
    within(mock.wait_for_subscribers(Topic::TaskList.as_str(), 1)).await;
    Harness {
        mock,
        coordinator,
        updates,
    }
}

pub fn task_json(id: &str, status: &str, progress: f64) -> Value {
    json!({
        "id": id,
        "name": format!("task {id}"),
        "type": "Blender",
        "status": status,
        "progress": progress,
        "options": {"frame_count": 10},
    })
}

pub fn publish_tasks(mock: &MockSession, tasks: Vec<Value>) {
    mock.publish(Topic::TaskList.as_str(), vec![Value::Array(tasks)]);
}

/// Await `fut` or fail the test after [`WAIT`].
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting")
}

pub async fn next_update(rx: &mut mpsc::UnboundedReceiver<StateUpdate>) -> StateUpdate {
    within(rx.recv()).await.expect("update channel closed")
}

/// Everything that arrives until the queue has been quiet for [`SETTLE`].
pub async fn settle(rx: &mut mpsc::UnboundedReceiver<StateUpdate>) -> Vec<StateUpdate> {
    let mut collected = Vec::new();
    while let Ok(Some(update)) = tokio::time::timeout(SETTLE, rx.recv()).await {
        collected.push(update);
    }
    collected
}

pub fn locks(updates: &[StateUpdate]) -> Vec<PreviewLock> {
    updates
        .iter()
        .filter_map(|update| match update {
            StateUpdate::UpdatePreviewLock(lock) => Some(lock.clone()),
            _ => None,
        })
        .collect()
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}
