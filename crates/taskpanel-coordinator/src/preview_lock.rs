/*
[INPUT]:  Selected task (status, progress), deletions, task-list snapshots
[OUTPUT]: Preview lock commands issued once per observable change
[POS]:    Derived state - preview stream lock state machine
[UPDATE]: When the lock predicate or its trigger edges change
*/

use std::sync::Arc;

use anyhow::Result;
use taskpanel_session::{PreviewLock, Task, TaskStatus};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::store::{StateUpdate, UpdateSink};

/// Whether the engine should stream live previews for a task.
pub fn should_lock(status: TaskStatus, progress: f64) -> bool {
    match status {
        TaskStatus::Computing | TaskStatus::Finished => true,
        TaskStatus::Timeout | TaskStatus::Restart => progress > 0.0,
        TaskStatus::WaitingForPeer
        | TaskStatus::NotStarted
        | TaskStatus::Ready
        | TaskStatus::Waiting => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked,
    Unlocked,
}

/// Remembers the last lock command sent and suppresses repeats.
#[derive(Debug, Default)]
pub struct PreviewLockMachine {
    last: Option<PreviewLock>,
}

impl PreviewLockMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LockState {
        match &self.last {
            Some(lock) if lock.enabled => LockState::Locked,
            _ => LockState::Unlocked,
        }
    }

    pub fn last_sent(&self) -> Option<&PreviewLock> {
        self.last.as_ref()
    }

    /// Feed the currently selected task. Returns a command only when the
    /// selected id or the lock decision differs from what was last sent.
    pub fn observe(&mut self, selected: Option<&Task>) -> Option<PreviewLock> {
        let task = selected?;
        let enabled = should_lock(task.status, task.progress);
        let unchanged = self.last.as_ref().is_some_and(|last| {
            last.id.as_deref() == Some(task.id.as_str()) && last.enabled == enabled
        });
        if unchanged {
            return None;
        }

        let lock = PreviewLock {
            id: Some(task.id.clone()),
            frame_count: task.frame_count(),
            enabled,
        };
        self.last = Some(lock.clone());
        Some(lock)
    }

    /// Deletion always disables, whatever was sent before.
    pub fn task_deleted(&mut self) -> PreviewLock {
        let lock = PreviewLock::disabled();
        self.last = Some(lock.clone());
        lock
    }
}

/// Host-side inputs to the preview flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewInput {
    Select(Option<String>),
    Deleted,
}

/// Drive the machine from selection changes and task-list snapshots until
/// cancelled.
pub async fn run_preview_flow(
    mut tasks: watch::Receiver<Arc<Vec<Task>>>,
    mut inputs: mpsc::UnboundedReceiver<PreviewInput>,
    sink: UpdateSink,
    token: CancellationToken,
) -> Result<()> {
    let mut machine = PreviewLockMachine::new();
    let mut selected: Option<String> = None;
    let mut tasks_open = true;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            input = inputs.recv() => match input {
                Some(PreviewInput::Select(id)) => {
                    debug!(task_id = ?id, "preview selection changed");
                    selected = id;
                }
                Some(PreviewInput::Deleted) => {
                    selected = None;
                    sink.send(StateUpdate::UpdatePreviewLock(machine.task_deleted()));
                    continue;
                }
                None => break,
            },
            changed = tasks.changed(), if tasks_open => {
                if changed.is_err() {
                    tasks_open = false;
                    continue;
                }
            }
        }

        let snapshot = tasks.borrow_and_update().clone();
        let task = selected
            .as_deref()
            .and_then(|id| snapshot.iter().find(|task| task.id == id));
        if let Some(lock) = machine.observe(task) {
            info!(task_id = ?lock.id, enabled = lock.enabled, "preview lock changed");
            sink.send(StateUpdate::UpdatePreviewLock(lock));
        }
    }

    debug!("preview lock flow stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn task(id: &str, status: TaskStatus, progress: f64) -> Task {
        serde_json::from_value(json!({
            "id": id,
            "status": status,
            "progress": progress,
            "options": {"frame_count": 4},
        }))
        .unwrap()
    }

    #[rstest]
    #[case(TaskStatus::Computing, 0.0, true)]
    #[case(TaskStatus::Finished, 0.0, true)]
    #[case(TaskStatus::Timeout, 0.0, false)]
    #[case(TaskStatus::Timeout, 0.3, true)]
    #[case(TaskStatus::Restart, 0.0, false)]
    #[case(TaskStatus::Restart, 0.1, true)]
    #[case(TaskStatus::Waiting, 0.9, false)]
    #[case(TaskStatus::Ready, 1.0, false)]
    #[case(TaskStatus::NotStarted, 0.0, false)]
    #[case(TaskStatus::WaitingForPeer, 0.5, false)]
    fn lock_predicate(#[case] status: TaskStatus, #[case] progress: f64, #[case] expected: bool) {
        assert_eq!(should_lock(status, progress), expected);
    }

    #[test]
    fn emits_once_per_transition() {
        let mut machine = PreviewLockMachine::new();
        let waiting = task("a", TaskStatus::Waiting, 0.0);
        let computing = task("a", TaskStatus::Computing, 0.2);
        let finished = task("a", TaskStatus::Finished, 1.0);

        let first = machine.observe(Some(&waiting)).unwrap();
        assert!(!first.enabled);
        assert_eq!(first.frame_count, Some(4));
        assert_eq!(machine.observe(Some(&waiting)), None);

        assert!(machine.observe(Some(&computing)).unwrap().enabled);
        assert_eq!(machine.state(), LockState::Locked);
        assert_eq!(machine.observe(Some(&finished)), None);
        assert_eq!(machine.observe(None), None);
    }

    #[test]
    fn selection_change_emits_even_with_same_decision() {
        let mut machine = PreviewLockMachine::new();
        machine.observe(Some(&task("a", TaskStatus::Computing, 0.5)));

        let lock = machine.observe(Some(&task("b", TaskStatus::Finished, 1.0))).unwrap();
        assert_eq!(lock.id.as_deref(), Some("b"));
        assert!(lock.enabled);
    }

    #[test]
    fn deletion_always_disables() {
        let mut machine = PreviewLockMachine::new();
        assert_eq!(machine.task_deleted(), PreviewLock::disabled());

        machine.observe(Some(&task("a", TaskStatus::Computing, 0.5)));
        assert_eq!(machine.task_deleted(), PreviewLock::disabled());
        assert_eq!(machine.state(), LockState::Unlocked);

        // Re-selecting after a delete is a fresh identity change.
        assert!(machine.observe(Some(&task("a", TaskStatus::Computing, 0.5))).is_some());
    }

    #[tokio::test]
    async fn flow_waits_for_selected_task_to_appear() {
        let (tasks_tx, tasks_rx) = watch::channel(Arc::new(Vec::new()));
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (sink, mut updates) = UpdateSink::channel();
        let token = CancellationToken::new();
        let flow = tokio::spawn(run_preview_flow(tasks_rx, input_rx, sink, token.clone()));

        input_tx.send(PreviewInput::Select(Some("a".into()))).unwrap();
        tasks_tx.send_replace(Arc::new(vec![task("a", TaskStatus::Computing, 0.1)]));

        let update = updates.recv().await.unwrap();
        let StateUpdate::UpdatePreviewLock(lock) = update else {
            panic!("unexpected update {update:?}");
        };
        assert_eq!(lock.id.as_deref(), Some("a"));
        assert!(lock.enabled);

        token.cancel();
        flow.await.unwrap().unwrap();
        assert!(updates.try_recv().is_err());
    }
}
