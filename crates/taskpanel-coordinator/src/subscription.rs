/*
[INPUT]:  Session, cancellation token, engine push topics
[OUTPUT]: Long-running watch flows forwarding events until cancelled
[POS]:    Flow layer - push subscriptions
[UPDATE]: When adding a watched topic or changing what an event updates
*/

use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde_json::Value;
use taskpanel_session::{Session, Task};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::EventChannel;
use crate::footer::summarize;
use crate::store::{StateUpdate, UpdateSink};

/// Engine push topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    TaskList,
    TestTaskStatus,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::TaskList => "evt.comp.task.list",
            Topic::TestTaskStatus => "evt.comp.task.test.status",
        }
    }
}

/// Status report published while a dry-run build is validated.
#[derive(Debug, Clone, PartialEq)]
pub struct TestTaskStatus {
    pub status: Value,
    pub error: Option<Value>,
}

fn decode_task_list(args: Vec<Value>) -> Result<Vec<Task>> {
    let list = args.into_iter().next().context("task list event without payload")?;
    serde_json::from_value(list).context("decode task list")
}

fn decode_test_status(args: Vec<Value>) -> Result<TestTaskStatus> {
    let mut args = args.into_iter();
    let status = args.next().context("test status event without payload")?;
    let error = args.next().filter(|value| !value.is_null());
    Ok(TestTaskStatus { status, error })
}

/// Receive until cancelled or until the session drops the subscription.
/// The channel is closed on every exit path.
async fn drain<T, F>(mut channel: EventChannel<T>, token: &CancellationToken, mut on_event: F)
where
    T: Send + 'static,
    F: FnMut(T),
{
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(topic = channel.topic(), "watch cancelled");
                break;
            }
            event = channel.receive() => match event {
                Some(event) => on_event(event),
                None => {
                    warn!(topic = channel.topic(), "subscription ended by session");
                    break;
                }
            }
        }
    }
    channel.close();
}

/// Mirror the engine's task list into the store.
///
/// Each event replaces the whole list and is followed by exactly one footer
/// summary. The latest snapshot is also published on `snapshots` for the
/// preview flow.
pub async fn watch_task_list(
    session: Session,
    sink: UpdateSink,
    snapshots: watch::Sender<Arc<Vec<Task>>>,
    peers: watch::Receiver<bool>,
    token: CancellationToken,
) -> Result<()> {
    let topic = Topic::TaskList.as_str();
    let channel = EventChannel::open(&session, topic, decode_task_list)
        .await
        .context("open task list channel")?;
    info!(topic, "task list watch started");

    drain(channel, &token, |tasks: Vec<Task>| {
        debug!(count = tasks.len(), "task list event");
        let footer = summarize(&tasks, *peers.borrow());
        sink.send(StateUpdate::SetTaskList(tasks.clone()));
        sink.send(StateUpdate::SetFooterInfo(footer));
        snapshots.send_replace(Arc::new(tasks));
    })
    .await;

    info!(topic, "task list watch stopped");
    Ok(())
}

/// Observe dry-run validation. Events are logged, not applied to state.
pub async fn watch_test_task_status(session: Session, token: CancellationToken) -> Result<()> {
    let topic = Topic::TestTaskStatus.as_str();
    let channel = EventChannel::open(&session, topic, decode_test_status)
        .await
        .context("open test task status channel")?;
    info!(topic, "test task watch started");

    drain(channel, &token, |report: TestTaskStatus| match &report.error {
        Some(error) => warn!(status = %report.status, error = %error, "test task reported error"),
        None => info!(status = %report.status, "test task status"),
    })
    .await;

    info!(topic, "test task watch stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_list_event_uses_first_argument() {
        let tasks = decode_task_list(vec![
            json!([{"id": "a", "status": "Computing", "progress": 0.5}]),
            json!("ignored"),
        ])
        .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "a");
    }

    #[test]
    fn malformed_task_list_is_rejected() {
        assert!(decode_task_list(Vec::new()).is_err());
        assert!(decode_task_list(vec![json!([{"id": "a", "status": "Exploded"}])]).is_err());
        assert!(decode_task_list(vec![json!({"id": "a"})]).is_err());
    }

    #[test]
    fn test_status_keeps_error_argument() {
        let report = decode_test_status(vec![json!("Success"), json!(null)]).unwrap();
        assert_eq!(report.error, None);

        let report = decode_test_status(vec![json!("Error"), json!("missing file")]).unwrap();
        assert_eq!(report.error, Some(json!("missing file")));
    }
}
