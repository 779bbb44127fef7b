/*
[INPUT]:  Full task list snapshot + peer connectivity
[OUTPUT]: FooterInfo summary for the status bar
[POS]:    Derived state - one summary per task-list event
[UPDATE]: When footer wording or precedence changes
*/

use taskpanel_session::{FooterColor, FooterInfo, Task, TaskStatus};

/// Summarise a task list. Later rules win: timeout over computing over
/// waiting over the connectivity baseline.
pub fn summarize(tasks: &[Task], peers_connected: bool) -> FooterInfo {
    let any = |status: TaskStatus| tasks.iter().any(|task| task.status == status);

    let (status, message, color) = if any(TaskStatus::Timeout) {
        (TaskStatus::Timeout, "Your task has timed out", FooterColor::Red)
    } else if any(TaskStatus::Computing) {
        (TaskStatus::Computing, "Processing your task", FooterColor::Green)
    } else if any(TaskStatus::Waiting) {
        (
            TaskStatus::Waiting,
            "Task is preparing for computation",
            FooterColor::Yellow,
        )
    } else if peers_connected {
        (TaskStatus::Ready, "Golem is ready!", FooterColor::Green)
    } else {
        (
            TaskStatus::WaitingForPeer,
            "Waiting for peer...",
            FooterColor::Yellow,
        )
    };

    FooterInfo {
        status,
        message: message.to_string(),
        color,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn tasks(statuses: &[TaskStatus]) -> Vec<Task> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                serde_json::from_value(json!({"id": format!("t{i}"), "status": status})).unwrap()
            })
            .collect()
    }

    #[rstest]
    #[case(&[], true, TaskStatus::Ready, FooterColor::Green)]
    #[case(&[], false, TaskStatus::WaitingForPeer, FooterColor::Yellow)]
    #[case(&[TaskStatus::Finished], true, TaskStatus::Ready, FooterColor::Green)]
    #[case(&[TaskStatus::Waiting, TaskStatus::Finished], true, TaskStatus::Waiting, FooterColor::Yellow)]
    #[case(&[TaskStatus::Waiting, TaskStatus::Computing], false, TaskStatus::Computing, FooterColor::Green)]
    #[case(&[TaskStatus::Computing, TaskStatus::Timeout], true, TaskStatus::Timeout, FooterColor::Red)]
    fn precedence(
        #[case] statuses: &[TaskStatus],
        #[case] peers: bool,
        #[case] status: TaskStatus,
        #[case] color: FooterColor,
    ) {
        let info = summarize(&tasks(statuses), peers);
        assert_eq!(info.status, status);
        assert_eq!(info.color, color);
    }

    #[test]
    fn ready_message() {
        assert_eq!(summarize(&[], true).message, "Golem is ready!");
    }
}
