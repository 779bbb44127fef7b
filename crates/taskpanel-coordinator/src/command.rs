/*
[INPUT]:  Host-issued commands (NDJSON lines or in-process calls)
[OUTPUT]: Typed Command enum with the host's wire names
[POS]:    Inbound boundary - what the coordinator can be asked to do
[UPDATE]: When the host gains a new command
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskpanel_session::{CreateTaskPayload, SaveTaskPresetRequest};

/// Inbound command. Payloads are optional because the host may send
/// `null`; such commands are dropped by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Payload is the task type to filter presets by.
    GetTaskPresets(Option<String>),
    SaveTaskPreset(Option<SaveTaskPresetRequest>),
    DeleteTaskPreset(Option<String>),
    GetTaskDetails(Option<String>),
    CreateTask(Option<CreateTaskPayload>),
    DeleteTask(Option<String>),
    RunTestTask(Option<Value>),
    GetEstimatedCost(Option<Value>),
    RestartTask(Option<String>),
    /// Task whose preview the host shows; `None` clears it.
    SelectTask(Option<String>),
    SetConnectedPeers(bool),
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::GetTaskPresets(_) => "GET_TASK_PRESETS",
            Command::SaveTaskPreset(_) => "SAVE_TASK_PRESET",
            Command::DeleteTaskPreset(_) => "DELETE_TASK_PRESET",
            Command::GetTaskDetails(_) => "GET_TASK_DETAILS",
            Command::CreateTask(_) => "CREATE_TASK",
            Command::DeleteTask(_) => "DELETE_TASK",
            Command::RunTestTask(_) => "RUN_TEST_TASK",
            Command::GetEstimatedCost(_) => "GET_ESTIMATED_COST",
            Command::RestartTask(_) => "RESTART_TASK",
            Command::SelectTask(_) => "SELECT_TASK",
            Command::SetConnectedPeers(_) => "SET_CONNECTED_PEERS",
        }
    }

    /// Parse one NDJSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(r#"{"type":"GET_TASK_PRESETS","payload":"Blender"}"#, "GET_TASK_PRESETS")]
    #[case(r#"{"type":"DELETE_TASK","payload":"t1"}"#, "DELETE_TASK")]
    #[case(r#"{"type":"RUN_TEST_TASK","payload":{"type":"Blender"}}"#, "RUN_TEST_TASK")]
    #[case(r#"{"type":"SELECT_TASK","payload":null}"#, "SELECT_TASK")]
    #[case(r#"{"type":"SET_CONNECTED_PEERS","payload":true}"#, "SET_CONNECTED_PEERS")]
    fn parses_wire_names(#[case] line: &str, #[case] kind: &str) {
        let command = Command::from_line(line).unwrap();
        assert_eq!(command.kind(), kind);
    }

    #[test]
    fn save_preset_payload_is_typed() {
        let command = Command::from_line(
            r#"{"type":"SAVE_TASK_PRESET","payload":{"preset_name":"hq","task_type":"Blender","data":{"resolution":[1920,1080]}}}"#,
        )
        .unwrap();
        let Command::SaveTaskPreset(Some(request)) = command else {
            panic!("unexpected command");
        };
        assert_eq!(request.preset_name, "hq");
        assert_eq!(request.data["resolution"], json!([1920, 1080]));
    }

    #[test]
    fn create_task_keeps_extra_fields() {
        let command = Command::from_line(
            r#"{"type":"CREATE_TASK","payload":{"type":"Blender","name":"scene"}}"#,
        )
        .unwrap();
        let Command::CreateTask(Some(payload)) = command else {
            panic!("unexpected command");
        };
        assert!(payload.is_dry_run());
        assert_eq!(payload.extra["name"], json!("scene"));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Command::from_line(r#"{"type":"LAUNCH_ROCKET","payload":1}"#).is_err());
    }
}
