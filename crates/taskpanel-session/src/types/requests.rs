/*
[INPUT]:  Host-issued request payloads
[OUTPUT]: Typed request bodies and their RPC argument lists
[POS]:    Data layer - type definitions for engine communication
[UPDATE]: When request payload shapes change
*/

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of a preset save request. Sent positionally as
/// `[preset_name, task_type, data]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveTaskPresetRequest {
    pub preset_name: String,
    pub task_type: String,
    #[serde(default)]
    pub data: Value,
}

impl SaveTaskPresetRequest {
    pub fn into_args(self) -> Vec<Value> {
        vec![
            Value::String(self.preset_name),
            Value::String(self.task_type),
            self.data,
        ]
    }
}

/// Payload of a create request.
///
/// With resolved `options` this is a real build; with only a `type` it is a
/// dry run that watches the test-task status channel instead.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CreateTaskPayload {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CreateTaskPayload {
    pub fn is_build(&self) -> bool {
        self.options.as_ref().is_some_and(is_truthy)
    }

    pub fn is_dry_run(&self) -> bool {
        !self.is_build() && self.task_type.as_deref().is_some_and(|t| !t.is_empty())
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_payload_with_options_is_a_build() {
        let payload: CreateTaskPayload = serde_json::from_value(json!({
            "type": "Blender",
            "options": {"frame_count": 3},
            "name": "scene",
        }))
        .unwrap();
        assert!(payload.is_build());
        assert!(!payload.is_dry_run());
        assert_eq!(payload.extra.get("name"), Some(&json!("scene")));
    }

    #[test]
    fn create_payload_with_only_type_is_a_dry_run() {
        let payload: CreateTaskPayload =
            serde_json::from_value(json!({"type": "Blender", "options": null})).unwrap();
        assert!(!payload.is_build());
        assert!(payload.is_dry_run());
    }

    #[test]
    fn empty_create_payload_is_neither() {
        let payload = CreateTaskPayload::default();
        assert!(!payload.is_build());
        assert!(!payload.is_dry_run());
    }

    #[test]
    fn save_preset_args_are_positional() {
        let request = SaveTaskPresetRequest {
            preset_name: "hd".to_string(),
            task_type: "Blender".to_string(),
            data: json!({"resolution": [1920, 1080]}),
        };
        assert_eq!(
            request.into_args(),
            vec![json!("hd"), json!("Blender"), json!({"resolution": [1920, 1080]})]
        );
    }
}
