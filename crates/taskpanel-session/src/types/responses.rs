/*
[INPUT]:  Raw engine reply values
[OUTPUT]: Typed reply shapes that are not plain models
[POS]:    Data layer - type definitions for engine communication
[UPDATE]: When reply shapes change
*/

use serde_json::Value;

/// Reply of the restart RPC: `[ok, message]`.
///
/// Anything that is not a two-element `[bool, ..]` list is read as success,
/// matching how the engine only reports failures in that shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartReply {
    pub ok: bool,
    pub message: Option<String>,
}

impl RestartReply {
    pub fn from_value(value: &Value) -> Self {
        match value.as_array().map(Vec::as_slice) {
            Some([Value::Bool(ok), rest @ ..]) => Self {
                ok: *ok,
                message: rest.first().and_then(Value::as_str).map(str::to_string),
            },
            _ => Self {
                ok: true,
                message: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn restart_reply_reads_failure_pair() {
        let reply = RestartReply::from_value(&json!([false, "Not enough GNT available"]));
        assert!(!reply.ok);
        assert_eq!(reply.message.as_deref(), Some("Not enough GNT available"));
    }

    #[test]
    fn restart_reply_defaults_to_success() {
        assert!(RestartReply::from_value(&json!(null)).ok);
        assert!(RestartReply::from_value(&json!("new-task-id")).ok);
        assert!(RestartReply::from_value(&json!([true, null])).ok);
    }
}
