/*
[INPUT]:  Raw WAMP JSON frames
[OUTPUT]: Parsed WampMessage values and their encodings
[POS]:    WAMP layer - message parsing and validation
[UPDATE]: When adding new message types or changing format
*/

use serde_json::{Map, Value, json};

use crate::session::{Result, SessionError};

pub const HELLO: u64 = 1;
pub const WELCOME: u64 = 2;
pub const ABORT: u64 = 3;
pub const GOODBYE: u64 = 6;
pub const ERROR: u64 = 8;
pub const SUBSCRIBE: u64 = 32;
pub const SUBSCRIBED: u64 = 33;
pub const UNSUBSCRIBE: u64 = 34;
pub const UNSUBSCRIBED: u64 = 35;
pub const EVENT: u64 = 36;
pub const CALL: u64 = 48;
pub const RESULT: u64 = 50;

/// The subset of WAMP v2 basic profile used by a caller + subscriber client.
#[derive(Debug, Clone, PartialEq)]
pub enum WampMessage {
    Hello {
        realm: String,
        details: Value,
    },
    Welcome {
        session: u64,
        details: Value,
    },
    Abort {
        details: Value,
        reason: String,
    },
    Goodbye {
        details: Value,
        reason: String,
    },
    Error {
        request_type: u64,
        request: u64,
        details: Value,
        error: String,
        args: Vec<Value>,
    },
    Subscribe {
        request: u64,
        options: Value,
        topic: String,
    },
    Subscribed {
        request: u64,
        subscription: u64,
    },
    Unsubscribe {
        request: u64,
        subscription: u64,
    },
    Unsubscribed {
        request: u64,
    },
    Event {
        subscription: u64,
        publication: u64,
        details: Value,
        args: Vec<Value>,
    },
    Call {
        request: u64,
        options: Value,
        procedure: String,
        args: Vec<Value>,
    },
    Result {
        request: u64,
        details: Value,
        args: Vec<Value>,
    },
}

impl WampMessage {
    /// HELLO announcing the caller and subscriber roles.
    pub fn hello(realm: &str) -> Self {
        WampMessage::Hello {
            realm: realm.to_string(),
            details: json!({"roles": {"caller": {}, "subscriber": {}}}),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WampMessage::Hello { .. } => "HELLO",
            WampMessage::Welcome { .. } => "WELCOME",
            WampMessage::Abort { .. } => "ABORT",
            WampMessage::Goodbye { .. } => "GOODBYE",
            WampMessage::Error { .. } => "ERROR",
            WampMessage::Subscribe { .. } => "SUBSCRIBE",
            WampMessage::Subscribed { .. } => "SUBSCRIBED",
            WampMessage::Unsubscribe { .. } => "UNSUBSCRIBE",
            WampMessage::Unsubscribed { .. } => "UNSUBSCRIBED",
            WampMessage::Event { .. } => "EVENT",
            WampMessage::Call { .. } => "CALL",
            WampMessage::Result { .. } => "RESULT",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            WampMessage::Hello { realm, details } => json!([HELLO, realm, details]),
            WampMessage::Welcome { session, details } => json!([WELCOME, session, details]),
            WampMessage::Abort { details, reason } => json!([ABORT, details, reason]),
            WampMessage::Goodbye { details, reason } => json!([GOODBYE, details, reason]),
            WampMessage::Error {
                request_type,
                request,
                details,
                error,
                args,
            } => json!([ERROR, request_type, request, details, error, args]),
            WampMessage::Subscribe {
                request,
                options,
                topic,
            } => json!([SUBSCRIBE, request, options, topic]),
            WampMessage::Subscribed {
                request,
                subscription,
            } => json!([SUBSCRIBED, request, subscription]),
            WampMessage::Unsubscribe {
                request,
                subscription,
            } => json!([UNSUBSCRIBE, request, subscription]),
            WampMessage::Unsubscribed { request } => json!([UNSUBSCRIBED, request]),
            WampMessage::Event {
                subscription,
                publication,
                details,
                args,
            } => json!([EVENT, subscription, publication, details, args]),
            WampMessage::Call {
                request,
                options,
                procedure,
                args,
            } => json!([CALL, request, options, procedure, args]),
            WampMessage::Result {
                request,
                details,
                args,
            } => json!([RESULT, request, details, args]),
        }
    }

    pub fn to_text(&self) -> String {
        self.to_value().to_string()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let frame = value
            .as_array()
            .ok_or_else(|| SessionError::Protocol("frame is not a list".to_string()))?;
        let code = id_at(frame, 0)?;

        let message = match code {
            HELLO => WampMessage::Hello {
                realm: string_at(frame, 1)?,
                details: dict_at(frame, 2),
            },
            WELCOME => WampMessage::Welcome {
                session: id_at(frame, 1)?,
                details: dict_at(frame, 2),
            },
            ABORT => WampMessage::Abort {
                details: dict_at(frame, 1),
                reason: string_at(frame, 2)?,
            },
            GOODBYE => WampMessage::Goodbye {
                details: dict_at(frame, 1),
                reason: string_at(frame, 2)?,
            },
            ERROR => WampMessage::Error {
                request_type: id_at(frame, 1)?,
                request: id_at(frame, 2)?,
                details: dict_at(frame, 3),
                error: string_at(frame, 4)?,
                args: list_at(frame, 5),
            },
            SUBSCRIBE => WampMessage::Subscribe {
                request: id_at(frame, 1)?,
                options: dict_at(frame, 2),
                topic: string_at(frame, 3)?,
            },
            SUBSCRIBED => WampMessage::Subscribed {
                request: id_at(frame, 1)?,
                subscription: id_at(frame, 2)?,
            },
            UNSUBSCRIBE => WampMessage::Unsubscribe {
                request: id_at(frame, 1)?,
                subscription: id_at(frame, 2)?,
            },
            UNSUBSCRIBED => WampMessage::Unsubscribed {
                request: id_at(frame, 1)?,
            },
            EVENT => WampMessage::Event {
                subscription: id_at(frame, 1)?,
                publication: id_at(frame, 2)?,
                details: dict_at(frame, 3),
                args: list_at(frame, 4),
            },
            CALL => WampMessage::Call {
                request: id_at(frame, 1)?,
                options: dict_at(frame, 2),
                procedure: string_at(frame, 3)?,
                args: list_at(frame, 4),
            },
            RESULT => WampMessage::Result {
                request: id_at(frame, 1)?,
                details: dict_at(frame, 2),
                args: list_at(frame, 3),
            },
            other => {
                return Err(SessionError::Protocol(format!(
                    "unsupported message code {other}"
                )));
            }
        };

        Ok(message)
    }

    /// Human-readable failure text of an ERROR frame: first positional
    /// argument if it is a string, the error URI otherwise.
    pub fn error_text(error: &str, args: &[Value]) -> String {
        match args.first() {
            Some(Value::String(text)) => text.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => error.to_string(),
        }
    }
}

fn id_at(frame: &[Value], index: usize) -> Result<u64> {
    frame
        .get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| SessionError::Protocol(format!("expected id at position {index}")))
}

fn string_at(frame: &[Value], index: usize) -> Result<String> {
    frame
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SessionError::Protocol(format!("expected string at position {index}")))
}

fn dict_at(frame: &[Value], index: usize) -> Value {
    match frame.get(index) {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => Value::Object(Map::new()),
    }
}

fn list_at(frame: &[Value], index: usize) -> Vec<Value> {
    match frame.get(index) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_with_positional_args() {
        let message =
            WampMessage::parse(r#"[36, 5512315355, 4429313566, {}, [[{"id": "t1"}]]]"#).unwrap();
        match message {
            WampMessage::Event {
                subscription, args, ..
            } => {
                assert_eq!(subscription, 5512315355);
                assert_eq!(args, vec![json!([{"id": "t1"}])]);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn result_without_args_has_empty_list() {
        let message = WampMessage::parse("[50, 7, {}]").unwrap();
        assert_eq!(
            message,
            WampMessage::Result {
                request: 7,
                details: json!({}),
                args: Vec::new(),
            }
        );
    }

    #[test]
    fn call_encodes_in_wire_order() {
        let call = WampMessage::Call {
            request: 3,
            options: json!({}),
            procedure: "comp.task.delete".to_string(),
            args: vec![json!("t1")],
        };
        assert_eq!(call.to_value(), json!([48, 3, {}, "comp.task.delete", ["t1"]]));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(
            WampMessage::parse(r#"{"not": "a list"}"#),
            Err(SessionError::Protocol(_))
        ));
        assert!(matches!(
            WampMessage::parse("[33, 1]"),
            Err(SessionError::Protocol(_))
        ));
        assert!(matches!(
            WampMessage::parse("[99, 1]"),
            Err(SessionError::Protocol(_))
        ));
    }

    #[test]
    fn error_text_prefers_first_argument() {
        assert_eq!(
            WampMessage::error_text("wamp.error.runtime_error", &[json!("Connection lost")]),
            "Connection lost"
        );
        assert_eq!(
            WampMessage::error_text("wamp.error.no_such_procedure", &[]),
            "wamp.error.no_such_procedure"
        );
    }
}
