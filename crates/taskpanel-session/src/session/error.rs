/*
[INPUT]:  Error sources (WebSocket, engine replies, serialization, WAMP protocol)
[OUTPUT]: Structured error types for every session primitive
[POS]:    Error handling layer - unified error types for the session crate
[UPDATE]: When adding new error sources or improving error messages
*/

use thiserror::Error;

/// Main error type for the session transport
#[derive(Error, Debug)]
pub enum SessionError {
    /// Connection or wire failure at the session boundary
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Well-formed error reply from the engine
    #[error("Engine rejected call ({uri}): {message}")]
    EngineRejection { uri: String, message: String },

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Router sent a frame that does not fit the conversation
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// No connection has been established yet
    #[error("Session not connected")]
    NotConnected,

    /// Connection closed while the request was outstanding
    #[error("Session closed")]
    Closed,

    /// Unsubscribe for a callback that is not registered on the topic
    #[error("No matching subscription on topic {topic}")]
    UnknownSubscription { topic: String },

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl SessionError {
    /// Check if the failure happened below the engine (socket, framing, closure)
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(_)
                | SessionError::Protocol(_)
                | SessionError::NotConnected
                | SessionError::Closed
        )
    }

    /// Text the engine attached to the failure, or the rendered error otherwise
    pub fn failure_message(&self) -> String {
        match self {
            SessionError::EngineRejection { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_prefers_engine_text() {
        let err = SessionError::EngineRejection {
            uri: "wamp.error.runtime_error".to_string(),
            message: "Not enough GNT available".to_string(),
        };
        assert_eq!(err.failure_message(), "Not enough GNT available");
        assert!(!err.is_transport());
    }

    #[test]
    fn test_transport_errors_are_classified() {
        assert!(SessionError::Closed.is_transport());
        assert!(SessionError::Transport("reset".to_string()).is_transport());
        assert_eq!(
            SessionError::Transport("Connection lost".to_string()).failure_message(),
            "Transport failure: Connection lost"
        );
    }
}
