//! Wire protocol between the client and a session
//!
//! Messages are JSON objects discriminated by a `type` field.

use serde::{Deserialize, Serialize};

use crate::{Emotion, SessionStatus};

/// Client → server messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A user utterance (typed or transcribed client-side)
    Text { content: String },
    /// Barge-in without new input: drop the current response and listen
    Interrupt,
    /// Keepalive
    Ping,
}

/// Machine-readable error codes carried by [`ServerMessage::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    RateLimited,
    UpstreamFailure,
    MalformedMessage,
    Internal,
}

/// Server → client messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when the connection is established
    SessionInfo { session_id: String },
    /// Visible status transition
    Status {
        status: SessionStatus,
        emotion: Emotion,
    },
    /// Incremental reply text, in LLM order
    TextDelta { response_id: u64, delta: String },
    /// Synthesized audio for one sentence; may arrive out of index order
    AudioChunk {
        response_id: u64,
        index: usize,
        total: usize,
        is_last: bool,
        /// Base64-encoded 16-bit little-endian PCM
        audio: String,
        sample_rate: u32,
        source_text: String,
    },
    /// User-visible failure
    Error {
        code: ErrorCode,
        message: String,
        recoverable: bool,
    },
    Pong,
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
            recoverable: true,
        }
    }

    /// Response id this message belongs to, if any
    pub fn response_id(&self) -> Option<u64> {
        match self {
            ServerMessage::TextDelta { response_id, .. }
            | ServerMessage::AudioChunk { response_id, .. } => Some(*response_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"text","content":"hello"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Text {
                content: "hello".to_string()
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"shout"}"#).is_err());
    }

    #[test]
    fn test_server_message_shape() {
        let msg = ServerMessage::Status {
            status: SessionStatus::Thinking,
            emotion: Emotion::Happy,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["status"], "thinking");
        assert_eq!(json["emotion"], "happy");

        let err = ServerMessage::error(ErrorCode::RateLimited, "slow down");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "rate_limited");
        assert_eq!(json["recoverable"], true);
    }

    #[test]
    fn test_response_id_tagging() {
        let delta = ServerMessage::TextDelta {
            response_id: 7,
            delta: "hi".into(),
        };
        assert_eq!(delta.response_id(), Some(7));
        assert_eq!(ServerMessage::Pong.response_id(), None);
    }
}
