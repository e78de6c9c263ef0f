//! LLM integration
//!
//! Features:
//! - `LlmBackend` trait producing a channel of reply events
//! - Tool calls surfaced mid-stream with a responder for the result
//! - Scripted and echo backends for development and tests

pub mod backend;
pub mod scripted;
pub mod streaming;

pub use backend::LlmBackend;
pub use scripted::{EchoLlm, ScriptStep, ScriptedLlm};
pub use streaming::{LlmEvent, ReplySender, ReplyStream, ToolCall};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("LLM unavailable: {0}")]
    Unavailable(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Tool call failed: {0}")]
    ToolCall(String),
}

impl From<LlmError> for parley_core::Error {
    fn from(err: LlmError) -> Self {
        parley_core::Error::UpstreamStream(err.to_string())
    }
}
