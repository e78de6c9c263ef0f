//! LLM backend trait

use async_trait::async_trait;
use parley_core::Turn;

use crate::streaming::ReplyStream;
use crate::LlmError;

/// Streaming chat backend
///
/// `stream_reply` returns as soon as the stream is open. Text arrives on the
/// returned [`ReplyStream`]; the stream ends when the backend drops its
/// sender, and a mid-stream failure is reported as [`crate::LlmEvent::Failed`].
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn stream_reply(&self, history: &[Turn], utterance: &str)
        -> Result<ReplyStream, LlmError>;

    fn name(&self) -> &str {
        "llm"
    }
}
