//! Conversational response orchestration
//!
//! Features:
//! - Live session state with a single current-response pointer
//! - Bounded conversation history
//! - Keyword emotion detection for synthesis style
//! - Greeting and cached quick replies
//! - Streaming LLM replies synthesized sentence by sentence

pub mod conversation;
pub mod emotion;
pub mod quick_reply;
pub mod response;
pub mod session;

pub use conversation::ConversationHistory;
pub use emotion::EmotionDetector;
pub use quick_reply::{QuickReplies, QuickReply, QuickReplySource};
pub use response::{
    ResponseCoordinator, ResponseOutcome, ResponseState, SynthesisChunk,
};
pub use session::{RateWindow, Session, NO_RESPONSE};

use std::sync::Arc;
use std::time::Duration;

use parley_config::{ResponseConfig, SegmenterConfig, Settings};
use parley_llm::LlmBackend;
use parley_persistence::TurnStore;
use parley_pipeline::{SynthesisLimiter, TtsBackend};
use parley_tools::ToolRegistry;

/// Collaborators and settings shared by every response in the process
pub struct AgentServices {
    pub llm: Arc<dyn LlmBackend>,
    pub tts: Arc<dyn TtsBackend>,
    /// One limiter for all sessions
    pub limiter: Arc<SynthesisLimiter>,
    pub tools: Arc<ToolRegistry>,
    pub store: Arc<dyn TurnStore>,
    pub quick_replies: QuickReplies,
    pub emotions: EmotionDetector,
    pub segmenter: SegmenterConfig,
    pub response: ResponseConfig,
    pub synthesis_timeout: Duration,
}

impl AgentServices {
    pub fn new(
        settings: &Settings,
        llm: Arc<dyn LlmBackend>,
        tts: Arc<dyn TtsBackend>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn TurnStore>,
    ) -> Self {
        Self {
            llm,
            tts,
            limiter: Arc::new(SynthesisLimiter::new(settings.synthesis.max_concurrent)),
            tools,
            store,
            quick_replies: QuickReplies::new(&settings.response),
            emotions: EmotionDetector::new(),
            segmenter: settings.segmenter.clone(),
            response: settings.response.clone(),
            synthesis_timeout: settings.synthesis.timeout(),
        }
    }
}
